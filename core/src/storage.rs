//! the transactional storage contract the core consumes.
//!
//! implementations live outside this crate; the engine only requires
//! begin/commit/rollback semantics and per-entity operations keyed as in
//! the data model. the `MemoryStore` in the workspace's `db` crate is the
//! reference implementation.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::model::{
    AcquiredVia, Character, CharacterId, GuildId, IndexingJob, OwnedCharacter, User, UserId,
};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("row not found")]
    NotFound,
    #[error("row already exists")]
    Duplicate,
    #[error("storage backend failure: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// handle on the store outside any transaction.
///
/// reads here observe committed state only. the guild snapshot writes are
/// the one set of non-transactional mutations: they belong to the indexing
/// worker, which is the sole writer of those tables while its job row is
/// `in_progress`.
#[async_trait]
pub trait Store: Send + Sync {
    type Tx: StoreTx;

    async fn begin(&self) -> StorageResult<Self::Tx>;

    async fn get_user(&self, id: UserId) -> StorageResult<Option<User>>;
    async fn find_ownership(
        &self,
        user: UserId,
        character: CharacterId,
    ) -> StorageResult<Option<OwnedCharacter>>;
    async fn list_characters(&self, user: UserId) -> StorageResult<Vec<OwnedCharacter>>;
    async fn list_wishlist(&self, user: UserId) -> StorageResult<Vec<Character>>;

    async fn indexing_job(&self, guild: GuildId) -> StorageResult<Option<IndexingJob>>;
    async fn list_members(&self, guild: GuildId) -> StorageResult<Vec<UserId>>;
    async fn delete_members_not_in(&self, guild: GuildId, keep: &[UserId]) -> StorageResult<()>;
    async fn upsert_members(
        &self,
        guild: GuildId,
        members: &[UserId],
        indexed_at: OffsetDateTime,
    ) -> StorageResult<()>;
    async fn complete_indexing_job(&self, guild: GuildId, at: OffsetDateTime)
    -> StorageResult<()>;
}

/// transaction-scoped handle. writes are invisible to other callers until
/// [`commit`](StoreTx::commit); [`rollback`](StoreTx::rollback) (or dropping
/// the handle) discards them. commit and rollback consume the handle, so a
/// finished transaction cannot be reused.
#[async_trait]
pub trait StoreTx: Send {
    /// reads the user row, creating it lazily on first interaction.
    async fn get_or_create_user(&mut self, id: UserId) -> StorageResult<User>;
    async fn set_last_roll(&mut self, id: UserId, at: OffsetDateTime) -> StorageResult<()>;
    /// applies `delta` to the user's balance (creating the row if absent)
    /// and returns the updated row. the caller decides whether a negative
    /// result aborts the transaction.
    async fn add_tokens(&mut self, id: UserId, delta: i64) -> StorageResult<User>;
    /// the profile setters create the user row if absent, like every other
    /// user mutation. validation (length caps, url shape) is the engine's
    /// job, not the store's.
    async fn set_favorite(
        &mut self,
        id: UserId,
        character: Option<CharacterId>,
    ) -> StorageResult<()>;
    async fn set_quote(&mut self, id: UserId, quote: &str) -> StorageResult<()>;
    async fn set_profile_url(&mut self, id: UserId, url: &str) -> StorageResult<()>;

    async fn list_owned_ids(&mut self, user: UserId) -> StorageResult<Vec<CharacterId>>;
    async fn get_character(&mut self, id: CharacterId) -> StorageResult<Option<Character>>;
    async fn upsert_character(&mut self, character: &Character) -> StorageResult<()>;
    /// fails with [`StorageError::Duplicate`] if the (user, character) pair
    /// already exists.
    async fn insert_ownership(
        &mut self,
        user: UserId,
        character: CharacterId,
        via: AcquiredVia,
        at: OffsetDateTime,
    ) -> StorageResult<()>;
    async fn find_ownership(
        &mut self,
        user: UserId,
        character: CharacterId,
    ) -> StorageResult<Option<OwnedCharacter>>;
    /// deletes the ownership row and returns the catalog display fields of
    /// the deleted character. [`StorageError::NotFound`] if the user does
    /// not own it.
    async fn delete_ownership(
        &mut self,
        user: UserId,
        character: CharacterId,
    ) -> StorageResult<Character>;
    /// moves a single ownership row from one owner to another: an owner-key
    /// change, not a delete + fresh insert observable in between.
    async fn reassign_ownership(
        &mut self,
        from: UserId,
        to: UserId,
        character: CharacterId,
    ) -> StorageResult<()>;

    async fn add_to_wishlist(&mut self, user: UserId, character: CharacterId)
    -> StorageResult<()>;
    /// returns whether a row was actually removed.
    async fn remove_from_wishlist(
        &mut self,
        user: UserId,
        character: CharacterId,
    ) -> StorageResult<bool>;

    async fn indexing_job(&mut self, guild: GuildId) -> StorageResult<Option<IndexingJob>>;
    /// upserts the guild's job row to `in_progress` at `now`.
    async fn start_indexing_job(&mut self, guild: GuildId, now: OffsetDateTime)
    -> StorageResult<()>;

    async fn commit(self) -> StorageResult<()>;
    async fn rollback(self) -> StorageResult<()>;
}

/// rolls a transaction back, demoting a rollback failure to a warning.
/// used on error paths where the original error is the one worth returning.
pub(crate) async fn rollback_quietly<T: StoreTx>(tx: T) {
    if let Err(error) = tx.rollback().await {
        tracing::warn!(%error, "transaction rollback failed");
    }
}
