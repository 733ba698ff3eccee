//! in-memory reference implementation of the gachapon storage contract.
//!
//! a [`MemoryTx`] holds the table lock for its whole lifetime, so
//! transactions are fully serialized, like a single-connection sqlite.
//! an undo snapshot taken at begin is restored on rollback, and on drop
//! when the transaction was never committed.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use gachapon_core::model::{
    AcquiredVia, Character, CharacterId, GuildId, IndexingJob, IndexingStatus, OwnedCharacter,
    User, UserId,
};
use gachapon_core::storage::{StorageError, StorageResult, Store, StoreTx};

#[derive(Debug, Clone, Copy)]
struct OwnershipRow {
    via: AcquiredVia,
    at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    catalog: BTreeMap<CharacterId, Character>,
    ownership: BTreeMap<(UserId, CharacterId), OwnershipRow>,
    wishlist: BTreeSet<(UserId, CharacterId)>,
    members: BTreeMap<(GuildId, UserId), OffsetDateTime>,
    jobs: BTreeMap<GuildId, IndexingJob>,
}

impl Tables {
    fn user_mut(&mut self, id: UserId) -> &mut User {
        self.users.entry(id).or_insert_with(|| User::new(id))
    }

    fn catalog_entry(&self, id: CharacterId) -> Character {
        self.catalog.get(&id).cloned().unwrap_or(Character {
            id,
            name: String::new(),
            image_url: String::new(),
        })
    }

    fn owned(&self, user: UserId, character: CharacterId) -> Option<OwnedCharacter> {
        self.ownership
            .get(&(user, character))
            .map(|row| OwnedCharacter {
                user_id: user,
                character: self.catalog_entry(character),
                acquired_via: row.via,
                acquired_at: row.at,
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> StorageResult<MemoryTx> {
        let guard = self.tables.clone().lock_owned().await;
        let undo = guard.clone();
        Ok(MemoryTx {
            guard,
            undo: Some(undo),
        })
    }

    async fn get_user(&self, id: UserId) -> StorageResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_ownership(
        &self,
        user: UserId,
        character: CharacterId,
    ) -> StorageResult<Option<OwnedCharacter>> {
        Ok(self.tables.lock().await.owned(user, character))
    }

    async fn list_characters(&self, user: UserId) -> StorageResult<Vec<OwnedCharacter>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .ownership
            .range((user, CharacterId(i64::MIN))..=(user, CharacterId(i64::MAX)))
            .map(|(&(_, character), row)| OwnedCharacter {
                user_id: user,
                character: tables.catalog_entry(character),
                acquired_via: row.via,
                acquired_at: row.at,
            })
            .collect())
    }

    async fn list_wishlist(&self, user: UserId) -> StorageResult<Vec<Character>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .wishlist
            .range((user, CharacterId(i64::MIN))..=(user, CharacterId(i64::MAX)))
            .map(|&(_, character)| tables.catalog_entry(character))
            .collect())
    }

    async fn indexing_job(&self, guild: GuildId) -> StorageResult<Option<IndexingJob>> {
        Ok(self.tables.lock().await.jobs.get(&guild).copied())
    }

    async fn list_members(&self, guild: GuildId) -> StorageResult<Vec<UserId>> {
        Ok(self
            .tables
            .lock()
            .await
            .members
            .range((guild, UserId(u64::MIN))..=(guild, UserId(u64::MAX)))
            .map(|(&(_, user), _)| user)
            .collect())
    }

    async fn delete_members_not_in(&self, guild: GuildId, keep: &[UserId]) -> StorageResult<()> {
        self.tables
            .lock()
            .await
            .members
            .retain(|&(g, user), _| g != guild || keep.contains(&user));
        Ok(())
    }

    async fn upsert_members(
        &self,
        guild: GuildId,
        members: &[UserId],
        indexed_at: OffsetDateTime,
    ) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        for &user in members {
            tables.members.insert((guild, user), indexed_at);
        }
        Ok(())
    }

    async fn complete_indexing_job(
        &self,
        guild: GuildId,
        at: OffsetDateTime,
    ) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        let job = tables.jobs.get_mut(&guild).ok_or(StorageError::NotFound)?;
        job.status = IndexingStatus::Completed;
        job.updated_at = at;
        Ok(())
    }
}

/// transaction over [`MemoryStore`]. holds the store lock until committed,
/// rolled back, or dropped; drop without commit restores the undo snapshot.
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    undo: Option<Tables>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            *self.guard = undo;
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_or_create_user(&mut self, id: UserId) -> StorageResult<User> {
        Ok(self.guard.user_mut(id).clone())
    }

    async fn set_last_roll(&mut self, id: UserId, at: OffsetDateTime) -> StorageResult<()> {
        self.guard.user_mut(id).last_roll_at = at;
        Ok(())
    }

    async fn add_tokens(&mut self, id: UserId, delta: i64) -> StorageResult<User> {
        let user = self.guard.user_mut(id);
        user.tokens += delta;
        Ok(user.clone())
    }

    async fn set_favorite(
        &mut self,
        id: UserId,
        character: Option<CharacterId>,
    ) -> StorageResult<()> {
        self.guard.user_mut(id).favorite = character;
        Ok(())
    }

    async fn set_quote(&mut self, id: UserId, quote: &str) -> StorageResult<()> {
        self.guard.user_mut(id).quote = quote.to_string();
        Ok(())
    }

    async fn set_profile_url(&mut self, id: UserId, url: &str) -> StorageResult<()> {
        self.guard.user_mut(id).profile_url = url.to_string();
        Ok(())
    }

    async fn list_owned_ids(&mut self, user: UserId) -> StorageResult<Vec<CharacterId>> {
        Ok(self
            .guard
            .ownership
            .range((user, CharacterId(i64::MIN))..=(user, CharacterId(i64::MAX)))
            .map(|(&(_, character), _)| character)
            .collect())
    }

    async fn get_character(&mut self, id: CharacterId) -> StorageResult<Option<Character>> {
        Ok(self.guard.catalog.get(&id).cloned())
    }

    async fn upsert_character(&mut self, character: &Character) -> StorageResult<()> {
        self.guard.catalog.insert(character.id, character.clone());
        Ok(())
    }

    async fn insert_ownership(
        &mut self,
        user: UserId,
        character: CharacterId,
        via: AcquiredVia,
        at: OffsetDateTime,
    ) -> StorageResult<()> {
        if self.guard.ownership.contains_key(&(user, character)) {
            return Err(StorageError::Duplicate);
        }
        self.guard.ownership.insert((user, character), OwnershipRow { via, at });
        Ok(())
    }

    async fn find_ownership(
        &mut self,
        user: UserId,
        character: CharacterId,
    ) -> StorageResult<Option<OwnedCharacter>> {
        Ok(self.guard.owned(user, character))
    }

    async fn delete_ownership(
        &mut self,
        user: UserId,
        character: CharacterId,
    ) -> StorageResult<Character> {
        self.guard
            .ownership
            .remove(&(user, character))
            .ok_or(StorageError::NotFound)?;
        Ok(self.guard.catalog_entry(character))
    }

    async fn reassign_ownership(
        &mut self,
        from: UserId,
        to: UserId,
        character: CharacterId,
    ) -> StorageResult<()> {
        if self.guard.ownership.contains_key(&(to, character)) {
            return Err(StorageError::Duplicate);
        }
        let row = self
            .guard
            .ownership
            .remove(&(from, character))
            .ok_or(StorageError::NotFound)?;
        self.guard.ownership.insert((to, character), row);
        Ok(())
    }

    async fn add_to_wishlist(
        &mut self,
        user: UserId,
        character: CharacterId,
    ) -> StorageResult<()> {
        self.guard.wishlist.insert((user, character));
        Ok(())
    }

    async fn remove_from_wishlist(
        &mut self,
        user: UserId,
        character: CharacterId,
    ) -> StorageResult<bool> {
        Ok(self.guard.wishlist.remove(&(user, character)))
    }

    async fn indexing_job(&mut self, guild: GuildId) -> StorageResult<Option<IndexingJob>> {
        Ok(self.guard.jobs.get(&guild).copied())
    }

    async fn start_indexing_job(
        &mut self,
        guild: GuildId,
        now: OffsetDateTime,
    ) -> StorageResult<()> {
        self.guard.jobs.insert(
            guild,
            IndexingJob {
                status: IndexingStatus::InProgress,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn commit(mut self) -> StorageResult<()> {
        self.undo = None;
        Ok(())
    }

    async fn rollback(mut self) -> StorageResult<()> {
        if let Some(undo) = self.undo.take() {
            *self.guard = undo;
        }
        Ok(())
    }
}
