//! character drops: a character surfaced in a channel for first-claimer
//! acquisition, outside the roll path but drawing from the same supply.
//!
//! pending drops are process-local state with no persistence, one per
//! channel. a claim has to guess the dropped character's name; the first
//! correct guess takes the drop, and the ownership insert runs in a
//! transaction like every other acquisition.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    economy::reconcile_wishlist,
    model::{AcquiredVia, ChannelId, MediaCharacter, UserId},
    storage::{StorageError, Store, StoreTx, rollback_quietly},
    supply::{CharacterSource, CharacterSupply, SourceError},
};

pub type DropResult<T> = Result<T, DropError>;

#[derive(Debug, thiserror::Error)]
pub enum DropError {
    #[error("no character to claim in this channel")]
    NothingToClaim,
    #[error("wrong guess")]
    WrongGuess,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

pub struct Drops<S, C> {
    store: S,
    supply: CharacterSupply<C>,
    pending: Arc<Mutex<HashMap<ChannelId, MediaCharacter>>>,
}

impl<S, C> Drops<S, C>
where
    S: Store,
    C: CharacterSource + 'static,
{
    pub fn new(store: S, supply: CharacterSupply<C>) -> Self {
        Drops {
            store,
            supply,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// draws a character and parks it in the channel, replacing any drop
    /// still unclaimed there. returns the character so the caller can
    /// render the guessing prompt.
    pub async fn post(&self, channel: ChannelId) -> DropResult<MediaCharacter> {
        let character = self.supply.get(&[]).await?;
        tracing::debug!(%channel, character = %character.name, "character dropped");
        self.lock_pending().insert(channel, character.clone());
        Ok(character)
    }

    /// claims the channel's pending drop by name. a wrong guess leaves the
    /// drop in place; a correct one takes it, so concurrent claimers race
    /// for the removal and exactly one proceeds. if the acquisition then
    /// fails (say the claimer already owns the character) the drop is put
    /// back for someone else.
    pub async fn claim(
        &self,
        channel: ChannelId,
        user: UserId,
        guess: &str,
    ) -> DropResult<MediaCharacter> {
        let character = {
            let mut pending = self.lock_pending();
            let character = pending.get(&channel).ok_or(DropError::NothingToClaim)?;
            if !names_match(&character.name, guess) {
                return Err(DropError::WrongGuess);
            }
            pending.remove(&channel).ok_or(DropError::NothingToClaim)?
        };

        match self.claim_tx(user, &character).await {
            Ok(()) => Ok(character),
            Err(error) => {
                self.lock_pending().insert(channel, character);
                Err(error)
            }
        }
    }

    async fn claim_tx(&self, user: UserId, character: &MediaCharacter) -> DropResult<()> {
        let mut tx = self.store.begin().await?;
        match Self::acquire(&mut tx, user, character).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(error) => {
                rollback_quietly(tx).await;
                Err(error)
            }
        }
    }

    async fn acquire(
        tx: &mut S::Tx,
        user: UserId,
        character: &MediaCharacter,
    ) -> DropResult<()> {
        let now = time::OffsetDateTime::now_utc();
        tx.get_or_create_user(user).await?;
        tx.upsert_character(&character.clone().into()).await?;
        tx.insert_ownership(user, character.id, AcquiredVia::Claim, now)
            .await?;
        reconcile_wishlist(tx, user, character.id).await;
        Ok(())
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<ChannelId, MediaCharacter>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// case-insensitive, whitespace-collapsing name comparison, so a guess
/// is not rejected over spacing or capitalization.
fn names_match(name: &str, guess: &str) -> bool {
    let normalize = |s: &str| {
        s.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    };
    normalize(name) == normalize(guess)
}
