//! wishlist maintenance: the characters a user wants but does not own.
//!
//! the economy engine reconciles these rows on acquisition (roll/give);
//! this module covers the user-driven add/remove/list surface.

use crate::{
    model::{Character, CharacterId, UserId},
    storage::{StorageError, Store, StoreTx, rollback_quietly},
};

pub type WishlistResult<T> = Result<T, WishlistError>;

#[derive(Debug, thiserror::Error)]
pub enum WishlistError {
    #[error("user {user} already owns character {character}")]
    AlreadyOwned { user: UserId, character: CharacterId },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct Wishlist<S> {
    store: S,
}

impl<S: Store> Wishlist<S> {
    pub fn new(store: S) -> Self {
        Wishlist { store }
    }

    /// wishes for a character the user does not own. upserts the catalog
    /// row so the wishlist can render without another upstream fetch.
    /// idempotent: re-adding is a no-op.
    pub async fn add(&self, user: UserId, character: &Character) -> WishlistResult<()> {
        let mut tx = self.store.begin().await?;
        match Self::add_tx(&mut tx, user, character).await {
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

    async fn add_tx(tx: &mut S::Tx, user: UserId, character: &Character) -> WishlistResult<()> {
        if tx.find_ownership(user, character.id).await?.is_some() {
            return Err(WishlistError::AlreadyOwned {
                user,
                character: character.id,
            });
        }
        tx.upsert_character(character).await?;
        tx.add_to_wishlist(user, character.id).await?;
        Ok(())
    }

    /// returns whether a row was actually removed.
    pub async fn remove(&self, user: UserId, character: CharacterId) -> WishlistResult<bool> {
        let mut tx = self.store.begin().await?;
        match tx.remove_from_wishlist(user, character).await {
            Ok(removed) => {
                tx.commit().await?;
                Ok(removed)
            }
            Err(error) => {
                rollback_quietly(tx).await;
                Err(error.into())
            }
        }
    }

    pub async fn list(&self, user: UserId) -> WishlistResult<Vec<Character>> {
        Ok(self.store.list_wishlist(user).await?)
    }
}
