//! the economy transaction engine: roll, exchange, give, token transfer,
//! and the pure ownership/profile reads.
//!
//! every mutating operation runs as one storage transaction: any failure
//! anywhere rolls the whole thing back, so persisted state is never
//! observable mid-operation and a failed call is always safe to retry.

use time::{Duration, OffsetDateTime};

use crate::{
    model::{
        AcquiredVia, Character, CharacterId, MediaCharacter, OwnedCharacter, Profile, UserId,
    },
    storage::{StorageError, Store, StoreTx, rollback_quietly},
    supply::{CharacterSource, CharacterSupply, SourceError},
};

/// tokens credited for liquidating a character.
const EXCHANGE_CREDIT: i64 = 1;
/// longest accepted profile quote, in bytes.
const QUOTE_MAX_LEN: usize = 1024;
/// the only host accepted for external tracker profile links.
const PROFILE_URL_HOST: &str = "anilist.co";

pub type EconomyResult<T> = Result<T, EconomyError>;

#[derive(Debug, thiserror::Error)]
pub enum EconomyError {
    /// the roll was gated: the cooldown has not elapsed and the balance is
    /// short. carries what the caller needs to render a precise message.
    #[error("you need {missing_tokens} more tokens, or a free roll unlocks at {until}")]
    RollCooldown {
        until: OffsetDateTime,
        missing_tokens: i64,
    },
    #[error("user {user} does not own character {character}")]
    DoesNotOwn { user: UserId, character: CharacterId },
    #[error("user {user} already owns character {character}")]
    AlreadyOwns { user: UserId, character: CharacterId },
    #[error("insufficient tokens: balance {balance} cannot cover {amount}")]
    InsufficientTokens { balance: i64, amount: i64 },
    #[error("transfer amount must be positive, got {0}")]
    NonPositiveAmount(i64),
    #[error("cannot transfer tokens to yourself")]
    SelfTransfer,
    #[error("character {0} is not in the catalog")]
    UnknownCharacter(CharacterId),
    #[error("quote is too long: {length} bytes, max {QUOTE_MAX_LEN}")]
    QuoteTooLong { length: usize },
    #[error("invalid tracker profile url, expected https://{PROFILE_URL_HOST}/user/...")]
    InvalidProfileUrl,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// gating parameters for [`Economy::roll`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollConfig {
    pub cooldown: Duration,
    pub tokens_needed: i64,
}

impl Default for RollConfig {
    fn default() -> Self {
        RollConfig {
            cooldown: Duration::hours(2),
            tokens_needed: 3,
        }
    }
}

pub struct Economy<S, C> {
    store: S,
    supply: CharacterSupply<C>,
    config: RollConfig,
}

impl<S, C> Economy<S, C>
where
    S: Store,
    C: CharacterSource + 'static,
{
    pub fn new(store: S, supply: CharacterSupply<C>, config: RollConfig) -> Self {
        Economy {
            store,
            supply,
            config,
        }
    }

    /// draws a new character for the user, paid by the free-roll cooldown
    /// or by tokens. exactly one of the two is consumed.
    pub async fn roll(&self, user: UserId) -> EconomyResult<MediaCharacter> {
        let mut tx = self.store.begin().await?;
        match self.roll_tx(&mut tx, user).await {
            Ok(character) => {
                tx.commit().await?;
                Ok(character)
            }
            Err(error) => {
                rollback_quietly(tx).await;
                Err(error)
            }
        }
    }

    async fn roll_tx(&self, tx: &mut S::Tx, user_id: UserId) -> EconomyResult<MediaCharacter> {
        let user = tx.get_or_create_user(user_id).await?;

        let now = OffsetDateTime::now_utc();
        let can_roll_free = now >= user.last_roll_at + self.config.cooldown;
        let has_tokens = user.tokens >= self.config.tokens_needed;

        if !can_roll_free && !has_tokens {
            return Err(EconomyError::RollCooldown {
                until: user.last_roll_at + self.config.cooldown,
                missing_tokens: self.config.tokens_needed - user.tokens,
            });
        }

        let owned = tx.list_owned_ids(user_id).await?;
        let character = self.supply.get(&owned).await?;

        tx.upsert_character(&character.clone().into()).await?;
        tx.insert_ownership(user_id, character.id, AcquiredVia::Roll, now)
            .await?;
        reconcile_wishlist(tx, user_id, character.id).await;

        // consume exactly one of the two gates
        if can_roll_free {
            tx.set_last_roll(user_id, now).await?;
        } else {
            tx.add_tokens(user_id, -self.config.tokens_needed).await?;
        }

        Ok(character)
    }

    /// liquidates an owned character for [`EXCHANGE_CREDIT`] tokens and
    /// returns its display fields.
    pub async fn exchange(&self, user: UserId, character: CharacterId) -> EconomyResult<Character> {
        let mut tx = self.store.begin().await?;
        match Self::exchange_tx(&mut tx, user, character).await {
            Ok(character) => {
                tx.commit().await?;
                Ok(character)
            }
            Err(error) => {
                rollback_quietly(tx).await;
                Err(error)
            }
        }
    }

    async fn exchange_tx(
        tx: &mut S::Tx,
        user: UserId,
        character: CharacterId,
    ) -> EconomyResult<Character> {
        let deleted = tx
            .delete_ownership(user, character)
            .await
            .map_err(|error| match error {
                StorageError::NotFound => EconomyError::DoesNotOwn { user, character },
                other => other.into(),
            })?;
        tx.add_tokens(user, EXCHANGE_CREDIT).await?;
        Ok(deleted)
    }

    /// moves a character from one user to another. fails if the sender
    /// does not own it or the recipient already does; a failed give leaves
    /// both collections untouched.
    pub async fn give(
        &self,
        from: UserId,
        to: UserId,
        character: CharacterId,
    ) -> EconomyResult<OwnedCharacter> {
        let mut tx = self.store.begin().await?;
        match Self::give_tx(&mut tx, from, to, character).await {
            Ok(owned) => {
                tx.commit().await?;
                Ok(owned)
            }
            Err(error) => {
                rollback_quietly(tx).await;
                Err(error)
            }
        }
    }

    async fn give_tx(
        tx: &mut S::Tx,
        from: UserId,
        to: UserId,
        character: CharacterId,
    ) -> EconomyResult<OwnedCharacter> {
        let owned = tx
            .find_ownership(from, character)
            .await?
            .ok_or(EconomyError::DoesNotOwn {
                user: from,
                character,
            })?;

        if tx.find_ownership(to, character).await?.is_some() {
            return Err(EconomyError::AlreadyOwns {
                user: to,
                character,
            });
        }

        tx.reassign_ownership(from, to, character).await?;
        reconcile_wishlist(tx, to, character).await;

        Ok(OwnedCharacter {
            user_id: to,
            ..owned
        })
    }

    /// moves tokens between users. amount and distinctness are validated
    /// before any storage access.
    pub async fn transfer_tokens(
        &self,
        from: UserId,
        to: UserId,
        amount: i64,
    ) -> EconomyResult<()> {
        if amount <= 0 {
            return Err(EconomyError::NonPositiveAmount(amount));
        }
        if from == to {
            return Err(EconomyError::SelfTransfer);
        }

        let mut tx = self.store.begin().await?;
        match Self::transfer_tx(&mut tx, from, to, amount).await {
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

    async fn transfer_tx(
        tx: &mut S::Tx,
        from: UserId,
        to: UserId,
        amount: i64,
    ) -> EconomyResult<()> {
        let sender = tx.add_tokens(from, -amount).await?;
        if sender.tokens < 0 {
            return Err(EconomyError::InsufficientTokens {
                balance: sender.tokens + amount,
                amount,
            });
        }
        tx.add_tokens(to, amount).await?;
        Ok(())
    }

    /// marks a character as the user's favorite and returns its display
    /// fields. the character must be known to the catalog so the profile
    /// can render it; owning it is not required.
    pub async fn set_favorite(
        &self,
        user: UserId,
        character: CharacterId,
    ) -> EconomyResult<Character> {
        let mut tx = self.store.begin().await?;
        match Self::set_favorite_tx(&mut tx, user, character).await {
            Ok(character) => {
                tx.commit().await?;
                Ok(character)
            }
            Err(error) => {
                rollback_quietly(tx).await;
                Err(error)
            }
        }
    }

    async fn set_favorite_tx(
        tx: &mut S::Tx,
        user: UserId,
        character: CharacterId,
    ) -> EconomyResult<Character> {
        let row = tx
            .get_character(character)
            .await?
            .ok_or(EconomyError::UnknownCharacter(character))?;
        tx.set_favorite(user, Some(character)).await?;
        Ok(row)
    }

    /// sets the user's profile quote. rejected before storage when longer
    /// than [`QUOTE_MAX_LEN`] bytes.
    pub async fn set_quote(&self, user: UserId, quote: &str) -> EconomyResult<()> {
        if quote.len() > QUOTE_MAX_LEN {
            return Err(EconomyError::QuoteTooLong {
                length: quote.len(),
            });
        }

        let mut tx = self.store.begin().await?;
        match tx.set_quote(user, quote).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(error) => {
                rollback_quietly(tx).await;
                Err(error.into())
            }
        }
    }

    /// links the user's external tracker profile. only profile urls under
    /// `https://anilist.co/user/` are accepted; validated before storage.
    pub async fn set_profile_url(&self, user: UserId, url: &str) -> EconomyResult<()> {
        let parsed = reqwest::Url::parse(url).map_err(|_| EconomyError::InvalidProfileUrl)?;
        if parsed.host_str() != Some(PROFILE_URL_HOST) || !parsed.path().starts_with("/user/") {
            return Err(EconomyError::InvalidProfileUrl);
        }

        let mut tx = self.store.begin().await?;
        match tx.set_profile_url(user, url).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(error) => {
                rollback_quietly(tx).await;
                Err(error.into())
            }
        }
    }

    /// pure read, no transaction.
    pub async fn check_ownership(
        &self,
        user: UserId,
        character: CharacterId,
    ) -> EconomyResult<Option<Character>> {
        let owned = self.store.find_ownership(user, character).await?;
        Ok(owned.map(|row| row.character))
    }

    /// a user's collection, pure read.
    pub async fn characters(&self, user: UserId) -> EconomyResult<Vec<OwnedCharacter>> {
        Ok(self.store.list_characters(user).await?)
    }

    /// the user row (if any) joined with their collection. the favorite
    /// only renders while the user still owns it.
    pub async fn profile(&self, user: UserId) -> EconomyResult<Option<Profile>> {
        let Some(row) = self.store.get_user(user).await? else {
            return Ok(None);
        };
        let characters = self.store.list_characters(user).await?;
        let favorite = row.favorite.and_then(|id| {
            characters
                .iter()
                .find(|owned| owned.character.id == id)
                .cloned()
        });
        Ok(Some(Profile {
            user: row,
            characters,
            favorite,
        }))
    }
}

/// best-effort wishlist cleanup after an acquisition. a leftover row is
/// cosmetic and self-heals on the next acquisition, so failures are logged
/// rather than aborting a roll or give the user already paid for.
pub(crate) async fn reconcile_wishlist<T: StoreTx>(tx: &mut T, user: UserId, character: CharacterId) {
    if let Err(error) = tx.remove_from_wishlist(user, character).await {
        tracing::warn!(%error, %user, %character, "failed to reconcile wishlist");
    }
}
