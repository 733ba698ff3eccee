//! entities shared by the economy engine, the character supply,
//! and the guild indexer.

use time::OffsetDateTime;

/// a chat-platform user id (snowflake).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
)]
pub struct UserId(pub u64);

/// a chat-platform guild id (snowflake).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
)]
pub struct GuildId(pub u64);

/// a chat-platform channel id (snowflake). drops are posted and claimed
/// per channel.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
)]
pub struct ChannelId(pub u64);

/// a character id in the upstream media catalog.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
)]
pub struct CharacterId(pub i64);

/// per-user economy state. created lazily on first interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    /// spendable balance. never negative; every mutation goes through a
    /// transaction that checks the resulting balance.
    pub tokens: i64,
    pub last_roll_at: OffsetDateTime,
    pub favorite: Option<CharacterId>,
    pub quote: String,
    pub profile_url: String,
}

impl User {
    /// a brand new user: zero tokens, free roll immediately available.
    pub fn new(id: UserId) -> Self {
        User {
            id,
            tokens: 0,
            last_roll_at: OffsetDateTime::UNIX_EPOCH,
            favorite: None,
            quote: String::new(),
            profile_url: String::new(),
        }
    }
}

/// a row in the character catalog, upserted lazily whenever a character
/// is first seen. idempotent on id.
#[derive(Debug, Clone, PartialEq)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub image_url: String,
}

/// a character as returned by the upstream media catalog, with the extra
/// display fields the catalog row does not keep.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaCharacter {
    pub id: CharacterId,
    pub name: String,
    pub image_url: String,
    pub url: String,
    pub media_title: String,
}

impl From<MediaCharacter> for Character {
    fn from(character: MediaCharacter) -> Self {
        Character {
            id: character.id,
            name: character.name,
            image_url: character.image_url,
        }
    }
}

/// how an ownership row came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquiredVia {
    Roll,
    Give,
    Claim,
}

impl AcquiredVia {
    pub fn as_str(self) -> &'static str {
        match self {
            AcquiredVia::Roll => "ROLL",
            AcquiredVia::Give => "GIVE",
            AcquiredVia::Claim => "CLAIM",
        }
    }
}

/// an ownership row joined with its catalog entry.
/// at most one row exists per (user, character) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedCharacter {
    pub user_id: UserId,
    pub character: Character,
    pub acquired_via: AcquiredVia,
    pub acquired_at: OffsetDateTime,
}

/// a user row together with their collection, as served by profile reads.
/// `favorite` is resolved against the collection: a favorite the user no
/// longer owns renders as none.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub user: User,
    pub characters: Vec<OwnedCharacter>,
    pub favorite: Option<OwnedCharacter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingStatus {
    InProgress,
    Completed,
}

/// the per-guild job row arbitrating duplicate indexing workers.
/// absence of a row means the guild has never been indexed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexingJob {
    pub status: IndexingStatus,
    pub updated_at: OffsetDateTime,
}
