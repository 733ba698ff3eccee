//! transactional core of a collectible-character economy.
//!
//! three coupled subsystems live here: the [`economy`] transaction engine
//! (roll / exchange / give / token transfer / profile), the [`supply`]
//! prefetch pool that hides upstream catalog latency behind draws, and the
//! [`guild`] indexer that keeps a staleness-bounded membership snapshot
//! via a single-flight job protocol. [`drops`] is the second acquisition
//! path riding the same supply. storage is a consumed contract
//! ([`storage::Store`]); the command front end that drives all of this
//! lives outside the crate and sees only typed results and errors.

pub mod config;
pub mod drops;
pub mod economy;
pub mod guild;
pub mod model;
pub mod storage;
pub mod supply;
pub mod tasks;
pub mod wishlist;

pub use config::Config;
pub use drops::Drops;
pub use economy::{Economy, EconomyError, RollConfig};
pub use guild::{Indexer, MemberSource};
pub use model::{ChannelId, CharacterId, GuildId, UserId};
pub use supply::{CharacterSource, CharacterSupply};
pub use tasks::Spawner;
pub use wishlist::Wishlist;
