//! the random character supply: a prefetching pool in front of the
//! upstream media catalog.
//!
//! draws come out of a mutex-guarded pool that is topped up by background
//! fetches, so a roll almost never pays the upstream round trip. duplicate
//! avoidance is best-effort only: the exclusion list filters whatever
//! happens to be resident in the pool at call time, and the synchronous
//! fallback enforces nothing at all. that looseness is documented behavior,
//! not a bug to fix.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::{
    model::{CharacterId, MediaCharacter},
    tasks::Spawner,
};

/// soft pool size. dropping below it triggers background top-ups.
pub const POOL_TARGET: usize = 100;
/// how many top-up fetches one draw may launch.
const TOP_UP_FETCHES: usize = 5;
/// construction-time prefetches, staggered to be gentle on the upstream.
const WARM_UP_FETCHES: usize = 5;
const WARM_UP_STAGGER: std::time::Duration = std::time::Duration::from_millis(500);
/// default upper bound on upstream character ids to draw from.
pub const DEFAULT_UNIVERSE: i64 = 50_000;

pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("upstream character query failed: {0}")]
    Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("upstream returned no characters")]
    Empty,
}

/// the upstream media catalog, as far as the core is concerned.
#[async_trait]
pub trait CharacterSource: Send + Sync {
    /// one pseudo-random character with id below `upper_bound`.
    /// `not_in` is an exclusion hint the upstream may ignore.
    async fn random_character(
        &self,
        upper_bound: i64,
        not_in: &[CharacterId],
    ) -> SourceResult<MediaCharacter>;

    /// direct lookup path, used by collaborators (search commands), not by
    /// the draw pipeline.
    async fn character_by_name(&self, name: &str) -> SourceResult<Vec<MediaCharacter>>;
}

/// capped prefetch pool over a [`CharacterSource`].
///
/// the mutex guards pool mutation only; fetches always run outside it, so
/// upstream latency never blocks concurrent draws.
pub struct CharacterSupply<C> {
    source: Arc<C>,
    pool: Arc<Mutex<BTreeMap<CharacterId, MediaCharacter>>>,
    spawner: Spawner,
    universe: i64,
}

impl<C> Clone for CharacterSupply<C> {
    fn clone(&self) -> Self {
        CharacterSupply {
            source: self.source.clone(),
            pool: self.pool.clone(),
            spawner: self.spawner.clone(),
            universe: self.universe,
        }
    }
}

impl<C: CharacterSource + 'static> CharacterSupply<C> {
    pub fn new(source: C, spawner: Spawner) -> Self {
        Self::with_universe(source, spawner, DEFAULT_UNIVERSE)
    }

    pub fn with_universe(source: C, spawner: Spawner, universe: i64) -> Self {
        let supply = CharacterSupply {
            source: Arc::new(source),
            pool: Arc::new(Mutex::new(BTreeMap::new())),
            spawner,
            universe,
        };
        supply.warm_up();
        supply
    }

    /// takes one character, avoiding `exclude` when the pool allows it.
    ///
    /// candidates are the resident pool entries not in `exclude`; one is
    /// picked uniformly and removed. a draw that finds the pool below
    /// target launches background top-ups. when no candidate is resident
    /// (cold pool, or everything excluded) the draw falls back to a
    /// synchronous upstream fetch, which only forwards the exclusion list
    /// as a hint.
    pub async fn get(&self, exclude: &[CharacterId]) -> SourceResult<MediaCharacter> {
        let hit = {
            let mut pool = self.lock_pool();
            if pool.len() < POOL_TARGET {
                self.top_up(exclude);
            }

            let candidates: Vec<CharacterId> = pool
                .keys()
                .filter(|id| !exclude.contains(id))
                .copied()
                .collect();
            candidates
                .choose(&mut rand::thread_rng())
                .and_then(|id| pool.remove(id))
        };

        match hit {
            Some(character) => {
                tracing::debug!(character = %character.name, "character pool hit");
                Ok(character)
            }
            None => self.source.random_character(self.universe, exclude).await,
        }
    }

    /// staggered construction-time prefetches. errors are logged and
    /// dropped; a cold pool just means the first draws pay the round trip.
    fn warm_up(&self) {
        let source = self.source.clone();
        let pool = self.pool.clone();
        let universe = self.universe;
        self.spawner.spawn(async move {
            for _ in 0..WARM_UP_FETCHES {
                tokio::time::sleep(WARM_UP_STAGGER).await;
                match source.random_character(universe, &[]).await {
                    Ok(character) => {
                        lock_pool(&pool).insert(character.id, character);
                    }
                    Err(error) => tracing::warn!(%error, "character warm-up fetch failed"),
                }
            }
        });
    }

    /// fire-and-forget top-up fetches. results land back in the pool under
    /// the lock; failures are logged and not retried.
    fn top_up(&self, exclude: &[CharacterId]) {
        for _ in 0..TOP_UP_FETCHES {
            let source = self.source.clone();
            let pool = self.pool.clone();
            let exclude = exclude.to_vec();
            let universe = self.universe;
            self.spawner.spawn(async move {
                match source.random_character(universe, &exclude).await {
                    Ok(character) => {
                        lock_pool(&pool).insert(character.id, character);
                    }
                    Err(error) => tracing::warn!(%error, "character top-up fetch failed"),
                }
            });
        }
    }

    fn lock_pool(&self) -> MutexGuard<'_, BTreeMap<CharacterId, MediaCharacter>> {
        lock_pool(&self.pool)
    }
}

fn lock_pool(
    pool: &Mutex<BTreeMap<CharacterId, MediaCharacter>>,
) -> MutexGuard<'_, BTreeMap<CharacterId, MediaCharacter>> {
    pool.lock().unwrap_or_else(PoisonError::into_inner)
}
