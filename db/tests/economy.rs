//! end-to-end economy engine tests against the in-memory store.

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};

use gachapon_core::economy::{Economy, EconomyError, RollConfig};
use gachapon_core::model::{AcquiredVia, Character, CharacterId, MediaCharacter, UserId};
use gachapon_core::storage::{StorageError, Store, StoreTx};
use gachapon_core::supply::{CharacterSource, CharacterSupply, SourceError, SourceResult};
use gachapon_core::tasks::Spawner;
use gachapon_core::wishlist::{Wishlist, WishlistError};
use gachapon_db::MemoryStore;

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const REM: CharacterId = CharacterId(42);

/// always serves the same character, like an upstream that ignores the
/// exclusion hint.
struct StaticSource;

#[async_trait]
impl CharacterSource for StaticSource {
    async fn random_character(
        &self,
        _upper_bound: i64,
        _not_in: &[CharacterId],
    ) -> SourceResult<MediaCharacter> {
        Ok(MediaCharacter {
            id: REM,
            name: "Rem".to_string(),
            image_url: "https://img.example/rem.png".to_string(),
            url: "https://chars.example/42".to_string(),
            media_title: "Re:Zero".to_string(),
        })
    }

    async fn character_by_name(&self, _name: &str) -> SourceResult<Vec<MediaCharacter>> {
        Ok(vec![])
    }
}

struct BrokenSource;

#[async_trait]
impl CharacterSource for BrokenSource {
    async fn random_character(
        &self,
        _upper_bound: i64,
        _not_in: &[CharacterId],
    ) -> SourceResult<MediaCharacter> {
        Err(SourceError::Empty)
    }

    async fn character_by_name(&self, _name: &str) -> SourceResult<Vec<MediaCharacter>> {
        Err(SourceError::Empty)
    }
}

fn test_config() -> RollConfig {
    RollConfig {
        cooldown: Duration::hours(2),
        tokens_needed: 5,
    }
}

fn economy<C: CharacterSource + 'static>(
    store: MemoryStore,
    source: C,
) -> (Economy<MemoryStore, C>, Spawner) {
    let spawner = Spawner::new();
    let supply = CharacterSupply::new(source, spawner.clone());
    (Economy::new(store, supply, test_config()), spawner)
}

/// seeds a user row through the storage contract.
async fn seed_user(store: &MemoryStore, id: UserId, tokens: i64, last_roll_at: OffsetDateTime) {
    let mut tx = store.begin().await.unwrap();
    tx.get_or_create_user(id).await.unwrap();
    tx.add_tokens(id, tokens).await.unwrap();
    tx.set_last_roll(id, last_roll_at).await.unwrap();
    tx.commit().await.unwrap();
}

/// seeds an owned character (catalog row included).
async fn seed_ownership(store: &MemoryStore, user: UserId, character: CharacterId) {
    let mut tx = store.begin().await.unwrap();
    tx.upsert_character(&Character {
        id: character,
        name: format!("character {character}"),
        image_url: String::new(),
    })
    .await
    .unwrap();
    tx.insert_ownership(user, character, AcquiredVia::Roll, OffsetDateTime::now_utc())
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn elapsed_cooldown_rolls_free_and_keeps_tokens() {
    let store = MemoryStore::new();
    let now = OffsetDateTime::now_utc();
    seed_user(&store, ALICE, 0, now - Duration::hours(3)).await;

    let (economy, spawner) = economy(store.clone(), StaticSource);
    let drawn = economy.roll(ALICE).await.expect("free roll");
    assert_eq!(drawn.id, REM);

    let user = store.get_user(ALICE).await.unwrap().unwrap();
    assert_eq!(user.tokens, 0);
    // the free path consumes the cooldown, not tokens
    assert!(user.last_roll_at >= now);
    assert!(store.find_ownership(ALICE, REM).await.unwrap().is_some());
    spawner.shutdown();
}

#[tokio::test]
async fn active_cooldown_rolls_with_tokens() {
    let store = MemoryStore::new();
    let now = OffsetDateTime::now_utc();
    seed_user(&store, ALICE, 10, now).await;

    let (economy, spawner) = economy(store.clone(), StaticSource);
    economy.roll(ALICE).await.expect("token roll");

    let user = store.get_user(ALICE).await.unwrap().unwrap();
    assert_eq!(user.tokens, 5);
    // the token path leaves the free-roll timer alone
    assert_eq!(user.last_roll_at, now);
    spawner.shutdown();
}

#[tokio::test]
async fn gated_roll_reports_wait_and_missing_tokens() {
    let store = MemoryStore::new();
    let now = OffsetDateTime::now_utc();
    seed_user(&store, ALICE, 3, now).await;

    let (economy, spawner) = economy(store.clone(), StaticSource);
    let error = economy.roll(ALICE).await.expect_err("gated");

    match error {
        EconomyError::RollCooldown {
            until,
            missing_tokens,
        } => {
            assert_eq!(until, now + Duration::hours(2));
            assert_eq!(missing_tokens, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // no side effects
    let user = store.get_user(ALICE).await.unwrap().unwrap();
    assert_eq!(user.tokens, 3);
    assert!(store.find_ownership(ALICE, REM).await.unwrap().is_none());
    spawner.shutdown();
}

#[tokio::test]
async fn roll_reconciles_the_wishlist() {
    let store = MemoryStore::new();
    let now = OffsetDateTime::now_utc();
    seed_user(&store, ALICE, 0, now - Duration::hours(3)).await;

    let mut tx = store.begin().await.unwrap();
    tx.add_to_wishlist(ALICE, REM).await.unwrap();
    tx.commit().await.unwrap();

    let (economy, spawner) = economy(store.clone(), StaticSource);
    economy.roll(ALICE).await.expect("roll");

    assert!(store.list_wishlist(ALICE).await.unwrap().is_empty());
    spawner.shutdown();
}

#[tokio::test]
async fn failed_draw_rolls_everything_back() {
    let store = MemoryStore::new();

    let (economy, spawner) = economy(store.clone(), BrokenSource);
    let error = economy.roll(ALICE).await.expect_err("source down");
    assert!(matches!(error, EconomyError::Source(_)));

    // even the lazily created user row is rolled back
    assert!(store.get_user(ALICE).await.unwrap().is_none());
    spawner.shutdown();
}

#[tokio::test]
async fn duplicate_draw_fails_the_whole_roll() {
    let store = MemoryStore::new();
    let now = OffsetDateTime::now_utc();
    seed_user(&store, ALICE, 10, now).await;
    seed_ownership(&store, ALICE, REM).await;

    // the source keeps serving the one character alice already owns, and
    // the pool cannot exclude it on the fallback path
    let (economy, spawner) = economy(store.clone(), StaticSource);
    let error = economy.roll(ALICE).await.expect_err("duplicate");
    assert!(matches!(
        error,
        EconomyError::Storage(StorageError::Duplicate)
    ));

    // the token debit in the same transaction was rolled back
    let user = store.get_user(ALICE).await.unwrap().unwrap();
    assert_eq!(user.tokens, 10);
    assert_eq!(store.list_characters(ALICE).await.unwrap().len(), 1);
    spawner.shutdown();
}

#[tokio::test]
async fn exchange_liquidates_for_a_token() {
    let store = MemoryStore::new();
    seed_ownership(&store, ALICE, REM).await;

    let (economy, spawner) = economy(store.clone(), StaticSource);
    let character = economy.exchange(ALICE, REM).await.expect("exchange");
    assert_eq!(character.id, REM);

    let user = store.get_user(ALICE).await.unwrap().unwrap();
    assert_eq!(user.tokens, 1);
    assert!(store.find_ownership(ALICE, REM).await.unwrap().is_none());
    spawner.shutdown();
}

#[tokio::test]
async fn exchange_of_unowned_character_fails_cleanly() {
    let store = MemoryStore::new();
    seed_user(&store, ALICE, 7, OffsetDateTime::now_utc()).await;

    let (economy, spawner) = economy(store.clone(), StaticSource);
    let error = economy.exchange(ALICE, REM).await.expect_err("not owned");
    assert!(matches!(
        error,
        EconomyError::DoesNotOwn { user: ALICE, character: REM }
    ));

    let user = store.get_user(ALICE).await.unwrap().unwrap();
    assert_eq!(user.tokens, 7);
    spawner.shutdown();
}

#[tokio::test]
async fn give_moves_the_character_and_reconciles_the_wishlist() {
    let store = MemoryStore::new();
    seed_ownership(&store, ALICE, REM).await;

    let mut tx = store.begin().await.unwrap();
    tx.add_to_wishlist(BOB, REM).await.unwrap();
    tx.commit().await.unwrap();

    let (economy, spawner) = economy(store.clone(), StaticSource);
    let owned = economy.give(ALICE, BOB, REM).await.expect("give");
    assert_eq!(owned.user_id, BOB);

    assert!(store.find_ownership(ALICE, REM).await.unwrap().is_none());
    assert!(store.find_ownership(BOB, REM).await.unwrap().is_some());
    assert!(store.list_wishlist(BOB).await.unwrap().is_empty());
    spawner.shutdown();
}

#[tokio::test]
async fn give_fails_when_sender_does_not_own() {
    let store = MemoryStore::new();

    let (economy, spawner) = economy(store.clone(), StaticSource);
    let error = economy.give(ALICE, BOB, REM).await.expect_err("not owned");
    assert!(matches!(error, EconomyError::DoesNotOwn { .. }));
    spawner.shutdown();
}

#[tokio::test]
async fn give_fails_when_recipient_already_owns() {
    let store = MemoryStore::new();
    seed_ownership(&store, ALICE, REM).await;
    seed_ownership(&store, BOB, REM).await;

    let (economy, spawner) = economy(store.clone(), StaticSource);
    let error = economy.give(ALICE, BOB, REM).await.expect_err("duplicate");
    assert!(matches!(
        error,
        EconomyError::AlreadyOwns { user: BOB, character: REM }
    ));

    // both collections untouched
    assert!(store.find_ownership(ALICE, REM).await.unwrap().is_some());
    assert!(store.find_ownership(BOB, REM).await.unwrap().is_some());
    spawner.shutdown();
}

#[tokio::test]
async fn transfer_moves_tokens_between_users() {
    let store = MemoryStore::new();
    seed_user(&store, ALICE, 10, OffsetDateTime::now_utc()).await;

    let (economy, spawner) = economy(store.clone(), StaticSource);
    economy.transfer_tokens(ALICE, BOB, 4).await.expect("transfer");

    assert_eq!(store.get_user(ALICE).await.unwrap().unwrap().tokens, 6);
    assert_eq!(store.get_user(BOB).await.unwrap().unwrap().tokens, 4);
    spawner.shutdown();
}

#[tokio::test]
async fn overdrawn_transfer_rolls_back_the_debit() {
    let store = MemoryStore::new();
    seed_user(&store, ALICE, 3, OffsetDateTime::now_utc()).await;

    let (economy, spawner) = economy(store.clone(), StaticSource);
    let error = economy
        .transfer_tokens(ALICE, BOB, 10)
        .await
        .expect_err("insufficient");
    assert!(matches!(
        error,
        EconomyError::InsufficientTokens {
            balance: 3,
            amount: 10
        }
    ));

    // the debit inside the transaction was rolled back; balances never
    // went negative anywhere observable
    assert_eq!(store.get_user(ALICE).await.unwrap().unwrap().tokens, 3);
    assert!(store.get_user(BOB).await.unwrap().is_none());
    spawner.shutdown();
}

#[tokio::test]
async fn check_ownership_is_a_pure_read() {
    let store = MemoryStore::new();
    seed_ownership(&store, ALICE, REM).await;

    let (economy, spawner) = economy(store.clone(), StaticSource);
    let owned = economy.check_ownership(ALICE, REM).await.unwrap();
    assert_eq!(owned.map(|c| c.id), Some(REM));

    let not_owned = economy.check_ownership(BOB, REM).await.unwrap();
    assert!(not_owned.is_none());
    spawner.shutdown();
}

#[tokio::test]
async fn profile_joins_user_and_collection() {
    let store = MemoryStore::new();
    seed_user(&store, ALICE, 2, OffsetDateTime::now_utc()).await;
    seed_ownership(&store, ALICE, REM).await;

    let (economy, spawner) = economy(store.clone(), StaticSource);
    let profile = economy.profile(ALICE).await.unwrap().expect("profile");
    assert_eq!(profile.user.tokens, 2);
    assert_eq!(profile.characters.len(), 1);

    assert!(economy.profile(BOB).await.unwrap().is_none());
    spawner.shutdown();
}

#[tokio::test]
async fn favorite_surfaces_in_the_profile() {
    let store = MemoryStore::new();
    seed_ownership(&store, ALICE, REM).await;

    let (economy, spawner) = economy(store.clone(), StaticSource);
    let favorited = economy.set_favorite(ALICE, REM).await.expect("favorite");
    assert_eq!(favorited.id, REM);

    let profile = economy.profile(ALICE).await.unwrap().expect("profile");
    assert_eq!(profile.user.favorite, Some(REM));
    assert_eq!(profile.favorite.as_ref().map(|f| f.character.id), Some(REM));
    spawner.shutdown();
}

#[tokio::test]
async fn uncataloged_favorite_is_rejected() {
    let store = MemoryStore::new();

    let (economy, spawner) = economy(store.clone(), StaticSource);
    let error = economy.set_favorite(ALICE, REM).await.expect_err("unknown");
    assert!(matches!(error, EconomyError::UnknownCharacter(REM)));

    // the lazily created user row was rolled back with the rest
    assert!(store.get_user(ALICE).await.unwrap().is_none());
    spawner.shutdown();
}

#[tokio::test]
async fn exchanged_favorite_stops_rendering() {
    let store = MemoryStore::new();
    seed_ownership(&store, ALICE, REM).await;

    let (economy, spawner) = economy(store.clone(), StaticSource);
    economy.set_favorite(ALICE, REM).await.expect("favorite");
    economy.exchange(ALICE, REM).await.expect("exchange");

    let profile = economy.profile(ALICE).await.unwrap().expect("profile");
    // the stale pointer stays on the row but resolves to nothing
    assert_eq!(profile.user.favorite, Some(REM));
    assert!(profile.favorite.is_none());
    spawner.shutdown();
}

#[tokio::test]
async fn quote_and_tracker_url_round_trip() {
    let store = MemoryStore::new();

    let (economy, spawner) = economy(store.clone(), StaticSource);
    economy.set_quote(ALICE, "I am the bone of my sword").await.expect("quote");
    economy
        .set_profile_url(ALICE, "https://anilist.co/user/alice")
        .await
        .expect("url");

    let user = store.get_user(ALICE).await.unwrap().unwrap();
    assert_eq!(user.quote, "I am the bone of my sword");
    assert_eq!(user.profile_url, "https://anilist.co/user/alice");
    spawner.shutdown();
}

#[tokio::test]
async fn wishlist_add_list_remove() {
    let store = MemoryStore::new();
    let wishlist = Wishlist::new(store.clone());
    let rem = Character {
        id: REM,
        name: "Rem".to_string(),
        image_url: String::new(),
    };

    wishlist.add(ALICE, &rem).await.expect("add");
    wishlist.add(ALICE, &rem).await.expect("idempotent add");

    let wished = wishlist.list(ALICE).await.unwrap();
    assert_eq!(wished.len(), 1);
    assert_eq!(wished[0].id, REM);

    assert!(wishlist.remove(ALICE, REM).await.unwrap());
    assert!(!wishlist.remove(ALICE, REM).await.unwrap());
    assert!(wishlist.list(ALICE).await.unwrap().is_empty());
}

#[tokio::test]
async fn wishing_for_an_owned_character_is_rejected() {
    let store = MemoryStore::new();
    seed_ownership(&store, ALICE, REM).await;

    let wishlist = Wishlist::new(store.clone());
    let rem = Character {
        id: REM,
        name: "Rem".to_string(),
        image_url: String::new(),
    };

    let error = wishlist.add(ALICE, &rem).await.expect_err("owned");
    assert!(matches!(error, WishlistError::AlreadyOwned { .. }));
    assert!(store.list_wishlist(ALICE).await.unwrap().is_empty());
}
