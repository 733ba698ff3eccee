//! guild membership indexing: a staleness-bounded snapshot of an external
//! group's member list, maintained by a single-flight background worker.
//!
//! the job row in storage is the only arbitration point; callers in
//! separate processes sharing the store coordinate through it, so no
//! in-process lock would be enough. the protocol is time-based, not
//! lease-based: a crashed worker's job is reclaimed only after
//! [`STALE_JOB`] elapses.

use std::sync::Arc;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};

use crate::{
    model::{GuildId, IndexingJob, IndexingStatus, UserId},
    storage::{StorageError, Store, StoreTx, rollback_quietly},
    tasks::Spawner,
};

/// a completed snapshot older than this is due for re-indexing.
pub const MAX_AGE: Duration = Duration::days(7);
/// an in-progress job older than this is presumed crashed and restartable.
pub const STALE_JOB: Duration = Duration::minutes(10);
/// member-listing page size; a shorter page ends the pagination.
pub const PAGE_SIZE: usize = 1000;

const MEMBER_FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("member listing failed: {0}")]
    MemberSource(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// one page of the external member listing.
#[async_trait]
pub trait MemberSource: Send + Sync {
    /// at most [`PAGE_SIZE`] member ids, ascending, starting after `after`
    /// when given.
    async fn members_page(
        &self,
        guild: GuildId,
        after: Option<UserId>,
    ) -> IndexResult<Vec<UserId>>;
}

pub struct Indexer<S, M> {
    store: S,
    members: Arc<M>,
    spawner: Spawner,
}

impl<S, M> Indexer<S, M>
where
    S: Store + Clone + 'static,
    M: MemberSource + 'static,
{
    pub fn new(store: S, members: M, spawner: Spawner) -> Self {
        Indexer {
            store,
            members: Arc::new(members),
            spawner,
        }
    }

    /// ensures the guild's snapshot is fresh enough, launching at most one
    /// detached worker.
    ///
    /// the cheap lock-free read answers the common case (completed and
    /// fresh). everything else re-reads the job row inside a transaction,
    /// which closes the race where two callers pass the first check
    /// concurrently: only the one whose transaction still sees a startable
    /// state flips the row to `in_progress` and launches the worker.
    pub async fn index_if_needed(&self, guild: GuildId) -> IndexResult<()> {
        let now = OffsetDateTime::now_utc();
        if let Some(job) = self.store.indexing_job(guild).await? {
            if job.status == IndexingStatus::Completed && now - job.updated_at <= MAX_AGE {
                return Ok(());
            }
        }

        let mut tx = self.store.begin().await?;
        let should_start = match tx.indexing_job(guild).await {
            Ok(job) => should_start(job.as_ref(), now),
            Err(error) => {
                rollback_quietly(tx).await;
                return Err(error.into());
            }
        };

        if should_start {
            if let Err(error) = tx.start_indexing_job(guild, now).await {
                rollback_quietly(tx).await;
                return Err(error.into());
            }
        }
        tx.commit().await?;

        if should_start {
            self.spawn_worker(guild);
        }
        Ok(())
    }

    fn spawn_worker(&self, guild: GuildId) {
        let store = self.store.clone();
        let members = self.members.clone();
        tracing::debug!(%guild, "launching guild indexing worker");
        self.spawner.spawn(async move {
            if let Err(error) = index_guild(&store, members.as_ref(), guild).await {
                // the job row stays in_progress; it becomes reclaimable
                // once STALE_JOB elapses
                tracing::warn!(%error, %guild, "guild indexing failed");
            }
        });
    }
}

/// scheduling decision against the transactionally re-read job row.
fn should_start(job: Option<&IndexingJob>, now: OffsetDateTime) -> bool {
    match job {
        None => true,
        Some(job) => match job.status {
            IndexingStatus::Completed => now - job.updated_at > MAX_AGE,
            IndexingStatus::InProgress => now - job.updated_at >= STALE_JOB,
        },
    }
}

/// the worker: pages the full member list, replaces the guild's snapshot
/// wholesale, and marks the job completed. runs detached from whatever
/// request triggered it.
pub async fn index_guild<S, M>(store: &S, members: &M, guild: GuildId) -> IndexResult<()>
where
    S: Store,
    M: MemberSource + ?Sized,
{
    let ids = fetch_all_members(members, guild).await?;

    store.delete_members_not_in(guild, &ids).await?;
    if !ids.is_empty() {
        store
            .upsert_members(guild, &ids, OffsetDateTime::now_utc())
            .await?;
    }
    store
        .complete_indexing_job(guild, OffsetDateTime::now_utc())
        .await?;

    tracing::info!(%guild, members = ids.len(), "guild snapshot replaced");
    Ok(())
}

async fn fetch_all_members<M>(source: &M, guild: GuildId) -> IndexResult<Vec<UserId>>
where
    M: MemberSource + ?Sized,
{
    let mut all = Vec::new();
    let mut after = None;

    loop {
        let page = source.members_page(guild, after).await?;
        if page.is_empty() {
            break;
        }
        let short_page = page.len() < PAGE_SIZE;
        after = page.last().copied();
        all.extend(page);
        if short_page {
            break;
        }
    }

    Ok(all)
}

/// member listing over a Discord-style HTTP endpoint:
/// `GET {base}/guilds/{id}/members?limit=1000[&after=<last id>]` with bot
/// token auth.
pub struct HttpMemberSource {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
}

impl HttpMemberSource {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self::with_base_url("https://discord.com/api/v10", bot_token)
    }

    pub fn with_base_url(base_url: impl Into<String>, bot_token: impl Into<String>) -> Self {
        HttpMemberSource {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            bot_token: bot_token.into(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct MemberRecord {
    user: MemberUser,
}

#[derive(Debug, serde::Deserialize)]
struct MemberUser {
    id: String,
}

fn member_source_error(
    error: impl std::error::Error + Send + Sync + 'static,
) -> IndexError {
    IndexError::MemberSource(Box::new(error))
}

#[async_trait]
impl MemberSource for HttpMemberSource {
    async fn members_page(
        &self,
        guild: GuildId,
        after: Option<UserId>,
    ) -> IndexResult<Vec<UserId>> {
        let mut url = format!(
            "{}/guilds/{}/members?limit={}",
            self.base_url, guild, PAGE_SIZE
        );
        if let Some(after) = after {
            url = format!("{url}&after={after}");
        }

        let records: Vec<MemberRecord> = self
            .client
            .get(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bot {}", self.bot_token),
            )
            .timeout(MEMBER_FETCH_TIMEOUT)
            .send()
            .await
            .map_err(member_source_error)?
            .error_for_status()
            .map_err(member_source_error)?
            .json()
            .await
            .map_err(member_source_error)?;

        records
            .into_iter()
            .map(|record| {
                record
                    .user
                    .id
                    .parse::<u64>()
                    .map(UserId)
                    .map_err(member_source_error)
            })
            .collect()
    }
}
