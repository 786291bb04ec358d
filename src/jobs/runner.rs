//! Job worker loop for feedpulse.
//!
//! Any number of these loops may run, in one process or many; they never
//! coordinate with each other. Correctness comes from the job store's atomic
//! claim, and a worker that dies mid-job is superseded once its claim passes
//! the staleness window. Per-feed failures become row state and a rescheduled
//! retry; the loop itself runs indefinitely.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use super::repository::JobRepository;
use super::types::{Job, JobFilter, JobOutcome, JobPayload, JobType, NewJob};
use crate::backoff::calculate_next_fetch;
use crate::config::{Config, SchedulerConfig, WebSubConfig};
use crate::db::Database;
use crate::feeds::{
    EntryRepository, Feed, FeedFetcher, FeedRepository, MigrationOutcome, MigrationService,
    NewEntry,
};
use crate::websub::{build_hub_client, WebSubManager};
use crate::Result;

/// A worker that claims and executes jobs until stopped.
pub struct JobRunner {
    db: Arc<Database>,
    scheduler: SchedulerConfig,
    websub: WebSubConfig,
    fetcher: FeedFetcher,
    hub_client: reqwest::Client,
    worker_id: usize,
}

impl JobRunner {
    /// Create a new runner.
    pub fn new(db: Arc<Database>, config: &Config) -> Result<Self> {
        Ok(Self {
            db,
            scheduler: config.scheduler.clone(),
            websub: config.websub.clone(),
            fetcher: FeedFetcher::new()?,
            hub_client: build_hub_client()?,
            worker_id: 0,
        })
    }

    /// Set the worker id used in log fields.
    pub fn with_worker_id(mut self, worker_id: usize) -> Self {
        self.worker_id = worker_id;
        self
    }

    /// Run the worker loop indefinitely.
    ///
    /// Claims again immediately after finishing a job; sleeps for the poll
    /// interval only when the queue has nothing eligible.
    pub async fn run(&self) {
        info!(
            worker_id = self.worker_id,
            "Job worker started (poll interval: {}s)", self.scheduler.poll_interval_secs
        );

        loop {
            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => sleep(Duration::from_secs(self.scheduler.poll_interval_secs)).await,
                Err(e) => {
                    error!(worker_id = self.worker_id, "Worker iteration failed: {}", e);
                    sleep(Duration::from_secs(self.scheduler.poll_interval_secs)).await;
                }
            }
        }
    }

    /// Claim and execute at most one job.
    ///
    /// Returns whether a job was executed. Job-level failures are absorbed
    /// into the job's retry state; only store errors propagate.
    pub async fn run_once(&self) -> Result<bool> {
        let jobs = JobRepository::with_stale_window(self.db.pool(), self.scheduler.claim_stale_secs);

        let job = match jobs.claim(None).await? {
            Some(job) => job,
            None => return Ok(false),
        };

        debug!(
            worker_id = self.worker_id,
            job_id = job.id,
            job_type = %job.job_type(),
            "Claimed job"
        );

        match &job.payload {
            JobPayload::FetchFeed(payload) => self.run_fetch_feed(&job, payload.feed_id).await?,
            JobPayload::RenewSubscriptions(payload) => {
                self.run_renew_subscriptions(&job, payload.hours_before_expiry)
                    .await?
            }
        }

        Ok(true)
    }

    /// Execute a fetch-feed job.
    async fn run_fetch_feed(&self, job: &Job, feed_id: i64) -> Result<()> {
        let jobs = JobRepository::with_stale_window(self.db.pool(), self.scheduler.claim_stale_secs);
        let feeds = FeedRepository::new(self.db.pool());

        let feed = match feeds.get_by_id(feed_id).await? {
            Some(feed) => feed,
            None => {
                warn!(job_id = job.id, feed_id, "Fetch job for missing feed");
                let schedule = calculate_next_fetch(None, job.consecutive_failures + 1, Utc::now());
                jobs.finish(
                    job.id,
                    &JobOutcome::failure(schedule.next_run_at, format!("feed {} not found", feed_id)),
                )
                .await?;
                return Ok(());
            }
        };

        match self.fetcher.fetch(&feed.url).await {
            Ok(outcome) => {
                if let Some(new_url) = &outcome.permanent_redirect {
                    let migration = MigrationService::new(self.db.pool());
                    let result = migration.handle_permanent_redirect(feed.id, new_url).await?;
                    if let MigrationOutcome::Merged { target_feed_id, .. } = result {
                        // The target feed's own job takes over from here; this
                        // job was just disabled by the migration sync.
                        info!(
                            feed_id = feed.id,
                            target_feed_id, "Feed merged after permanent redirect"
                        );
                        let schedule = calculate_next_fetch(None, 0, Utc::now());
                        jobs.finish(job.id, &JobOutcome::success(schedule.next_run_at))
                            .await?;
                        return Ok(());
                    }
                }

                let entries = EntryRepository::new(self.db.pool());
                let mut new_count = 0;
                for entry in &outcome.feed.entries {
                    let mut new_entry = NewEntry::new(feed.id, &entry.guid, &entry.title);
                    if let Some(link) = &entry.link {
                        new_entry = new_entry.with_link(link);
                    }
                    if let Some(published_at) = entry.published_at {
                        new_entry = new_entry.with_published_at(published_at);
                    }
                    if entries.create_or_ignore(&new_entry).await?.is_some() {
                        new_count += 1;
                    }
                }

                feeds
                    .update_discovery(
                        feed.id,
                        outcome.feed.title.as_deref(),
                        outcome.feed.self_url.as_deref(),
                        outcome.feed.hub_url.as_deref(),
                    )
                    .await?;
                feeds.clear_error(feed.id).await?;

                self.sync_push_channel(&feed, outcome.feed.hub_url.as_deref())
                    .await;

                let schedule = calculate_next_fetch(outcome.cache_hints.as_ref(), 0, Utc::now());
                feeds.set_next_fetch_at(feed.id, schedule.next_run_at).await?;
                jobs.finish(job.id, &JobOutcome::success(schedule.next_run_at))
                    .await?;

                info!(
                    worker_id = self.worker_id,
                    feed_id = feed.id,
                    new_entries = new_count,
                    interval = schedule.interval_seconds,
                    reason = schedule.reason.as_str(),
                    "Feed fetched"
                );
            }
            Err(e) => {
                let error = e.to_string();
                warn!(
                    worker_id = self.worker_id,
                    feed_id = feed.id,
                    "Fetch failed: {}",
                    error
                );

                feeds.increment_error(feed.id, &error).await?;
                let schedule = calculate_next_fetch(None, job.consecutive_failures + 1, Utc::now());
                feeds.set_next_fetch_at(feed.id, schedule.next_run_at).await?;
                jobs.finish(job.id, &JobOutcome::failure(schedule.next_run_at, error))
                    .await?;
            }
        }

        Ok(())
    }

    /// Bring the feed's push channel in line with what it advertises.
    ///
    /// Best-effort: a hub problem never fails the fetch that discovered it.
    async fn sync_push_channel(&self, feed: &Feed, advertised_hub: Option<&str>) {
        let manager = WebSubManager::with_client(self.db.pool(), &self.websub, self.hub_client.clone());

        let result = match advertised_hub {
            Some(_) if !feed.push_active => {
                // Re-read the feed so the subscribe sees the freshly
                // discovered hub and self links.
                let feeds = FeedRepository::new(self.db.pool());
                match feeds.get_by_id(feed.id).await {
                    Ok(Some(current)) => manager.subscribe_to_hub(&current).await.map(|_| ()),
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            None if feed.hub_url.is_some() && feed.push_active => {
                manager.deactivate_websub(feed.id).await.map(|_| ())
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            warn!(feed_id = feed.id, "Push channel sync failed: {}", e);
        }
    }

    /// Execute a subscription-renewal job.
    async fn run_renew_subscriptions(&self, job: &Job, hours_before_expiry: i64) -> Result<()> {
        let jobs = JobRepository::with_stale_window(self.db.pool(), self.scheduler.claim_stale_secs);
        let manager = WebSubManager::with_client(self.db.pool(), &self.websub, self.hub_client.clone());

        match manager.renew_expiring_subscriptions(hours_before_expiry).await {
            Ok(report) => {
                debug!(
                    worker_id = self.worker_id,
                    renewed = report.renewed,
                    failed = report.failed,
                    "Renewal job complete"
                );
                let next_run_at =
                    Utc::now() + chrono::Duration::seconds(self.websub.renew_interval_secs);
                jobs.finish(job.id, &JobOutcome::success(next_run_at)).await?;
            }
            Err(e) => {
                let error = e.to_string();
                warn!(worker_id = self.worker_id, "Renewal job failed: {}", error);
                let schedule = calculate_next_fetch(None, job.consecutive_failures + 1, Utc::now());
                jobs.finish(job.id, &JobOutcome::failure(schedule.next_run_at, error))
                    .await?;
            }
        }

        Ok(())
    }
}

/// Make sure the periodic subscription-renewal job exists.
///
/// Called once at startup; the job itself reschedules after every run.
pub async fn ensure_renewal_job(db: &Database, websub: &WebSubConfig) -> Result<()> {
    let jobs = JobRepository::new(db.pool());
    let existing = jobs
        .list(&JobFilter::new().job_type(JobType::RenewSubscriptions).limit(1))
        .await?;
    if existing.is_empty() {
        jobs.create(&NewJob::new(JobPayload::renew_subscriptions(
            websub.renew_window_hours,
        )))
        .await?;
        info!("Created subscription renewal job");
    }
    Ok(())
}

/// Spawn the configured number of worker loops.
pub fn spawn_workers(
    db: Arc<Database>,
    config: &Config,
) -> Result<Vec<tokio::task::JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(config.scheduler.worker_count);
    for worker_id in 0..config.scheduler.worker_count {
        let runner = JobRunner::new(db.clone(), config)?.with_worker_id(worker_id);
        handles.push(tokio::spawn(async move {
            runner.run().await;
        }));
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::{NewFeed, SubscriptionRepository};

    async fn setup() -> (Arc<Database>, JobRunner) {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let runner = JobRunner::new(db.clone(), &Config::default()).unwrap();
        (db, runner)
    }

    #[tokio::test]
    async fn test_run_once_empty_queue() {
        let (_db, runner) = setup().await;
        assert!(!runner.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_failure_backs_off() {
        let (db, runner) = setup().await;
        let feeds = FeedRepository::new(db.pool());
        let jobs = JobRepository::new(db.pool());

        // A host that cannot resolve: the fetch fails, the job retries later
        let feed = feeds
            .create(&NewFeed::new("https://feed.invalid/rss.xml"))
            .await
            .unwrap();
        SubscriptionRepository::new(db.pool())
            .create(1, feed.id, &[])
            .await
            .unwrap();
        let job = jobs.create_or_enable_feed_job(feed.id).await.unwrap();

        assert!(runner.run_once().await.unwrap());

        let finished = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(finished.consecutive_failures, 1);
        assert!(finished.last_error.is_some());
        assert!(finished.running_since.is_none());
        // First failure: 30 minutes out
        assert!(finished.next_run_at > Utc::now() + chrono::Duration::minutes(25));

        let failing = feeds.get_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(failing.consecutive_failures, 1);
        assert!(failing.last_error.is_some());
        assert!(failing.next_fetch_at.is_some());
    }

    #[tokio::test]
    async fn test_fetch_job_for_missing_feed_fails_cleanly() {
        let (db, runner) = setup().await;
        let jobs = JobRepository::new(db.pool());

        let job = jobs
            .create(&NewJob::new(JobPayload::fetch_feed(9999)))
            .await
            .unwrap();

        assert!(runner.run_once().await.unwrap());

        let finished = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(finished.consecutive_failures, 1);
        assert!(finished
            .last_error
            .as_deref()
            .unwrap()
            .contains("not found"));
    }

    #[tokio::test]
    async fn test_renew_job_reschedules_itself() {
        let (db, runner) = setup().await;
        let jobs = JobRepository::new(db.pool());

        ensure_renewal_job(&db, &Config::default().websub).await.unwrap();
        let job = jobs
            .list(&JobFilter::new().job_type(JobType::RenewSubscriptions))
            .await
            .unwrap()
            .remove(0);

        assert!(runner.run_once().await.unwrap());

        let finished = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(finished.consecutive_failures, 0);
        assert!(finished.next_run_at > Utc::now() + chrono::Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_ensure_renewal_job_is_idempotent() {
        let (db, _runner) = setup().await;
        let websub = Config::default().websub;

        ensure_renewal_job(&db, &websub).await.unwrap();
        ensure_renewal_job(&db, &websub).await.unwrap();

        let renewals = JobRepository::new(db.pool())
            .list(&JobFilter::new().job_type(JobType::RenewSubscriptions))
            .await
            .unwrap();
        assert_eq!(renewals.len(), 1);
    }
}
