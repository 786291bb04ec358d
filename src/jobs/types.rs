//! Job queue types for feedpulse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FeedPulseError, Result};

/// Default seconds after which an unfinished claim is presumed abandoned.
///
/// A worker that dies mid-job leaves `running_since` set; once the claim is
/// older than this window any other worker may take the job over.
pub const DEFAULT_CLAIM_STALE_SECS: i64 = 5 * 60;

/// The kind of work a job represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    /// Fetch one feed and store its entries.
    FetchFeed,
    /// Renew push subscriptions nearing lease expiry.
    RenewSubscriptions,
}

impl JobType {
    /// Stable string form for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FetchFeed => "fetch_feed",
            JobType::RenewSubscriptions => "renew_subscriptions",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Option<JobType> {
        match s {
            "fetch_feed" => Some(JobType::FetchFeed),
            "renew_subscriptions" => Some(JobType::RenewSubscriptions),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload for a fetch-feed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchFeedPayload {
    /// Feed to fetch.
    pub feed_id: i64,
}

/// Payload for a subscription-renewal job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenewSubscriptionsPayload {
    /// Renew subscriptions expiring within this many hours.
    pub hours_before_expiry: i64,
}

/// A job's typed payload, keyed by job type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    /// Fetch one feed.
    FetchFeed(FetchFeedPayload),
    /// Renew expiring push subscriptions.
    RenewSubscriptions(RenewSubscriptionsPayload),
}

impl JobPayload {
    /// Payload for fetching the given feed.
    pub fn fetch_feed(feed_id: i64) -> Self {
        JobPayload::FetchFeed(FetchFeedPayload { feed_id })
    }

    /// Payload for renewing subscriptions expiring within the window.
    pub fn renew_subscriptions(hours_before_expiry: i64) -> Self {
        JobPayload::RenewSubscriptions(RenewSubscriptionsPayload {
            hours_before_expiry,
        })
    }

    /// The job type this payload belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::FetchFeed(_) => JobType::FetchFeed,
            JobPayload::RenewSubscriptions(_) => JobType::RenewSubscriptions,
        }
    }

    /// The feed this payload targets, for fetch-feed jobs.
    pub fn feed_id(&self) -> Option<i64> {
        match self {
            JobPayload::FetchFeed(p) => Some(p.feed_id),
            JobPayload::RenewSubscriptions(_) => None,
        }
    }

    /// Serialize the payload body to JSON for storage.
    pub fn to_json(&self) -> Result<String> {
        let json = match self {
            JobPayload::FetchFeed(p) => serde_json::to_string(p),
            JobPayload::RenewSubscriptions(p) => serde_json::to_string(p),
        };
        json.map_err(|e| FeedPulseError::Database(format!("payload serialization: {}", e)))
    }

    /// Deserialize a stored payload body for the given job type.
    pub fn from_parts(job_type: JobType, json: &str) -> Result<Self> {
        let payload = match job_type {
            JobType::FetchFeed => serde_json::from_str(json).map(JobPayload::FetchFeed),
            JobType::RenewSubscriptions => {
                serde_json::from_str(json).map(JobPayload::RenewSubscriptions)
            }
        };
        payload.map_err(|e| {
            FeedPulseError::Database(format!("payload for {} job: {}", job_type, e))
        })
    }
}

/// A unit of scheduled work.
#[derive(Debug, Clone)]
pub struct Job {
    /// Job ID.
    pub id: i64,
    /// Typed payload.
    pub payload: JobPayload,
    /// Whether the job is eligible for claiming at all.
    pub enabled: bool,
    /// When the job next becomes due.
    pub next_run_at: DateTime<Utc>,
    /// Set while a worker holds the claim.
    pub running_since: Option<DateTime<Utc>>,
    /// When the job last finished (success or failure).
    pub last_run_at: Option<DateTime<Utc>>,
    /// Error message from the last failed run.
    pub last_error: Option<String>,
    /// Number of consecutive failed runs.
    pub consecutive_failures: i32,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// The job's type.
    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }
}

/// New job for creation.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Typed payload.
    pub payload: JobPayload,
    /// Whether the job starts enabled.
    pub enabled: bool,
    /// When the job first becomes due; None means immediately.
    pub next_run_at: Option<DateTime<Utc>>,
}

impl NewJob {
    /// Create a new enabled job, due immediately.
    pub fn new(payload: JobPayload) -> Self {
        Self {
            payload,
            enabled: true,
            next_run_at: None,
        }
    }

    /// Set the first due time.
    pub fn with_next_run_at(mut self, next_run_at: DateTime<Utc>) -> Self {
        self.next_run_at = Some(next_run_at);
        self
    }

    /// Create the job disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Result of a finished job run.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// Whether the run succeeded.
    pub success: bool,
    /// When the job should next run.
    pub next_run_at: DateTime<Utc>,
    /// Error message for a failed run.
    pub error: Option<String>,
}

impl JobOutcome {
    /// A successful run, rescheduled for the given time.
    pub fn success(next_run_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            next_run_at,
            error: None,
        }
    }

    /// A failed run, retried at the given time.
    pub fn failure(next_run_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            next_run_at,
            error: Some(error.into()),
        }
    }
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Only jobs with this enabled state.
    pub enabled: Option<bool>,
    /// Only jobs of this type.
    pub job_type: Option<JobType>,
    /// Maximum number of rows returned.
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only enabled (or only disabled) jobs.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Only jobs of the given type.
    pub fn job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    /// Cap the number of returned rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_roundtrip() {
        for job_type in [JobType::FetchFeed, JobType::RenewSubscriptions] {
            assert_eq!(JobType::parse(job_type.as_str()), Some(job_type));
        }
        assert_eq!(JobType::parse("unknown"), None);
    }

    #[test]
    fn test_payload_json_roundtrip() {
        let payload = JobPayload::fetch_feed(42);
        let json = payload.to_json().unwrap();
        let parsed = JobPayload::from_parts(JobType::FetchFeed, &json).unwrap();
        assert_eq!(parsed, payload);
        assert_eq!(parsed.feed_id(), Some(42));

        let payload = JobPayload::renew_subscriptions(24);
        let json = payload.to_json().unwrap();
        let parsed = JobPayload::from_parts(JobType::RenewSubscriptions, &json).unwrap();
        assert_eq!(parsed, payload);
        assert_eq!(parsed.feed_id(), None);
    }

    #[test]
    fn test_payload_type_mismatch_fails() {
        let json = JobPayload::renew_subscriptions(24).to_json().unwrap();
        assert!(JobPayload::from_parts(JobType::FetchFeed, &json).is_err());
    }

    #[test]
    fn test_new_job_builder() {
        let due: DateTime<Utc> = "2025-06-01T00:00:00Z".parse().unwrap();
        let job = NewJob::new(JobPayload::fetch_feed(1)).with_next_run_at(due);
        assert!(job.enabled);
        assert_eq!(job.next_run_at, Some(due));

        let disabled = NewJob::new(JobPayload::fetch_feed(1)).disabled();
        assert!(!disabled.enabled);
    }

    #[test]
    fn test_job_outcome_constructors() {
        let at: DateTime<Utc> = "2025-06-01T00:00:00Z".parse().unwrap();
        let ok = JobOutcome::success(at);
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = JobOutcome::failure(at, "HTTP error: 503");
        assert!(!failed.success);
        assert_eq!(failed.error, Some("HTTP error: 503".to_string()));
    }
}
