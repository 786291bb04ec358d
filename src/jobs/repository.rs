//! Job store repository for feedpulse.
//!
//! A durable queue over the relational store. Mutual exclusion between
//! concurrent workers comes from the claim statement itself, not from any
//! in-process lock, so any number of worker processes can share one store.

use chrono::{DateTime, Duration, Utc};
#[cfg(feature = "postgres")]
use sqlx::QueryBuilder;
#[cfg(feature = "sqlite")]
use sqlx::QueryBuilder;

use super::types::{
    Job, JobFilter, JobOutcome, JobPayload, JobType, NewJob, DEFAULT_CLAIM_STALE_SECS,
};
use crate::db::{format_datetime, parse_datetime, DbPool, SQL_FALSE, SQL_NOW, SQL_TRUE};
use crate::{FeedPulseError, Result};

/// Row type for a job from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: i64,
    job_type: String,
    payload: String,
    enabled: bool,
    next_run_at: String,
    running_since: Option<String>,
    last_run_at: Option<String>,
    last_error: Option<String>,
    consecutive_failures: i32,
    created_at: String,
    updated_at: String,
}

impl TryFrom<JobRow> for Job {
    type Error = FeedPulseError;

    fn try_from(row: JobRow) -> Result<Job> {
        let job_type = JobType::parse(&row.job_type)
            .ok_or_else(|| FeedPulseError::Database(format!("unknown job type: {}", row.job_type)))?;
        let payload = JobPayload::from_parts(job_type, &row.payload)?;

        Ok(Job {
            id: row.id,
            payload,
            enabled: row.enabled,
            next_run_at: parse_datetime(&row.next_run_at).unwrap_or_else(Utc::now),
            running_since: row.running_since.and_then(|s| parse_datetime(&s)),
            last_run_at: row.last_run_at.and_then(|s| parse_datetime(&s)),
            last_error: row.last_error,
            consecutive_failures: row.consecutive_failures,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        })
    }
}

const JOB_COLUMNS: &str = "id, job_type, payload, enabled, next_run_at, running_since, \
     last_run_at, last_error, consecutive_failures, created_at, updated_at";

/// Repository for job queue operations.
pub struct JobRepository<'a> {
    pool: &'a DbPool,
    stale_secs: i64,
}

impl<'a> JobRepository<'a> {
    /// Create a new repository with the default claim staleness window.
    pub fn new(pool: &'a DbPool) -> Self {
        Self {
            pool,
            stale_secs: DEFAULT_CLAIM_STALE_SECS,
        }
    }

    /// Create a repository with a custom claim staleness window.
    pub fn with_stale_window(pool: &'a DbPool, stale_secs: i64) -> Self {
        Self { pool, stale_secs }
    }

    /// Create a new job.
    ///
    /// No deduplication is applied here; callers wanting create-or-enable
    /// semantics per feed use [`JobRepository::create_or_enable_feed_job`].
    pub async fn create(&self, job: &NewJob) -> Result<Job> {
        let next_run_at = format_datetime(job.next_run_at.unwrap_or_else(Utc::now));
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (job_type, payload, feed_id, enabled, next_run_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(job.payload.job_type().as_str())
        .bind(job.payload.to_json()?)
        .bind(job.payload.feed_id())
        .bind(job.enabled)
        .bind(next_run_at)
        .fetch_one(self.pool)
        .await
        .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| FeedPulseError::NotFound("job".into()))
    }

    /// Get a job by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Job>> {
        let query = format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS);
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        row.map(Job::try_from).transpose()
    }

    /// Claim the oldest eligible job, if any.
    ///
    /// Eligible means enabled, due, and either unclaimed or held by a claim
    /// older than the staleness window. The claim is a single
    /// compare-and-swap statement: two racing callers may select the same
    /// row but only one update applies, the other comes back empty.
    #[cfg(feature = "sqlite")]
    pub async fn claim(&self, types: Option<&[JobType]>) -> Result<Option<Job>> {
        let now = Utc::now();
        let now_s = format_datetime(now);
        let cutoff = format_datetime(now - Duration::seconds(self.stale_secs));

        let mut query: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE jobs SET running_since = ");
        query.push_bind(&now_s);
        query.push(", updated_at = ");
        query.push_bind(&now_s);
        query.push(" WHERE id = (SELECT id FROM jobs WHERE enabled = ");
        query.push(SQL_TRUE);
        query.push(" AND next_run_at <= ");
        query.push_bind(&now_s);
        query.push(" AND (running_since IS NULL OR running_since <= ");
        query.push_bind(&cutoff);
        query.push(")");
        if let Some(types) = types {
            query.push(" AND job_type IN (");
            let mut separated = query.separated(", ");
            for job_type in types {
                separated.push_bind(job_type.as_str());
            }
            query.push(")");
        }
        query.push(" ORDER BY next_run_at ASC, id ASC LIMIT 1)");
        query.push(" AND (running_since IS NULL OR running_since <= ");
        query.push_bind(&cutoff);
        query.push(")");
        query.push(format!(" RETURNING {}", JOB_COLUMNS));

        let row = query
            .build_query_as::<JobRow>()
            .fetch_optional(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        row.map(Job::try_from).transpose()
    }

    /// Claim the oldest eligible job, if any.
    ///
    /// The inner select uses `FOR UPDATE SKIP LOCKED` so concurrent claimers
    /// never block on, or double-claim, the same row.
    #[cfg(feature = "postgres")]
    pub async fn claim(&self, types: Option<&[JobType]>) -> Result<Option<Job>> {
        let now = Utc::now();
        let now_s = format_datetime(now);
        let cutoff = format_datetime(now - Duration::seconds(self.stale_secs));

        let mut query: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("UPDATE jobs SET running_since = ");
        query.push_bind(&now_s);
        query.push(", updated_at = ");
        query.push_bind(&now_s);
        query.push(" WHERE id = (SELECT id FROM jobs WHERE enabled = ");
        query.push(SQL_TRUE);
        query.push(" AND next_run_at <= ");
        query.push_bind(&now_s);
        query.push(" AND (running_since IS NULL OR running_since <= ");
        query.push_bind(&cutoff);
        query.push(")");
        if let Some(types) = types {
            query.push(" AND job_type IN (");
            let mut separated = query.separated(", ");
            for job_type in types {
                separated.push_bind(job_type.as_str());
            }
            query.push(")");
        }
        query.push(" ORDER BY next_run_at ASC, id ASC LIMIT 1 FOR UPDATE SKIP LOCKED)");
        query.push(format!(" RETURNING {}", JOB_COLUMNS));

        let row = query
            .build_query_as::<JobRow>()
            .fetch_optional(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        row.map(Job::try_from).transpose()
    }

    /// Record the result of a claimed job's run.
    ///
    /// Clears the claim and sets `last_run_at`; success resets the failure
    /// counter and error, failure increments and records them. Finishing a
    /// job id that does not exist is a caller bug and returns an error.
    pub async fn finish(&self, id: i64, outcome: &JobOutcome) -> Result<Job> {
        let now_s = format_datetime(Utc::now());
        let next_run_at = format_datetime(outcome.next_run_at);

        let rows_affected = if outcome.success {
            sqlx::query(
                r#"
                UPDATE jobs
                SET running_since = NULL,
                    last_run_at = $1,
                    next_run_at = $2,
                    consecutive_failures = 0,
                    last_error = NULL,
                    updated_at = $3
                WHERE id = $4
                "#,
            )
            .bind(&now_s)
            .bind(&next_run_at)
            .bind(&now_s)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET running_since = NULL,
                    last_run_at = $1,
                    next_run_at = $2,
                    consecutive_failures = consecutive_failures + 1,
                    last_error = $3,
                    updated_at = $4
                WHERE id = $5
                "#,
            )
            .bind(&now_s)
            .bind(&next_run_at)
            .bind(&outcome.error)
            .bind(&now_s)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?
            .rows_affected()
        };

        if rows_affected == 0 {
            return Err(FeedPulseError::NotFound("job".into()));
        }

        self.get_by_id(id)
            .await?
            .ok_or_else(|| FeedPulseError::NotFound("job".into()))
    }

    /// List jobs matching a filter. Read-only.
    #[cfg(feature = "sqlite")]
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut query: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM jobs WHERE 1 = 1", JOB_COLUMNS));
        if let Some(enabled) = filter.enabled {
            query.push(" AND enabled = ");
            query.push(if enabled { SQL_TRUE } else { SQL_FALSE });
        }
        if let Some(job_type) = filter.job_type {
            query.push(" AND job_type = ");
            query.push_bind(job_type.as_str());
        }
        query.push(" ORDER BY next_run_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ");
            query.push_bind(limit as i64);
        }

        let rows = query
            .build_query_as::<JobRow>()
            .fetch_all(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        rows.into_iter().map(Job::try_from).collect()
    }

    /// List jobs matching a filter. Read-only.
    #[cfg(feature = "postgres")]
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut query: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM jobs WHERE 1 = 1", JOB_COLUMNS));
        if let Some(enabled) = filter.enabled {
            query.push(" AND enabled = ");
            query.push(if enabled { SQL_TRUE } else { SQL_FALSE });
        }
        if let Some(job_type) = filter.job_type {
            query.push(" AND job_type = ");
            query.push_bind(job_type.as_str());
        }
        query.push(" ORDER BY next_run_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ");
            query.push_bind(limit as i64);
        }

        let rows = query
            .build_query_as::<JobRow>()
            .fetch_all(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        rows.into_iter().map(Job::try_from).collect()
    }

    /// Get the fetch job for a feed, if one exists.
    pub async fn get_feed_job(&self, feed_id: i64) -> Result<Option<Job>> {
        let query = format!(
            "SELECT {} FROM jobs WHERE job_type = 'fetch_feed' AND feed_id = $1",
            JOB_COLUMNS
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(feed_id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        row.map(Job::try_from).transpose()
    }

    /// Ensure a feed has exactly one enabled fetch job.
    ///
    /// Creates the job when none exists; re-enables (and makes due now) a
    /// disabled one. Never creates a duplicate.
    pub async fn create_or_enable_feed_job(&self, feed_id: i64) -> Result<Job> {
        if let Some(job) = self.get_feed_job(feed_id).await? {
            if !job.enabled {
                self.enable_feed_job(feed_id).await?;
                return self
                    .get_feed_job(feed_id)
                    .await?
                    .ok_or_else(|| FeedPulseError::NotFound("job".into()));
            }
            return Ok(job);
        }

        self.create(&NewJob::new(JobPayload::fetch_feed(feed_id)))
            .await
    }

    /// Re-enable a feed's fetch job and make it due now.
    pub async fn enable_feed_job(&self, feed_id: i64) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE jobs
            SET enabled = {}, next_run_at = {}, updated_at = {}
            WHERE job_type = 'fetch_feed' AND feed_id = $1
            "#,
            SQL_TRUE, SQL_NOW, SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(feed_id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Align a feed job's enabled state with real demand.
    ///
    /// The job is enabled iff the feed has at least one active subscription.
    /// Called after every subscribe, unsubscribe and migration. Returns the
    /// resulting enabled state, or false when the feed has no job.
    pub async fn sync_feed_job_enabled(&self, feed_id: i64) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE jobs
            SET enabled = CASE
                    WHEN (SELECT COUNT(*) FROM subscriptions
                          WHERE feed_id = $1 AND unsubscribed_at IS NULL) > 0
                    THEN {}
                    ELSE {}
                END,
                updated_at = {}
            WHERE job_type = 'fetch_feed' AND feed_id = $2
            "#,
            SQL_TRUE, SQL_FALSE, SQL_NOW
        );
        sqlx::query(&query)
            .bind(feed_id)
            .bind(feed_id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(self
            .get_feed_job(feed_id)
            .await?
            .map(|job| job.enabled)
            .unwrap_or(false))
    }

    /// Reschedule a feed's fetch job.
    ///
    /// Used both by the scheduler after a fetch and by the push notification
    /// path to request an immediate out-of-band fetch.
    pub async fn update_feed_job_next_run(
        &self,
        feed_id: i64,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        let query = format!(
            "UPDATE jobs SET next_run_at = $1, updated_at = {} WHERE job_type = 'fetch_feed' AND feed_id = $2",
            SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(format_datetime(next_run_at))
            .bind(feed_id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
