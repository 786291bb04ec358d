//! Push subscription repository for feedpulse.

use chrono::{DateTime, Utc};

use super::types::{NewPushSubscription, PushSubscription, PushSubscriptionState};
use crate::db::{format_datetime, parse_datetime, DbPool, SQL_NOW};
use crate::{FeedPulseError, Result};

/// Row type for a push subscription from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct PushSubscriptionRow {
    id: i64,
    feed_id: i64,
    hub_url: String,
    topic_url: String,
    callback_secret: String,
    state: String,
    lease_seconds: Option<i64>,
    expires_at: Option<String>,
    last_challenge_at: Option<String>,
    last_error: Option<String>,
    unsubscribe_requested_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PushSubscriptionRow> for PushSubscription {
    type Error = FeedPulseError;

    fn try_from(row: PushSubscriptionRow) -> Result<PushSubscription> {
        let state = PushSubscriptionState::parse(&row.state).ok_or_else(|| {
            FeedPulseError::Database(format!("unknown push subscription state: {}", row.state))
        })?;

        Ok(PushSubscription {
            id: row.id,
            feed_id: row.feed_id,
            hub_url: row.hub_url,
            topic_url: row.topic_url,
            callback_secret: row.callback_secret,
            state,
            lease_seconds: row.lease_seconds,
            expires_at: row.expires_at.and_then(|s| parse_datetime(&s)),
            last_challenge_at: row.last_challenge_at.and_then(|s| parse_datetime(&s)),
            last_error: row.last_error,
            unsubscribe_requested_at: row.unsubscribe_requested_at.and_then(|s| parse_datetime(&s)),
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        })
    }
}

const PUSH_SUBSCRIPTION_COLUMNS: &str = "id, feed_id, hub_url, topic_url, callback_secret, \
     state, lease_seconds, expires_at, last_challenge_at, last_error, \
     unsubscribe_requested_at, created_at, updated_at";

/// Repository for push subscription state.
pub struct PushSubscriptionRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> PushSubscriptionRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create or reset the pending row for a feed+hub pair.
    ///
    /// A repeat subscribe attempt re-uses the existing row: the secret is
    /// replaced, the error cleared and any unsubscribe request withdrawn.
    pub async fn upsert_pending(&self, sub: &NewPushSubscription) -> Result<PushSubscription> {
        let query = format!(
            r#"
            INSERT INTO push_subscriptions (feed_id, hub_url, topic_url, callback_secret, state)
            VALUES ($1, $2, $3, $4, 'pending')
            ON CONFLICT(feed_id, hub_url) DO UPDATE SET
                topic_url = excluded.topic_url,
                callback_secret = excluded.callback_secret,
                state = 'pending',
                last_error = NULL,
                unsubscribe_requested_at = NULL,
                updated_at = {}
            RETURNING id
            "#,
            SQL_NOW
        );
        let id: i64 = sqlx::query_scalar(&query)
            .bind(sub.feed_id)
            .bind(&sub.hub_url)
            .bind(&sub.topic_url)
            .bind(&sub.callback_secret)
            .fetch_one(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| FeedPulseError::NotFound("push subscription".into()))
    }

    /// Get a push subscription by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<PushSubscription>> {
        let query = format!(
            "SELECT {} FROM push_subscriptions WHERE id = $1",
            PUSH_SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, PushSubscriptionRow>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        row.map(PushSubscription::try_from).transpose()
    }

    /// Get the most recent push subscription for a feed, in any state.
    pub async fn get_by_feed(&self, feed_id: i64) -> Result<Option<PushSubscription>> {
        let query = format!(
            r#"
            SELECT {}
            FROM push_subscriptions
            WHERE feed_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
            PUSH_SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, PushSubscriptionRow>(&query)
            .bind(feed_id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        row.map(PushSubscription::try_from).transpose()
    }

    /// Get the active push subscription for a feed, if any.
    ///
    /// Pending and unsubscribed rows are never returned; notifications are
    /// only ever checked against an active registration.
    pub async fn get_active_by_feed(&self, feed_id: i64) -> Result<Option<PushSubscription>> {
        let query = format!(
            r#"
            SELECT {}
            FROM push_subscriptions
            WHERE feed_id = $1 AND state = 'active'
            ORDER BY id DESC
            LIMIT 1
            "#,
            PUSH_SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, PushSubscriptionRow>(&query)
            .bind(feed_id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        row.map(PushSubscription::try_from).transpose()
    }

    /// Mark a subscription active after a successful verification challenge.
    pub async fn activate(
        &self,
        id: i64,
        lease_seconds: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE push_subscriptions
            SET state = 'active',
                lease_seconds = $1,
                expires_at = $2,
                last_challenge_at = {},
                last_error = NULL,
                updated_at = {}
            WHERE id = $3
            "#,
            SQL_NOW, SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(lease_seconds)
            .bind(format_datetime(expires_at))
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a subscription unsubscribed.
    ///
    /// When `error` is given it replaces `last_error`; otherwise any error
    /// recorded earlier (for example by a failed hub request) is kept.
    pub async fn mark_unsubscribed(&self, id: i64, error: Option<&str>) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE push_subscriptions
            SET state = 'unsubscribed',
                last_error = COALESCE($1, last_error),
                updated_at = {}
            WHERE id = $2
            "#,
            SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(error)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Record an error from a subscribe attempt.
    pub async fn set_error(&self, id: i64, error: &str) -> Result<bool> {
        let query = format!(
            "UPDATE push_subscriptions SET last_error = $1, updated_at = {} WHERE id = $2",
            SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(error)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Record that we asked the hub (or an operator) to end this subscription.
    pub async fn set_unsubscribe_requested(&self, id: i64) -> Result<bool> {
        let query = format!(
            "UPDATE push_subscriptions SET unsubscribe_requested_at = {}, updated_at = {} WHERE id = $1",
            SQL_NOW, SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// List active subscriptions whose lease expires before the cutoff.
    pub async fn list_active_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PushSubscription>> {
        let query = format!(
            r#"
            SELECT {}
            FROM push_subscriptions
            WHERE state = 'active' AND expires_at IS NOT NULL AND expires_at <= $1
            ORDER BY expires_at ASC, id ASC
            "#,
            PUSH_SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, PushSubscriptionRow>(&query)
            .bind(format_datetime(cutoff))
            .fetch_all(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        rows.into_iter().map(PushSubscription::try_from).collect()
    }
}
