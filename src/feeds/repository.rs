//! Feed, subscription and entry repositories for feedpulse.

use chrono::{DateTime, Utc};
#[cfg(feature = "postgres")]
use sqlx::QueryBuilder;
#[cfg(feature = "sqlite")]
use sqlx::QueryBuilder;

use super::types::{Entry, Feed, NewEntry, NewFeed, Subscription, UserEntry};
use crate::db::{format_datetime, parse_datetime, DbPool, SQL_FALSE, SQL_NOW, SQL_TRUE};
use crate::{FeedPulseError, Result};

/// Row type for a feed from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedRow {
    id: i64,
    url: String,
    title: Option<String>,
    self_url: Option<String>,
    hub_url: Option<String>,
    push_active: bool,
    consecutive_failures: i32,
    last_error: Option<String>,
    next_fetch_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: row.id,
            url: row.url,
            title: row.title,
            self_url: row.self_url,
            hub_url: row.hub_url,
            push_active: row.push_active,
            consecutive_failures: row.consecutive_failures,
            last_error: row.last_error,
            next_fetch_at: row.next_fetch_at.and_then(|s| parse_datetime(&s)),
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Row type for a subscription from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SubscriptionRow {
    id: i64,
    user_id: i64,
    feed_id: i64,
    previous_feed_ids: String,
    subscribed_at: String,
    unsubscribed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            id: row.id,
            user_id: row.user_id,
            feed_id: row.feed_id,
            previous_feed_ids: serde_json::from_str(&row.previous_feed_ids).unwrap_or_default(),
            subscribed_at: parse_datetime(&row.subscribed_at).unwrap_or_else(Utc::now),
            unsubscribed_at: row.unsubscribed_at.and_then(|s| parse_datetime(&s)),
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Row type for an entry from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct EntryRow {
    id: i64,
    feed_id: i64,
    guid: String,
    title: String,
    link: Option<String>,
    published_at: Option<String>,
    fetched_at: String,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Entry {
            id: row.id,
            feed_id: row.feed_id,
            guid: row.guid,
            title: row.title,
            link: row.link,
            published_at: row.published_at.and_then(|s| parse_datetime(&s)),
            fetched_at: parse_datetime(&row.fetched_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Row type for per-user entry state from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct UserEntryRow {
    id: i64,
    user_id: i64,
    entry_id: i64,
    is_read: bool,
    is_starred: bool,
    updated_at: String,
}

impl From<UserEntryRow> for UserEntry {
    fn from(row: UserEntryRow) -> Self {
        UserEntry {
            id: row.id,
            user_id: row.user_id,
            entry_id: row.entry_id,
            is_read: row.is_read,
            is_starred: row.is_starred,
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

const FEED_COLUMNS: &str = "id, url, title, self_url, hub_url, push_active, \
     consecutive_failures, last_error, next_fetch_at, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, feed_id, previous_feed_ids, \
     subscribed_at, unsubscribed_at, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, feed_id, guid, title, link, published_at, fetched_at";

/// Repository for feed operations.
pub struct FeedRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FeedRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new feed.
    pub async fn create(&self, feed: &NewFeed) -> Result<Feed> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO feeds (url, title, self_url, hub_url)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.self_url)
        .bind(&feed.hub_url)
        .fetch_one(self.pool)
        .await
        .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| FeedPulseError::NotFound("feed".into()))
    }

    /// Get a feed by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Feed>> {
        let query = format!("SELECT {} FROM feeds WHERE id = $1", FEED_COLUMNS);
        let row = sqlx::query_as::<_, FeedRow>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(row.map(Feed::from))
    }

    /// Get a feed by canonical URL.
    pub async fn get_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let query = format!("SELECT {} FROM feeds WHERE url = $1", FEED_COLUMNS);
        let row = sqlx::query_as::<_, FeedRow>(&query)
            .bind(url)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(row.map(Feed::from))
    }

    /// Update the canonical URL in place (redirect with no existing target).
    pub async fn set_url(&self, id: i64, url: &str) -> Result<bool> {
        let query = format!(
            "UPDATE feeds SET url = $1, updated_at = {} WHERE id = $2",
            SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(url)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Update title and advertised self/hub links discovered during a fetch.
    pub async fn update_discovery(
        &self,
        id: i64,
        title: Option<&str>,
        self_url: Option<&str>,
        hub_url: Option<&str>,
    ) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE feeds
            SET title = COALESCE($1, title),
                self_url = $2,
                hub_url = $3,
                updated_at = {}
            WHERE id = $4
            "#,
            SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(title)
            .bind(self_url)
            .bind(hub_url)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Set whether a push channel is active for this feed.
    pub async fn set_push_active(&self, id: i64, active: bool) -> Result<bool> {
        let query = format!(
            "UPDATE feeds SET push_active = $1, updated_at = {} WHERE id = $2",
            SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(active)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the next scheduled fetch time.
    pub async fn set_next_fetch_at(&self, id: i64, next_fetch_at: DateTime<Utc>) -> Result<bool> {
        let query = format!(
            "UPDATE feeds SET next_fetch_at = $1, updated_at = {} WHERE id = $2",
            SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(format_datetime(next_fetch_at))
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Increment the failure counter and record the error message.
    pub async fn increment_error(&self, id: i64, error: &str) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE feeds
            SET consecutive_failures = consecutive_failures + 1,
                last_error = $1,
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

    /// Reset the failure counter and clear the error message.
    pub async fn clear_error(&self, id: i64) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE feeds
            SET consecutive_failures = 0,
                last_error = NULL,
                updated_at = {}
            WHERE id = $1
            "#,
            SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Count all feeds.
    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds")
            .fetch_one(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(count.0)
    }
}

/// Repository for subscription operations.
pub struct SubscriptionRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> SubscriptionRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new active subscription.
    pub async fn create(
        &self,
        user_id: i64,
        feed_id: i64,
        previous_feed_ids: &[i64],
    ) -> Result<Subscription> {
        let previous = serde_json::to_string(previous_feed_ids)
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO subscriptions (user_id, feed_id, previous_feed_ids)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(previous)
        .fetch_one(self.pool)
        .await
        .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| FeedPulseError::NotFound("subscription".into()))
    }

    /// Get a subscription by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Subscription>> {
        let query = format!(
            "SELECT {} FROM subscriptions WHERE id = $1",
            SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(row.map(Subscription::from))
    }

    /// Get the user's subscription to a feed, active or not.
    ///
    /// An active row wins over ended ones; among ended rows the most recent
    /// is returned.
    pub async fn get_by_user_feed(&self, user_id: i64, feed_id: i64) -> Result<Option<Subscription>> {
        let query = format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE user_id = $1 AND feed_id = $2
            ORDER BY (unsubscribed_at IS NULL) DESC, id DESC
            LIMIT 1
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(user_id)
            .bind(feed_id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(row.map(Subscription::from))
    }

    /// List all active subscriptions to a feed.
    pub async fn list_active_by_feed(&self, feed_id: i64) -> Result<Vec<Subscription>> {
        let query = format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE feed_id = $1 AND unsubscribed_at IS NULL
            ORDER BY id ASC
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(feed_id)
            .fetch_all(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    /// Count active subscriptions to a feed.
    pub async fn count_active_by_feed(&self, feed_id: i64) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM subscriptions WHERE feed_id = $1 AND unsubscribed_at IS NULL",
        )
        .bind(feed_id)
        .fetch_one(self.pool)
        .await
        .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(count.0)
    }

    /// Mark a subscription as ended. The row is kept.
    pub async fn unsubscribe(&self, id: i64) -> Result<bool> {
        let query = format!(
            "UPDATE subscriptions SET unsubscribed_at = {}, updated_at = {} WHERE id = $1 AND unsubscribed_at IS NULL",
            SQL_NOW, SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Reactivate an ended subscription.
    ///
    /// Clears `unsubscribed_at` and resets `subscribed_at` to now.
    pub async fn reactivate(&self, id: i64) -> Result<bool> {
        let query = format!(
            "UPDATE subscriptions SET unsubscribed_at = NULL, subscribed_at = {}, updated_at = {} WHERE id = $1",
            SQL_NOW, SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Append a feed id to a subscription's migration history.
    pub async fn append_previous_feed_id(&self, id: i64, old_feed_id: i64) -> Result<bool> {
        let sub = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| FeedPulseError::NotFound("subscription".into()))?;

        let mut previous = sub.previous_feed_ids;
        previous.push(old_feed_id);
        let previous = serde_json::to_string(&previous)
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        let query = format!(
            "UPDATE subscriptions SET previous_feed_ids = $1, updated_at = {} WHERE id = $2",
            SQL_NOW
        );
        let result = sqlx::query(&query)
            .bind(previous)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

/// Repository for entry operations.
pub struct EntryRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> EntryRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new entry, ignoring if duplicate (same feed_id + guid).
    pub async fn create_or_ignore(&self, entry: &NewEntry) -> Result<Option<i64>> {
        let published_at = entry.published_at.map(format_datetime);

        let result: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO entries (feed_id, guid, title, link, published_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (feed_id, guid) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(entry.feed_id)
        .bind(&entry.guid)
        .bind(&entry.title)
        .bind(&entry.link)
        .bind(&published_at)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(result.map(|(id,)| id))
    }

    /// Get an entry by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Entry>> {
        let query = format!("SELECT {} FROM entries WHERE id = $1", ENTRY_COLUMNS);
        let row = sqlx::query_as::<_, EntryRow>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(row.map(Entry::from))
    }

    /// List entries for a feed (newest first).
    pub async fn list_by_feed(&self, feed_id: i64, limit: usize) -> Result<Vec<Entry>> {
        let query = format!(
            r#"
            SELECT {}
            FROM entries
            WHERE feed_id = $1
            ORDER BY COALESCE(published_at, fetched_at) DESC, id DESC
            LIMIT $2
            "#,
            ENTRY_COLUMNS
        );
        let rows = sqlx::query_as::<_, EntryRow>(&query)
            .bind(feed_id)
            .bind(limit as i64)
            .fetch_all(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    /// List entries visible through any of the given feed ids (newest first).
    ///
    /// This is the read-time view behind a migrated subscription: the current
    /// feed plus every previous feed id.
    #[cfg(feature = "sqlite")]
    pub async fn list_for_feeds(&self, feed_ids: &[i64], limit: usize) -> Result<Vec<Entry>> {
        if feed_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM entries WHERE feed_id IN (",
            ENTRY_COLUMNS
        ));
        let mut separated = query.separated(", ");
        for feed_id in feed_ids {
            separated.push_bind(feed_id);
        }
        query.push(") ORDER BY COALESCE(published_at, fetched_at) DESC, id DESC LIMIT ");
        query.push_bind(limit as i64);

        let rows = query
            .build_query_as::<EntryRow>()
            .fetch_all(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    /// List entries visible through any of the given feed ids (newest first).
    #[cfg(feature = "postgres")]
    pub async fn list_for_feeds(&self, feed_ids: &[i64], limit: usize) -> Result<Vec<Entry>> {
        if feed_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM entries WHERE feed_id IN (",
            ENTRY_COLUMNS
        ));
        let mut separated = query.separated(", ");
        for feed_id in feed_ids {
            separated.push_bind(feed_id);
        }
        query.push(") ORDER BY COALESCE(published_at, fetched_at) DESC, id DESC LIMIT ");
        query.push_bind(limit as i64);

        let rows = query
            .build_query_as::<EntryRow>()
            .fetch_all(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    /// Count entries for a feed.
    pub async fn count_by_feed(&self, feed_id: i64) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries WHERE feed_id = $1")
            .bind(feed_id)
            .fetch_one(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(count.0)
    }
}

/// Repository for per-user entry state.
pub struct UserEntryRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> UserEntryRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Get the read/starred state for a user and entry.
    pub async fn get(&self, user_id: i64, entry_id: i64) -> Result<Option<UserEntry>> {
        let row = sqlx::query_as::<_, UserEntryRow>(
            r#"
            SELECT id, user_id, entry_id, is_read, is_starred, updated_at
            FROM user_entries
            WHERE user_id = $1 AND entry_id = $2
            "#,
        )
        .bind(user_id)
        .bind(entry_id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(row.map(UserEntry::from))
    }

    /// Set the read flag for a user and entry.
    pub async fn mark_read(&self, user_id: i64, entry_id: i64, read: bool) -> Result<()> {
        self.upsert_flag(user_id, entry_id, "is_read", read).await
    }

    /// Set the starred flag for a user and entry.
    pub async fn mark_starred(&self, user_id: i64, entry_id: i64, starred: bool) -> Result<()> {
        self.upsert_flag(user_id, entry_id, "is_starred", starred)
            .await
    }

    async fn upsert_flag(
        &self,
        user_id: i64,
        entry_id: i64,
        column: &str,
        value: bool,
    ) -> Result<()> {
        let value_sql = if value { SQL_TRUE } else { SQL_FALSE };
        let query = format!(
            r#"
            INSERT INTO user_entries (user_id, entry_id, {column}, updated_at)
            VALUES ($1, $2, {value_sql}, {SQL_NOW})
            ON CONFLICT(user_id, entry_id) DO UPDATE SET
                {column} = {value_sql},
                updated_at = {SQL_NOW}
            "#
        );
        sqlx::query(&query)
            .bind(user_id)
            .bind(entry_id)
            .execute(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(())
    }

    /// Count entries a user has marked read.
    pub async fn count_read_by_user(&self, user_id: i64) -> Result<i64> {
        let query = format!(
            "SELECT COUNT(*) FROM user_entries WHERE user_id = $1 AND is_read = {}",
            SQL_TRUE
        );
        let count: (i64,) = sqlx::query_as(&query)
            .bind(user_id)
            .fetch_one(self.pool)
            .await
            .map_err(|e| FeedPulseError::Database(e.to_string()))?;

        Ok(count.0)
    }
}
