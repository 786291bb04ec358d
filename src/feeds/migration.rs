//! Redirect migration handler for feedpulse.
//!
//! When a fetch discovers that a feed's canonical URL has permanently moved,
//! its subscriptions must follow the new identity without losing per-user
//! read/starred history. That history is keyed by entry id, so migration
//! never deletes anything: old subscriptions are ended, new ones created or
//! reactivated, and the old feed id is appended to the subscription's
//! migration history.

use tracing::info;

use super::repository::{FeedRepository, SubscriptionRepository};
use crate::db::{DbPool, SQL_NOW};
use crate::jobs::JobRepository;
use crate::{FeedPulseError, Result};

/// What a permanent redirect resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No feed existed at the target URL; the feed row was updated in place.
    UrlUpdated,
    /// A feed already existed at the target URL; subscriptions were moved.
    Merged {
        /// The feed the subscriptions now point at.
        target_feed_id: i64,
        /// Number of active subscriptions that were moved.
        migrated_subscriptions: usize,
    },
}

/// Service for reconciling feed identity changes.
pub struct MigrationService<'a> {
    pool: &'a DbPool,
}

impl<'a> MigrationService<'a> {
    /// Create a new service instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Reconcile a permanent redirect discovered during a fetch.
    ///
    /// If no feed exists at the target URL the row's URL is simply updated in
    /// place; otherwise every active subscription is moved onto the existing
    /// target feed.
    pub async fn handle_permanent_redirect(
        &self,
        feed_id: i64,
        new_url: &str,
    ) -> Result<MigrationOutcome> {
        let feeds = FeedRepository::new(self.pool);
        let feed = feeds
            .get_by_id(feed_id)
            .await?
            .ok_or_else(|| FeedPulseError::NotFound("feed".into()))?;

        match feeds.get_by_url(new_url).await? {
            None => {
                feeds.set_url(feed_id, new_url).await?;
                info!(
                    feed_id,
                    old_url = %feed.url,
                    new_url = %new_url,
                    "Feed URL updated after permanent redirect"
                );
                Ok(MigrationOutcome::UrlUpdated)
            }
            Some(target) if target.id == feed.id => Ok(MigrationOutcome::UrlUpdated),
            Some(target) => {
                let migrated = self
                    .migrate_subscriptions_to_existing_feed(feed_id, target.id)
                    .await?;
                Ok(MigrationOutcome::Merged {
                    target_feed_id: target.id,
                    migrated_subscriptions: migrated,
                })
            }
        }
    }

    /// Move every active subscription from one feed onto another.
    ///
    /// Per user: an existing subscription to the target feed (active or
    /// ended) gets the old feed id appended to its history and is reactivated
    /// if it had ended; otherwise a fresh subscription is created whose
    /// history starts at the old feed. The old subscription is then ended,
    /// never deleted. Each user's move is one short transaction.
    pub async fn migrate_subscriptions_to_existing_feed(
        &self,
        old_feed_id: i64,
        new_feed_id: i64,
    ) -> Result<usize> {
        let subs = SubscriptionRepository::new(self.pool);
        let jobs = JobRepository::new(self.pool);

        let active = subs.list_active_by_feed(old_feed_id).await?;
        let mut migrated = 0;

        for sub in &active {
            let existing = subs.get_by_user_feed(sub.user_id, new_feed_id).await?;
            let created_new = existing.is_none();

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| FeedPulseError::Database(e.to_string()))?;

            match existing {
                Some(target_sub) => {
                    let mut previous = target_sub.previous_feed_ids.clone();
                    previous.push(old_feed_id);
                    let previous = serde_json::to_string(&previous)
                        .map_err(|e| FeedPulseError::Database(e.to_string()))?;

                    let query = if target_sub.is_active() {
                        format!(
                            "UPDATE subscriptions SET previous_feed_ids = $1, updated_at = {} WHERE id = $2",
                            SQL_NOW
                        )
                    } else {
                        format!(
                            "UPDATE subscriptions SET previous_feed_ids = $1, unsubscribed_at = NULL, subscribed_at = {}, updated_at = {} WHERE id = $2",
                            SQL_NOW, SQL_NOW
                        )
                    };
                    sqlx::query(&query)
                        .bind(previous)
                        .bind(target_sub.id)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| FeedPulseError::Database(e.to_string()))?;
                }
                None => {
                    let previous = serde_json::to_string(&[old_feed_id])
                        .map_err(|e| FeedPulseError::Database(e.to_string()))?;
                    sqlx::query(
                        "INSERT INTO subscriptions (user_id, feed_id, previous_feed_ids) VALUES ($1, $2, $3)",
                    )
                    .bind(sub.user_id)
                    .bind(new_feed_id)
                    .bind(previous)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| FeedPulseError::Database(e.to_string()))?;
                }
            }

            let query = format!(
                "UPDATE subscriptions SET unsubscribed_at = {}, updated_at = {} WHERE id = $1 AND unsubscribed_at IS NULL",
                SQL_NOW, SQL_NOW
            );
            sqlx::query(&query)
                .bind(sub.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| FeedPulseError::Database(e.to_string()))?;

            tx.commit()
                .await
                .map_err(|e| FeedPulseError::Database(e.to_string()))?;

            if created_new {
                jobs.create_or_enable_feed_job(new_feed_id).await?;
            }
            migrated += 1;
        }

        // The old feed has no active subscribers left; its job follows.
        jobs.sync_feed_job_enabled(old_feed_id).await?;

        info!(
            old_feed_id,
            new_feed_id, migrated, "Subscriptions migrated to existing feed"
        );
        Ok(migrated)
    }
}
