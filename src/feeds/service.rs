//! Subscription service for feedpulse.
//!
//! The surface user-facing callers go through: subscribing finds or creates
//! the feed and keeps its fetch job enabled; unsubscribing soft-ends the
//! subscription and lets the job volume follow real demand.

use tracing::info;

use super::fetcher::validate_url;
use super::repository::{EntryRepository, FeedRepository, SubscriptionRepository};
use super::types::{Entry, NewFeed, Subscription};
use crate::db::DbPool;
use crate::jobs::JobRepository;
use crate::{FeedPulseError, Result};

/// Service for subscribe/unsubscribe operations.
pub struct FeedService<'a> {
    pool: &'a DbPool,
}

impl<'a> FeedService<'a> {
    /// Create a new service instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Subscribe a user to a feed URL.
    ///
    /// Finds or creates the feed, creates or reactivates the subscription,
    /// and ensures the feed's fetch job is enabled. Subscribing twice is a
    /// no-op returning the existing subscription.
    pub async fn subscribe(&self, user_id: i64, url: &str) -> Result<Subscription> {
        validate_url(url)?;

        let feeds = FeedRepository::new(self.pool);
        let feed = match feeds.get_by_url(url).await? {
            Some(feed) => feed,
            None => feeds.create(&NewFeed::new(url)).await?,
        };

        let subs = SubscriptionRepository::new(self.pool);
        let sub = match subs.get_by_user_feed(user_id, feed.id).await? {
            Some(existing) if existing.is_active() => existing,
            Some(ended) => {
                subs.reactivate(ended.id).await?;
                subs.get_by_id(ended.id)
                    .await?
                    .ok_or_else(|| FeedPulseError::NotFound("subscription".into()))?
            }
            None => {
                let sub = subs.create(user_id, feed.id, &[]).await?;
                info!(user_id, feed_id = feed.id, url = %url, "New subscription");
                sub
            }
        };

        JobRepository::new(self.pool)
            .create_or_enable_feed_job(feed.id)
            .await?;

        Ok(sub)
    }

    /// End a user's subscription to a feed.
    ///
    /// The subscription row is kept and the feed's fetch job is disabled if
    /// no active subscribers remain. Returns false when the user had no
    /// active subscription.
    pub async fn unsubscribe(&self, user_id: i64, feed_id: i64) -> Result<bool> {
        let subs = SubscriptionRepository::new(self.pool);
        match subs.get_by_user_feed(user_id, feed_id).await? {
            Some(sub) if sub.is_active() => {
                subs.unsubscribe(sub.id).await?;
                JobRepository::new(self.pool)
                    .sync_feed_job_enabled(feed_id)
                    .await?;
                info!(user_id, feed_id, "Subscription ended");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Entries visible to a user through their subscription to a feed.
    ///
    /// Includes entries from every feed the subscription migrated from, so
    /// read/starred history stays reachable after redirects.
    pub async fn visible_entries(
        &self,
        user_id: i64,
        feed_id: i64,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        let subs = SubscriptionRepository::new(self.pool);
        let sub = subs
            .get_by_user_feed(user_id, feed_id)
            .await?
            .ok_or_else(|| FeedPulseError::NotFound("subscription".into()))?;

        EntryRepository::new(self.pool)
            .list_for_feeds(&sub.visible_feed_ids(), limit)
            .await
    }
}
