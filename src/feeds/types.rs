//! Feed and subscription types for feedpulse.

use chrono::{DateTime, Utc};

/// A syndication source.
#[derive(Debug, Clone)]
pub struct Feed {
    /// Feed ID.
    pub id: i64,
    /// Current canonical fetch URL.
    pub url: String,
    /// Feed title, if known.
    pub title: Option<String>,
    /// Self URL advertised in the feed metadata.
    pub self_url: Option<String>,
    /// Push hub endpoint advertised in the feed metadata.
    pub hub_url: Option<String>,
    /// Whether a push channel is currently active for this feed.
    pub push_active: bool,
    /// Number of consecutive fetch failures.
    pub consecutive_failures: i32,
    /// Last fetch error message.
    pub last_error: Option<String>,
    /// When the next fetch is scheduled.
    pub next_fetch_at: Option<DateTime<Utc>>,
    /// When the feed was created.
    pub created_at: DateTime<Utc>,
    /// When the feed was last updated.
    pub updated_at: DateTime<Utc>,
}

/// New feed for creation.
#[derive(Debug, Clone)]
pub struct NewFeed {
    /// Canonical fetch URL.
    pub url: String,
    /// Feed title.
    pub title: Option<String>,
    /// Self URL from feed metadata.
    pub self_url: Option<String>,
    /// Push hub endpoint.
    pub hub_url: Option<String>,
}

impl NewFeed {
    /// Create a new feed.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            self_url: None,
            hub_url: None,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the self URL.
    pub fn with_self_url(mut self, self_url: impl Into<String>) -> Self {
        self.self_url = Some(self_url.into());
        self
    }

    /// Set the hub URL.
    pub fn with_hub_url(mut self, hub_url: impl Into<String>) -> Self {
        self.hub_url = Some(hub_url.into());
        self
    }
}

/// The relationship between a user and a feed.
///
/// Rows survive unsubscribes and migrations; `unsubscribed_at` marks the end
/// of the active period and `previous_feed_ids` records the feed identities
/// this subscription migrated from, newest last.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Subscription ID.
    pub id: i64,
    /// Subscribing user.
    pub user_id: i64,
    /// Current feed.
    pub feed_id: i64,
    /// Feed ids this subscription has migrated from, in migration order.
    pub previous_feed_ids: Vec<i64>,
    /// When the subscription (last) became active.
    pub subscribed_at: DateTime<Utc>,
    /// When the subscription ended; None while active.
    pub unsubscribed_at: Option<DateTime<Utc>>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether the subscription is currently active.
    pub fn is_active(&self) -> bool {
        self.unsubscribed_at.is_none()
    }

    /// Feed ids whose entries are visible to this subscription.
    ///
    /// The current feed plus every feed this subscription migrated from.
    pub fn visible_feed_ids(&self) -> Vec<i64> {
        let mut ids = Vec::with_capacity(1 + self.previous_feed_ids.len());
        ids.push(self.feed_id);
        ids.extend(self.previous_feed_ids.iter().copied());
        ids
    }
}

/// An entry (article) belonging to a feed.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Entry ID.
    pub id: i64,
    /// Feed this entry belongs to.
    pub feed_id: i64,
    /// Unique identifier within the feed (RSS guid or Atom id).
    pub guid: String,
    /// Entry title.
    pub title: String,
    /// Link to the original article.
    pub link: Option<String>,
    /// When the entry was published.
    pub published_at: Option<DateTime<Utc>>,
    /// When the entry was fetched.
    pub fetched_at: DateTime<Utc>,
}

/// New entry for creation.
#[derive(Debug, Clone)]
pub struct NewEntry {
    /// Feed ID.
    pub feed_id: i64,
    /// Unique identifier.
    pub guid: String,
    /// Entry title.
    pub title: String,
    /// Link to the original article.
    pub link: Option<String>,
    /// When the entry was published.
    pub published_at: Option<DateTime<Utc>>,
}

impl NewEntry {
    /// Create a new entry.
    pub fn new(feed_id: i64, guid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            feed_id,
            guid: guid.into(),
            title: title.into(),
            link: None,
            published_at: None,
        }
    }

    /// Set the link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Set the published date.
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }
}

/// Per-user read/starred state for one entry.
///
/// Keyed by entry id, so feed identity changes never touch it.
#[derive(Debug, Clone)]
pub struct UserEntry {
    /// Row ID.
    pub id: i64,
    /// User ID.
    pub user_id: i64,
    /// Entry ID.
    pub entry_id: i64,
    /// Whether the user has read the entry.
    pub is_read: bool,
    /// Whether the user has starred the entry.
    pub is_starred: bool,
    /// When the flags last changed.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_feed_builder() {
        let feed = NewFeed::new("https://example.com/feed.xml")
            .with_title("Example")
            .with_self_url("https://example.com/feed.xml")
            .with_hub_url("https://hub.example.com/");
        assert_eq!(feed.url, "https://example.com/feed.xml");
        assert_eq!(feed.title, Some("Example".to_string()));
        assert_eq!(feed.hub_url, Some("https://hub.example.com/".to_string()));
    }

    #[test]
    fn test_new_feed_minimal() {
        let feed = NewFeed::new("https://example.com/feed.xml");
        assert!(feed.title.is_none());
        assert!(feed.self_url.is_none());
        assert!(feed.hub_url.is_none());
    }

    #[test]
    fn test_subscription_is_active() {
        let sub = Subscription {
            id: 1,
            user_id: 1,
            feed_id: 2,
            previous_feed_ids: vec![],
            subscribed_at: Utc::now(),
            unsubscribed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(sub.is_active());

        let ended = Subscription {
            unsubscribed_at: Some(Utc::now()),
            ..sub
        };
        assert!(!ended.is_active());
    }

    #[test]
    fn test_visible_feed_ids_includes_history() {
        let sub = Subscription {
            id: 1,
            user_id: 1,
            feed_id: 5,
            previous_feed_ids: vec![2, 3],
            subscribed_at: Utc::now(),
            unsubscribed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(sub.visible_feed_ids(), vec![5, 2, 3]);
    }

    #[test]
    fn test_new_entry_builder() {
        let now = Utc::now();
        let entry = NewEntry::new(1, "guid-1", "Title")
            .with_link("https://example.com/1")
            .with_published_at(now);
        assert_eq!(entry.feed_id, 1);
        assert_eq!(entry.link, Some("https://example.com/1".to_string()));
        assert_eq!(entry.published_at, Some(now));
    }
}
