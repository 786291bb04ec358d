//! Test helpers for feedpulse integration tests.
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use feedpulse::feeds::{Feed, FeedRepository, FeedService, NewFeed, Subscription};
use feedpulse::Database;

/// Open a shared in-memory database.
pub async fn setup_db() -> Arc<Database> {
    Arc::new(Database::open_in_memory().await.unwrap())
}

/// Create a feed with the given URL.
pub async fn create_feed(db: &Database, url: &str) -> Feed {
    FeedRepository::new(db.pool())
        .create(&NewFeed::new(url))
        .await
        .unwrap()
}

/// Subscribe a user to a feed URL through the service surface.
///
/// Creates the feed and its fetch job as a side effect.
pub async fn subscribe(db: &Database, user_id: i64, url: &str) -> Subscription {
    FeedService::new(db.pool())
        .subscribe(user_id, url)
        .await
        .unwrap()
}
