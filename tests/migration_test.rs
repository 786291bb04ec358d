//! End-to-end redirect migration tests.
//!
//! Exercises the full path a permanent redirect takes: subscriptions move to
//! the new feed identity, job volume follows demand, and read/starred
//! history keyed by entry id survives untouched.

mod common;

use feedpulse::feeds::{
    EntryRepository, FeedRepository, FeedService, MigrationOutcome, MigrationService, NewEntry,
    SubscriptionRepository, UserEntryRepository,
};
use feedpulse::jobs::{JobFilter, JobRepository, JobType};

use common::{create_feed, setup_db, subscribe};

#[tokio::test]
async fn test_redirect_without_target_updates_url_in_place() {
    let db = setup_db().await;

    let sub = subscribe(&db, 1, "https://old.example.com/feed.xml").await;
    let before = SubscriptionRepository::new(db.pool())
        .count_active_by_feed(sub.feed_id)
        .await
        .unwrap();

    let outcome = MigrationService::new(db.pool())
        .handle_permanent_redirect(sub.feed_id, "https://moved.example.com/feed.xml")
        .await
        .unwrap();
    assert_eq!(outcome, MigrationOutcome::UrlUpdated);

    let feed = FeedRepository::new(db.pool())
        .get_by_id(sub.feed_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(feed.url, "https://moved.example.com/feed.xml");

    // Subscription count unchanged, job still enabled
    let after = SubscriptionRepository::new(db.pool())
        .count_active_by_feed(sub.feed_id)
        .await
        .unwrap();
    assert_eq!(before, after);
    assert!(JobRepository::new(db.pool())
        .get_feed_job(sub.feed_id)
        .await
        .unwrap()
        .unwrap()
        .enabled);
}

#[tokio::test]
async fn test_redirect_migration_preserves_read_history() {
    let db = setup_db().await;
    let entries = EntryRepository::new(db.pool());
    let user_entries = UserEntryRepository::new(db.pool());
    let subs = SubscriptionRepository::new(db.pool());

    // User 1 follows the old feed and has read/starred one of its entries
    let old_sub = subscribe(&db, 1, "https://old.example.com/feed.xml").await;
    let old_feed_id = old_sub.feed_id;
    let new_feed = create_feed(&db, "https://new.example.com/feed.xml").await;

    let entry_id = entries
        .create_or_ignore(&NewEntry::new(old_feed_id, "guid-1", "Archived article"))
        .await
        .unwrap()
        .unwrap();
    user_entries.mark_read(1, entry_id, true).await.unwrap();
    user_entries.mark_starred(1, entry_id, true).await.unwrap();

    let outcome = MigrationService::new(db.pool())
        .handle_permanent_redirect(old_feed_id, "https://new.example.com/feed.xml")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        MigrationOutcome::Merged {
            target_feed_id: new_feed.id,
            migrated_subscriptions: 1,
        }
    );

    // Exactly one active subscription, now pointing at the new feed
    let active = subs.list_active_by_feed(new_feed.id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].user_id, 1);
    assert_eq!(active[0].previous_feed_ids, vec![old_feed_id]);
    assert_eq!(subs.count_active_by_feed(old_feed_id).await.unwrap(), 0);

    // The old subscription row survives, ended
    let old_sub = subs.get_by_id(old_sub.id).await.unwrap().unwrap();
    assert!(!old_sub.is_active());

    // Read/starred flags keyed by entry id are untouched and queryable
    let state = user_entries.get(1, entry_id).await.unwrap().unwrap();
    assert!(state.is_read);
    assert!(state.is_starred);

    // The old feed's entries stay visible through the migrated subscription
    let visible = FeedService::new(db.pool())
        .visible_entries(1, new_feed.id, 100)
        .await
        .unwrap();
    assert!(visible.iter().any(|entry| entry.id == entry_id));
}

#[tokio::test]
async fn test_migration_user_subscribed_to_both_feeds() {
    let db = setup_db().await;
    let subs = SubscriptionRepository::new(db.pool());

    let old_sub = subscribe(&db, 1, "https://old.example.com/feed.xml").await;
    let new_sub = subscribe(&db, 1, "https://new.example.com/feed.xml").await;

    MigrationService::new(db.pool())
        .handle_permanent_redirect(old_sub.feed_id, "https://new.example.com/feed.xml")
        .await
        .unwrap();

    // No duplicate active rows for (user, new feed)
    let active = subs.list_active_by_feed(new_sub.feed_id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, new_sub.id);
    assert_eq!(active[0].previous_feed_ids, vec![old_sub.feed_id]);

    assert_eq!(
        subs.count_active_by_feed(old_sub.feed_id).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_migration_moves_job_demand() {
    let db = setup_db().await;
    let jobs = JobRepository::new(db.pool());

    let old_sub = subscribe(&db, 1, "https://old.example.com/feed.xml").await;
    let new_feed = create_feed(&db, "https://new.example.com/feed.xml").await;

    // No job exists for the new feed yet
    assert!(jobs.get_feed_job(new_feed.id).await.unwrap().is_none());

    MigrationService::new(db.pool())
        .handle_permanent_redirect(old_sub.feed_id, "https://new.example.com/feed.xml")
        .await
        .unwrap();

    // The old job drained and was disabled, not deleted; the new feed's job
    // was created and enabled.
    let old_job = jobs.get_feed_job(old_sub.feed_id).await.unwrap().unwrap();
    assert!(!old_job.enabled);
    let new_job = jobs.get_feed_job(new_feed.id).await.unwrap().unwrap();
    assert!(new_job.enabled);

    let enabled = jobs
        .list(&JobFilter::new().job_type(JobType::FetchFeed).enabled(true))
        .await
        .unwrap();
    assert_eq!(enabled.len(), 1);
}

#[tokio::test]
async fn test_chained_redirects_keep_immediate_hop_only() {
    let db = setup_db().await;
    let subs = SubscriptionRepository::new(db.pool());
    let service = MigrationService::new(db.pool());

    let sub_a = subscribe(&db, 1, "https://a.example.com/feed.xml").await;
    let feed_b = create_feed(&db, "https://b.example.com/feed.xml").await;
    let feed_c = create_feed(&db, "https://c.example.com/feed.xml").await;

    service
        .handle_permanent_redirect(sub_a.feed_id, "https://b.example.com/feed.xml")
        .await
        .unwrap();
    service
        .handle_permanent_redirect(feed_b.id, "https://c.example.com/feed.xml")
        .await
        .unwrap();

    // The active subscription records only the B hop; A's history stays on
    // the inactive intermediate row.
    let on_c = subs.get_by_user_feed(1, feed_c.id).await.unwrap().unwrap();
    assert!(on_c.is_active());
    assert_eq!(on_c.previous_feed_ids, vec![feed_b.id]);

    let on_b = subs.get_by_user_feed(1, feed_b.id).await.unwrap().unwrap();
    assert!(!on_b.is_active());
    assert_eq!(on_b.previous_feed_ids, vec![sub_a.feed_id]);
}
