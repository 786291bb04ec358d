//! Database schema and migrations for feedpulse.
//!
//! This module contains all database migrations that will be applied
//! sequentially when the database is first opened or upgraded.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Feeds table
    r#"
-- Syndication sources. One row per canonical fetch URL.
CREATE TABLE feeds (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    url                   TEXT NOT NULL UNIQUE,
    title                 TEXT,
    self_url              TEXT,
    hub_url               TEXT,
    push_active           INTEGER NOT NULL DEFAULT 0,
    consecutive_failures  INTEGER NOT NULL DEFAULT 0,
    last_error            TEXT,
    next_fetch_at         TEXT,
    created_at            TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at            TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_feeds_next_fetch_at ON feeds(next_fetch_at);
"#,
    // v2: Subscriptions table
    r#"
-- User/feed relationships. Rows are never deleted: unsubscribing and
-- redirect migration set unsubscribed_at instead, so read history keyed
-- off entry ids stays reconcilable. previous_feed_ids is an append-only
-- JSON array of feed ids this subscription migrated from.
CREATE TABLE subscriptions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id           INTEGER NOT NULL,
    feed_id           INTEGER NOT NULL REFERENCES feeds(id),
    previous_feed_ids TEXT NOT NULL DEFAULT '[]',
    subscribed_at     TEXT NOT NULL DEFAULT (datetime('now')),
    unsubscribed_at   TEXT,
    created_at        TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at        TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_subscriptions_user_id ON subscriptions(user_id);
CREATE INDEX idx_subscriptions_feed_id ON subscriptions(feed_id);
-- At most one active subscription per (user, feed)
CREATE UNIQUE INDEX idx_subscriptions_active
    ON subscriptions(user_id, feed_id) WHERE unsubscribed_at IS NULL;
"#,
    // v3: Entries and per-user entry state
    r#"
CREATE TABLE entries (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id      INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    guid         TEXT NOT NULL,
    title        TEXT NOT NULL,
    link         TEXT,
    published_at TEXT,
    fetched_at   TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(feed_id, guid)
);

CREATE INDEX idx_entries_feed_id ON entries(feed_id);

-- Read/starred flags are keyed by entry id, not feed id, so redirect
-- migration leaves them untouched.
CREATE TABLE user_entries (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    INTEGER NOT NULL,
    entry_id   INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    is_read    INTEGER NOT NULL DEFAULT 0,
    is_starred INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(user_id, entry_id)
);

CREATE INDEX idx_user_entries_user_id ON user_entries(user_id);
"#,
    // v4: Jobs table
    r#"
-- Durable work queue. A non-null running_since marks a claimed job; the
-- claim becomes reclaimable once running_since falls behind the staleness
-- window. Jobs are soft-disabled, never deleted.
CREATE TABLE jobs (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type             TEXT NOT NULL,
    payload              TEXT NOT NULL DEFAULT '{}',
    feed_id              INTEGER,
    enabled              INTEGER NOT NULL DEFAULT 1,
    next_run_at          TEXT NOT NULL DEFAULT (datetime('now')),
    running_since        TEXT,
    last_run_at          TEXT,
    last_error           TEXT,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    created_at           TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at           TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_jobs_claim ON jobs(enabled, next_run_at);
-- At most one fetch job per feed
CREATE UNIQUE INDEX idx_jobs_feed_fetch
    ON jobs(feed_id) WHERE job_type = 'fetch_feed' AND feed_id IS NOT NULL;
"#,
    // v5: Push subscriptions table
    r#"
-- WebSub registration state, one row per feed+hub pair. Rows are re-used
-- across subscribe attempts; the unique index backs the upsert.
CREATE TABLE push_subscriptions (
    id                       INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id                  INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    hub_url                  TEXT NOT NULL,
    topic_url                TEXT NOT NULL,
    callback_secret          TEXT NOT NULL,
    state                    TEXT NOT NULL DEFAULT 'pending',
    lease_seconds            INTEGER,
    expires_at               TEXT,
    last_challenge_at        TEXT,
    last_error               TEXT,
    unsubscribe_requested_at TEXT,
    created_at               TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at               TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(feed_id, hub_url)
);

CREATE INDEX idx_push_subscriptions_state ON push_subscriptions(state);
CREATE INDEX idx_push_subscriptions_expires_at ON push_subscriptions(expires_at);
"#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_not_empty() {
        assert!(!MIGRATIONS.is_empty());
        for migration in MIGRATIONS {
            assert!(!migration.trim().is_empty());
        }
    }

    #[test]
    fn test_migrations_create_expected_tables() {
        let all: String = MIGRATIONS.concat();
        for table in [
            "feeds",
            "subscriptions",
            "entries",
            "user_entries",
            "jobs",
            "push_subscriptions",
        ] {
            assert!(
                all.contains(&format!("CREATE TABLE {}", table)),
                "missing table {}",
                table
            );
        }
    }
}
