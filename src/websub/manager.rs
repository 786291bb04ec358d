//! Push subscription manager for feedpulse.
//!
//! Drives the WebSub subscribe / verify / notify / renew protocol against
//! third-party hubs. Hub and transport failures are absorbed into row state
//! (`last_error`, `state`); only database errors propagate to the caller.

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::{Client, StatusCode};
use sha2::{Sha256, Sha384, Sha512};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use super::repository::PushSubscriptionRepository;
use super::types::{
    NewPushSubscription, PushSubscriptionState, RenewalReport, VerificationRequest,
};
use crate::config::WebSubConfig;
use crate::db::DbPool;
use crate::feeds::fetcher::validate_url;
use crate::feeds::{Feed, FeedRepository};
use crate::{FeedPulseError, Result};

/// Timeout for hub subscribe requests in seconds.
const HUB_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Maximum length of a hub response body stored in `last_error`.
const MAX_ERROR_BODY_LEN: usize = 200;

/// User agent string for hub requests.
const USER_AGENT: &str = "FeedPulse/0.1 (WebSub)";

/// Manager for push-hub registrations.
pub struct WebSubManager<'a> {
    pool: &'a DbPool,
    config: &'a WebSubConfig,
    client: Client,
}

impl<'a> WebSubManager<'a> {
    /// Create a manager with its own hub HTTP client.
    pub fn new(pool: &'a DbPool, config: &'a WebSubConfig) -> Result<Self> {
        Ok(Self::with_client(pool, config, build_hub_client()?))
    }

    /// Create a manager re-using an existing hub HTTP client.
    pub fn with_client(pool: &'a DbPool, config: &'a WebSubConfig, client: Client) -> Self {
        Self {
            pool,
            config,
            client,
        }
    }

    /// Whether push subscriptions can be attempted at all.
    ///
    /// Requires push to be enabled and the configured public base URL to be
    /// one a hub can actually route back to: non-empty, http(s), no
    /// loopback/private/reserved host, and HTTPS when running in production.
    /// A failing check is a normal steady state (development boxes have no
    /// public URL), not an error.
    pub fn can_use_websub(&self) -> bool {
        if !self.config.enabled {
            return false;
        }

        let base = self.config.public_base_url.trim();
        if base.is_empty() {
            return false;
        }

        let parsed = match url::Url::parse(base) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };
        if self.config.production && parsed.scheme() != "https" {
            return false;
        }

        validate_url(base).is_ok()
    }

    /// The callback URL the hub will call for a feed.
    pub fn callback_url(&self, feed_id: i64) -> String {
        format!(
            "{}/websub/callback/{}",
            self.config.public_base_url.trim().trim_end_matches('/'),
            feed_id
        )
    }

    /// Ask the feed's hub to start (or renew) a push subscription.
    ///
    /// The pending row is committed before the hub is contacted, so a slow or
    /// failed hub request never holds any database state. Returns whether the
    /// hub accepted the request; rejections and transport errors are recorded
    /// on the row and reported as a clean `false`.
    pub async fn subscribe_to_hub(&self, feed: &Feed) -> Result<bool> {
        if !self.can_use_websub() {
            debug!(feed_id = feed.id, "WebSub unavailable, staying on polling");
            return Ok(false);
        }

        let hub_url = match &feed.hub_url {
            Some(hub_url) => hub_url.clone(),
            None => return Ok(false),
        };
        let topic_url = feed.self_url.clone().unwrap_or_else(|| feed.url.clone());
        let secret = generate_secret();

        let repo = PushSubscriptionRepository::new(self.pool);
        let sub = repo
            .upsert_pending(&NewPushSubscription {
                feed_id: feed.id,
                hub_url: hub_url.clone(),
                topic_url: topic_url.clone(),
                callback_secret: secret.clone(),
            })
            .await?;

        let callback = self.callback_url(feed.id);
        let params = [
            ("hub.mode", "subscribe"),
            ("hub.topic", topic_url.as_str()),
            ("hub.callback", callback.as_str()),
            ("hub.secret", secret.as_str()),
        ];

        match self.client.post(&hub_url).form(&params).send().await {
            Ok(response)
                if response.status() == StatusCode::ACCEPTED
                    || response.status() == StatusCode::NO_CONTENT =>
            {
                info!(
                    feed_id = feed.id,
                    hub_url = %hub_url,
                    "Hub accepted subscribe request"
                );
                Ok(true)
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = format!("hub returned {}: {}", status, truncate_error(&body));
                repo.set_error(sub.id, &error).await?;
                warn!(feed_id = feed.id, hub_url = %hub_url, "{}", error);
                Ok(false)
            }
            Err(e) => {
                let error = format!("hub request failed: {}", e);
                repo.set_error(sub.id, &error).await?;
                warn!(feed_id = feed.id, hub_url = %hub_url, "{}", error);
                Ok(false)
            }
        }
    }

    /// Process a hub verification GET for a feed's callback.
    ///
    /// On success the returned challenge token must be echoed back verbatim
    /// as the HTTP response body; that echo is the protocol's confirmation.
    /// Parameter problems, unknown modes and topic mismatches are rejected
    /// with a typed error and must not be confirmed.
    pub async fn handle_verification_challenge(
        &self,
        feed_id: i64,
        request: &VerificationRequest,
    ) -> Result<String> {
        let mode = request
            .mode
            .as_deref()
            .ok_or_else(|| FeedPulseError::WebSub("missing hub.mode".to_string()))?;
        let topic = request
            .topic
            .as_deref()
            .ok_or_else(|| FeedPulseError::WebSub("missing hub.topic".to_string()))?;
        let challenge = request
            .challenge
            .as_deref()
            .ok_or_else(|| FeedPulseError::WebSub("missing hub.challenge".to_string()))?;

        if mode != "subscribe" && mode != "unsubscribe" {
            return Err(FeedPulseError::WebSub(format!("unknown hub.mode: {}", mode)));
        }

        let repo = PushSubscriptionRepository::new(self.pool);
        let feeds = FeedRepository::new(self.pool);

        let sub = repo.get_by_feed(feed_id).await?.ok_or_else(|| {
            FeedPulseError::WebSub(format!("no push subscription for feed {}", feed_id))
        })?;

        // A challenge for the wrong topic could confirm a registration we
        // never asked for; reject rather than warn.
        if sub.topic_url != topic {
            warn!(
                feed_id,
                expected = %sub.topic_url,
                got = %topic,
                "Rejecting verification challenge with mismatched topic"
            );
            return Err(FeedPulseError::WebSub("topic mismatch".to_string()));
        }

        if mode == "subscribe" {
            if sub.state == PushSubscriptionState::Unsubscribed {
                return Err(FeedPulseError::WebSub(
                    "subscription is not awaiting verification".to_string(),
                ));
            }
            let lease_seconds = request
                .lease_seconds
                .filter(|lease| *lease > 0)
                .ok_or_else(|| {
                    FeedPulseError::WebSub("missing or invalid hub.lease_seconds".to_string())
                })?;

            let expires_at = Utc::now() + Duration::seconds(lease_seconds);
            repo.activate(sub.id, lease_seconds, expires_at).await?;
            feeds.set_push_active(feed_id, true).await?;
            info!(
                feed_id,
                lease_seconds, "Push subscription verified and active"
            );
        } else {
            let hub_initiated = sub.unsubscribe_requested_at.is_none();
            let error = if hub_initiated {
                Some("unsubscribe initiated by hub")
            } else {
                None
            };
            repo.mark_unsubscribed(sub.id, error).await?;
            feeds.set_push_active(feed_id, false).await?;
            if hub_initiated {
                warn!(feed_id, "Hub-initiated unsubscribe confirmed");
            } else {
                info!(feed_id, "Unsubscribe confirmed by hub");
            }
        }

        Ok(challenge.to_string())
    }

    /// Verify a notification's HMAC signature against the feed's active
    /// subscription.
    ///
    /// The header has the form `algorithm=hexdigest`. Only active
    /// subscriptions are consulted; a notification against a pending or
    /// unsubscribed registration is never trusted. Every protocol failure
    /// mode returns `false` and the caller must discard the notification.
    pub async fn verify_signature(
        &self,
        feed_id: i64,
        signature_header: Option<&str>,
        raw_body: &[u8],
    ) -> Result<bool> {
        let header = match signature_header {
            Some(header) => header,
            None => return Ok(false),
        };
        let (algorithm, digest_hex) = match header.split_once('=') {
            Some((algorithm, digest_hex)) => (algorithm.trim(), digest_hex.trim()),
            None => return Ok(false),
        };
        let expected = match hex::decode(digest_hex) {
            Ok(expected) => expected,
            Err(_) => return Ok(false),
        };

        let repo = PushSubscriptionRepository::new(self.pool);
        let sub = match repo.get_active_by_feed(feed_id).await? {
            Some(sub) => sub,
            None => return Ok(false),
        };

        Ok(verify_digest(
            algorithm,
            sub.callback_secret.as_bytes(),
            raw_body,
            &expected,
        ))
    }

    /// Re-subscribe every active registration expiring within the window.
    ///
    /// A failed renewal demotes the subscription to unsubscribed and the
    /// feed to push-inactive, so polling takes back over; a feed is never
    /// left with neither channel.
    pub async fn renew_expiring_subscriptions(
        &self,
        hours_before_expiry: i64,
    ) -> Result<RenewalReport> {
        let repo = PushSubscriptionRepository::new(self.pool);
        let feeds = FeedRepository::new(self.pool);

        let cutoff = Utc::now() + Duration::hours(hours_before_expiry);
        let expiring = repo.list_active_expiring_before(cutoff).await?;

        let mut report = RenewalReport::default();
        for sub in expiring {
            let accepted = match feeds.get_by_id(sub.feed_id).await? {
                Some(feed) => self.subscribe_to_hub(&feed).await?,
                None => false,
            };

            if accepted {
                report.renewed += 1;
            } else {
                repo.mark_unsubscribed(sub.id, None).await?;
                feeds.set_push_active(sub.feed_id, false).await?;
                report.failed += 1;
                warn!(
                    feed_id = sub.feed_id,
                    "Renewal failed, feed demoted to polling"
                );
            }
        }

        if report.renewed > 0 || report.failed > 0 {
            info!(
                renewed = report.renewed,
                failed = report.failed,
                "Subscription renewal sweep complete"
            );
        }
        Ok(report)
    }

    /// End a feed's push subscription locally, without hub confirmation.
    ///
    /// Used when an operator or import removes the hub URL; we are no longer
    /// asking the hub for anything, so there is nothing to wait for.
    pub async fn deactivate_websub(&self, feed_id: i64) -> Result<bool> {
        let repo = PushSubscriptionRepository::new(self.pool);
        let feeds = FeedRepository::new(self.pool);

        let deactivated = match repo.get_by_feed(feed_id).await? {
            Some(sub) if sub.state != PushSubscriptionState::Unsubscribed => {
                repo.set_unsubscribe_requested(sub.id).await?;
                repo.mark_unsubscribed(sub.id, None).await?;
                info!(feed_id, "Push subscription deactivated locally");
                true
            }
            _ => false,
        };
        feeds.set_push_active(feed_id, false).await?;

        Ok(deactivated)
    }
}

/// Build the HTTP client used for hub subscribe requests.
pub fn build_hub_client() -> Result<Client> {
    Client::builder()
        .timeout(StdDuration::from_secs(HUB_REQUEST_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| FeedPulseError::WebSub(format!("failed to create hub client: {}", e)))
}

/// Generate a fresh callback secret: 32 random bytes, hex-encoded.
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Truncate a hub response body for storage in `last_error`.
fn truncate_error(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_LEN).collect()
}

/// Check a hex-decoded digest against the HMAC of the raw body.
///
/// The length check keeps a digest of the wrong size from ever reaching the
/// comparison; the comparison itself is constant-time.
fn verify_digest(algorithm: &str, secret: &[u8], body: &[u8], expected: &[u8]) -> bool {
    match algorithm {
        "sha256" => {
            if expected.len() != 32 {
                return false;
            }
            let mut mac = match Hmac::<Sha256>::new_from_slice(secret) {
                Ok(mac) => mac,
                Err(_) => return false,
            };
            mac.update(body);
            mac.verify_slice(expected).is_ok()
        }
        "sha384" => {
            if expected.len() != 48 {
                return false;
            }
            let mut mac = match Hmac::<Sha384>::new_from_slice(secret) {
                Ok(mac) => mac,
                Err(_) => return false,
            };
            mac.update(body);
            mac.verify_slice(expected).is_ok()
        }
        "sha512" => {
            if expected.len() != 64 {
                return false;
            }
            let mut mac = match Hmac::<Sha512>::new_from_slice(secret) {
                Ok(mac) => mac,
                Err(_) => return false,
            };
            mac.update(body);
            mac.verify_slice(expected).is_ok()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::NewFeed;
    use crate::Database;

    async fn setup_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn test_config() -> WebSubConfig {
        WebSubConfig {
            enabled: true,
            public_base_url: "https://reader.example.com".to_string(),
            production: false,
            ..WebSubConfig::default()
        }
    }

    async fn create_feed_with_hub(db: &Database) -> Feed {
        FeedRepository::new(db.pool())
            .create(
                &NewFeed::new("https://example.com/feed.xml")
                    .with_self_url("https://example.com/feed.xml")
                    .with_hub_url("https://hub.invalid/"),
            )
            .await
            .unwrap()
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn test_can_use_websub_matrix() {
        let db = setup_db().await;

        let ok = test_config();
        assert!(WebSubManager::new(db.pool(), &ok).unwrap().can_use_websub());

        let mut disabled = test_config();
        disabled.enabled = false;
        assert!(!WebSubManager::new(db.pool(), &disabled)
            .unwrap()
            .can_use_websub());

        let mut empty = test_config();
        empty.public_base_url = String::new();
        assert!(!WebSubManager::new(db.pool(), &empty)
            .unwrap()
            .can_use_websub());

        for bad_host in [
            "https://localhost:8080",
            "https://reader.local",
            "https://127.0.0.1",
            "https://10.0.0.5",
            "https://192.168.1.10",
        ] {
            let mut config = test_config();
            config.public_base_url = bad_host.to_string();
            assert!(
                !WebSubManager::new(db.pool(), &config)
                    .unwrap()
                    .can_use_websub(),
                "{} should be refused",
                bad_host
            );
        }

        // Plaintext HTTP is tolerated in development but refused in production
        let mut http = test_config();
        http.public_base_url = "http://reader.example.com".to_string();
        assert!(WebSubManager::new(db.pool(), &http)
            .unwrap()
            .can_use_websub());
        http.production = true;
        assert!(!WebSubManager::new(db.pool(), &http)
            .unwrap()
            .can_use_websub());
    }

    #[tokio::test]
    async fn test_callback_url_strips_trailing_slash() {
        let db = setup_db().await;
        let mut config = test_config();
        config.public_base_url = "https://reader.example.com/".to_string();
        let manager = WebSubManager::new(db.pool(), &config).unwrap();
        assert_eq!(
            manager.callback_url(42),
            "https://reader.example.com/websub/callback/42"
        );
    }

    #[tokio::test]
    async fn test_subscribe_without_hub_url_is_noop() {
        let db = setup_db().await;
        let config = test_config();
        let manager = WebSubManager::new(db.pool(), &config).unwrap();

        let feed = FeedRepository::new(db.pool())
            .create(&NewFeed::new("https://example.com/feed.xml"))
            .await
            .unwrap();
        assert!(!manager.subscribe_to_hub(&feed).await.unwrap());

        let repo = PushSubscriptionRepository::new(db.pool());
        assert!(repo.get_by_feed(feed.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_unreachable_hub_records_error() {
        let db = setup_db().await;
        let config = test_config();
        let manager = WebSubManager::new(db.pool(), &config).unwrap();
        let feed = create_feed_with_hub(&db).await;

        // The pending row is committed even though the hub is unreachable
        assert!(!manager.subscribe_to_hub(&feed).await.unwrap());

        let sub = PushSubscriptionRepository::new(db.pool())
            .get_by_feed(feed.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.state, PushSubscriptionState::Pending);
        assert_eq!(sub.callback_secret.len(), 64);
        assert!(sub.last_error.is_some());
    }

    #[tokio::test]
    async fn test_challenge_subscribe_activates() {
        let db = setup_db().await;
        let config = test_config();
        let manager = WebSubManager::new(db.pool(), &config).unwrap();
        let feed = create_feed_with_hub(&db).await;

        let repo = PushSubscriptionRepository::new(db.pool());
        repo.upsert_pending(&NewPushSubscription {
            feed_id: feed.id,
            hub_url: "https://hub.invalid/".to_string(),
            topic_url: "https://example.com/feed.xml".to_string(),
            callback_secret: "secret".to_string(),
        })
        .await
        .unwrap();

        let request =
            VerificationRequest::subscribe("https://example.com/feed.xml", "challenge-token", 432000);
        let echoed = manager
            .handle_verification_challenge(feed.id, &request)
            .await
            .unwrap();
        assert_eq!(echoed, "challenge-token");

        let sub = repo.get_by_feed(feed.id).await.unwrap().unwrap();
        assert!(sub.is_active());
        assert_eq!(sub.lease_seconds, Some(432000));
        assert!(sub.expires_at.is_some());

        let feed = FeedRepository::new(db.pool())
            .get_by_id(feed.id)
            .await
            .unwrap()
            .unwrap();
        assert!(feed.push_active);
    }

    #[tokio::test]
    async fn test_challenge_rejections() {
        let db = setup_db().await;
        let config = test_config();
        let manager = WebSubManager::new(db.pool(), &config).unwrap();
        let feed = create_feed_with_hub(&db).await;

        let repo = PushSubscriptionRepository::new(db.pool());
        repo.upsert_pending(&NewPushSubscription {
            feed_id: feed.id,
            hub_url: "https://hub.invalid/".to_string(),
            topic_url: "https://example.com/feed.xml".to_string(),
            callback_secret: "secret".to_string(),
        })
        .await
        .unwrap();

        // Missing parameters
        let mut missing_mode =
            VerificationRequest::subscribe("https://example.com/feed.xml", "tok", 3600);
        missing_mode.mode = None;
        assert!(manager
            .handle_verification_challenge(feed.id, &missing_mode)
            .await
            .is_err());

        let mut missing_lease =
            VerificationRequest::subscribe("https://example.com/feed.xml", "tok", 3600);
        missing_lease.lease_seconds = None;
        assert!(manager
            .handle_verification_challenge(feed.id, &missing_lease)
            .await
            .is_err());

        // Unknown mode
        let mut bad_mode = VerificationRequest::subscribe("https://example.com/feed.xml", "tok", 3600);
        bad_mode.mode = Some("denied".to_string());
        assert!(manager
            .handle_verification_challenge(feed.id, &bad_mode)
            .await
            .is_err());

        // Topic mismatch is a security rejection
        let wrong_topic = VerificationRequest::subscribe("https://evil.example.com/feed.xml", "tok", 3600);
        assert!(manager
            .handle_verification_challenge(feed.id, &wrong_topic)
            .await
            .is_err());

        // Unknown feed
        let request = VerificationRequest::subscribe("https://example.com/feed.xml", "tok", 3600);
        assert!(manager
            .handle_verification_challenge(9999, &request)
            .await
            .is_err());

        // Nothing above may have activated the subscription
        let sub = repo.get_by_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(sub.state, PushSubscriptionState::Pending);
    }

    #[tokio::test]
    async fn test_challenge_hub_initiated_unsubscribe() {
        let db = setup_db().await;
        let config = test_config();
        let manager = WebSubManager::new(db.pool(), &config).unwrap();
        let feed = create_feed_with_hub(&db).await;

        let repo = PushSubscriptionRepository::new(db.pool());
        let sub = repo
            .upsert_pending(&NewPushSubscription {
                feed_id: feed.id,
                hub_url: "https://hub.invalid/".to_string(),
                topic_url: "https://example.com/feed.xml".to_string(),
                callback_secret: "secret".to_string(),
            })
            .await
            .unwrap();
        repo.activate(sub.id, 3600, Utc::now() + Duration::seconds(3600))
            .await
            .unwrap();
        FeedRepository::new(db.pool())
            .set_push_active(feed.id, true)
            .await
            .unwrap();

        // We never requested this unsubscribe; the hub did
        let request = VerificationRequest::unsubscribe("https://example.com/feed.xml", "bye");
        let echoed = manager
            .handle_verification_challenge(feed.id, &request)
            .await
            .unwrap();
        assert_eq!(echoed, "bye");

        let sub = repo.get_by_id(sub.id).await.unwrap().unwrap();
        assert_eq!(sub.state, PushSubscriptionState::Unsubscribed);
        assert_eq!(
            sub.last_error,
            Some("unsubscribe initiated by hub".to_string())
        );

        let feed = FeedRepository::new(db.pool())
            .get_by_id(feed.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!feed.push_active);
    }

    #[tokio::test]
    async fn test_verify_signature_matrix() {
        let db = setup_db().await;
        let config = test_config();
        let manager = WebSubManager::new(db.pool(), &config).unwrap();
        let feed = create_feed_with_hub(&db).await;

        let repo = PushSubscriptionRepository::new(db.pool());
        let sub = repo
            .upsert_pending(&NewPushSubscription {
                feed_id: feed.id,
                hub_url: "https://hub.invalid/".to_string(),
                topic_url: "https://example.com/feed.xml".to_string(),
                callback_secret: "0123456789abcdef0123456789abcdef".to_string(),
            })
            .await
            .unwrap();

        let body = b"<rss><channel><item><guid>n-1</guid></item></channel></rss>";
        let good = format!("sha256={}", sign(&sub.callback_secret, body));

        // A pending subscription is never trusted, even with a valid digest
        assert!(!manager
            .verify_signature(feed.id, Some(&good), body)
            .await
            .unwrap());

        repo.activate(sub.id, 3600, Utc::now() + Duration::seconds(3600))
            .await
            .unwrap();
        assert!(manager
            .verify_signature(feed.id, Some(&good), body)
            .await
            .unwrap());

        // One flipped byte in the body
        let mut tampered = body.to_vec();
        tampered[0] ^= 0x01;
        assert!(!manager
            .verify_signature(feed.id, Some(&good), &tampered)
            .await
            .unwrap());

        // Missing header, malformed header, bad hex, wrong length, unknown algorithm
        assert!(!manager.verify_signature(feed.id, None, body).await.unwrap());
        assert!(!manager
            .verify_signature(feed.id, Some("sha256"), body)
            .await
            .unwrap());
        assert!(!manager
            .verify_signature(feed.id, Some("sha256=zzzz"), body)
            .await
            .unwrap());
        assert!(!manager
            .verify_signature(feed.id, Some("sha256=deadbeef"), body)
            .await
            .unwrap());
        let sha1_style = format!("sha1={}", "0".repeat(40));
        assert!(!manager
            .verify_signature(feed.id, Some(&sha1_style), body)
            .await
            .unwrap());

        // Unknown feed
        assert!(!manager
            .verify_signature(9999, Some(&good), body)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_verify_signature_sha512() {
        let db = setup_db().await;
        let config = test_config();
        let manager = WebSubManager::new(db.pool(), &config).unwrap();
        let feed = create_feed_with_hub(&db).await;

        let repo = PushSubscriptionRepository::new(db.pool());
        let sub = repo
            .upsert_pending(&NewPushSubscription {
                feed_id: feed.id,
                hub_url: "https://hub.invalid/".to_string(),
                topic_url: "https://example.com/feed.xml".to_string(),
                callback_secret: "secret".to_string(),
            })
            .await
            .unwrap();
        repo.activate(sub.id, 3600, Utc::now() + Duration::seconds(3600))
            .await
            .unwrap();

        let body = b"notification";
        let mut mac = Hmac::<Sha512>::new_from_slice(b"secret").unwrap();
        mac.update(body);
        let header = format!("sha512={}", hex::encode(mac.finalize().into_bytes()));
        assert!(manager
            .verify_signature(feed.id, Some(&header), body)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_renew_failure_demotes_to_polling() {
        let db = setup_db().await;
        let config = test_config();
        let manager = WebSubManager::new(db.pool(), &config).unwrap();
        let feed = create_feed_with_hub(&db).await;

        let repo = PushSubscriptionRepository::new(db.pool());
        let sub = repo
            .upsert_pending(&NewPushSubscription {
                feed_id: feed.id,
                hub_url: "https://hub.invalid/".to_string(),
                topic_url: "https://example.com/feed.xml".to_string(),
                callback_secret: "secret".to_string(),
            })
            .await
            .unwrap();
        repo.activate(sub.id, 3600, Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        FeedRepository::new(db.pool())
            .set_push_active(feed.id, true)
            .await
            .unwrap();

        // The hub is unreachable, so the renewal must fail cleanly
        let report = manager.renew_expiring_subscriptions(24).await.unwrap();
        assert_eq!(report, RenewalReport { renewed: 0, failed: 1 });

        let sub = repo.get_by_id(sub.id).await.unwrap().unwrap();
        assert_eq!(sub.state, PushSubscriptionState::Unsubscribed);

        let feed = FeedRepository::new(db.pool())
            .get_by_id(feed.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!feed.push_active);
    }

    #[tokio::test]
    async fn test_renew_with_nothing_expiring() {
        let db = setup_db().await;
        let config = test_config();
        let manager = WebSubManager::new(db.pool(), &config).unwrap();

        let report = manager.renew_expiring_subscriptions(24).await.unwrap();
        assert_eq!(report, RenewalReport::default());
    }

    #[tokio::test]
    async fn test_deactivate_websub() {
        let db = setup_db().await;
        let config = test_config();
        let manager = WebSubManager::new(db.pool(), &config).unwrap();
        let feed = create_feed_with_hub(&db).await;

        let repo = PushSubscriptionRepository::new(db.pool());
        let sub = repo
            .upsert_pending(&NewPushSubscription {
                feed_id: feed.id,
                hub_url: "https://hub.invalid/".to_string(),
                topic_url: "https://example.com/feed.xml".to_string(),
                callback_secret: "secret".to_string(),
            })
            .await
            .unwrap();
        repo.activate(sub.id, 3600, Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        FeedRepository::new(db.pool())
            .set_push_active(feed.id, true)
            .await
            .unwrap();

        assert!(manager.deactivate_websub(feed.id).await.unwrap());

        let sub = repo.get_by_id(sub.id).await.unwrap().unwrap();
        assert_eq!(sub.state, PushSubscriptionState::Unsubscribed);
        assert!(sub.unsubscribe_requested_at.is_some());

        let feed = FeedRepository::new(db.pool())
            .get_by_id(feed.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!feed.push_active);

        // Idempotent on an already-unsubscribed row
        assert!(!manager.deactivate_websub(feed.id).await.unwrap());
    }

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncate_error() {
        let long = "x".repeat(500);
        assert_eq!(truncate_error(&long).len(), MAX_ERROR_BODY_LEN);
        assert_eq!(truncate_error("short"), "short");
    }
}
