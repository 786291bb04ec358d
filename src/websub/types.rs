//! Push subscription types for feedpulse.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// State of a push-hub registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushSubscriptionState {
    /// Subscribe request sent; awaiting the hub's verification challenge.
    Pending,
    /// Verified by the hub; notifications are trusted until the lease expires.
    Active,
    /// Ended, either by our request or by the hub.
    Unsubscribed,
}

impl PushSubscriptionState {
    /// Stable string form for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            PushSubscriptionState::Pending => "pending",
            PushSubscriptionState::Active => "active",
            PushSubscriptionState::Unsubscribed => "unsubscribed",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Option<PushSubscriptionState> {
        match s {
            "pending" => Some(PushSubscriptionState::Pending),
            "active" => Some(PushSubscriptionState::Active),
            "unsubscribed" => Some(PushSubscriptionState::Unsubscribed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PushSubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a push-hub registration for one feed+hub pair.
#[derive(Debug, Clone)]
pub struct PushSubscription {
    /// Row ID.
    pub id: i64,
    /// Feed this registration belongs to.
    pub feed_id: i64,
    /// Hub endpoint the registration was made against.
    pub hub_url: String,
    /// Canonical feed URL the hub tracks changes for.
    pub topic_url: String,
    /// Per-subscription random secret (32 bytes, hex-encoded).
    pub callback_secret: String,
    /// Protocol state.
    pub state: PushSubscriptionState,
    /// Lease duration granted by the hub.
    pub lease_seconds: Option<i64>,
    /// When the lease expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the hub last completed a verification challenge.
    pub last_challenge_at: Option<DateTime<Utc>>,
    /// Last protocol or transport error.
    pub last_error: Option<String>,
    /// Set when we asked for the unsubscribe; a hub-confirmed unsubscribe
    /// without this set was initiated by the hub.
    pub unsubscribe_requested_at: Option<DateTime<Utc>>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl PushSubscription {
    /// Whether this subscription is currently trusted for notifications.
    pub fn is_active(&self) -> bool {
        self.state == PushSubscriptionState::Active
    }
}

/// New push subscription for the pending-row upsert.
#[derive(Debug, Clone)]
pub struct NewPushSubscription {
    /// Feed ID.
    pub feed_id: i64,
    /// Hub endpoint.
    pub hub_url: String,
    /// Topic URL to register.
    pub topic_url: String,
    /// Fresh callback secret.
    pub callback_secret: String,
}

/// Parameters of a hub verification GET, as they arrive on the callback.
///
/// All fields are optional at the wire level; the manager validates
/// presence before acting on them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerificationRequest {
    /// "subscribe" or "unsubscribe".
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    /// Topic URL the hub verified.
    #[serde(rename = "hub.topic")]
    pub topic: Option<String>,
    /// Token to echo back verbatim as the response body.
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    /// Lease duration the hub granted.
    #[serde(rename = "hub.lease_seconds")]
    pub lease_seconds: Option<i64>,
}

impl VerificationRequest {
    /// A subscribe-mode verification request.
    pub fn subscribe(
        topic: impl Into<String>,
        challenge: impl Into<String>,
        lease_seconds: i64,
    ) -> Self {
        Self {
            mode: Some("subscribe".to_string()),
            topic: Some(topic.into()),
            challenge: Some(challenge.into()),
            lease_seconds: Some(lease_seconds),
        }
    }

    /// An unsubscribe-mode verification request.
    pub fn unsubscribe(topic: impl Into<String>, challenge: impl Into<String>) -> Self {
        Self {
            mode: Some("unsubscribe".to_string()),
            topic: Some(topic.into()),
            challenge: Some(challenge.into()),
            lease_seconds: None,
        }
    }
}

/// Result of a renewal sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalReport {
    /// Subscriptions for which the hub accepted a new subscribe request.
    pub renewed: usize,
    /// Subscriptions demoted back to polling after a failed renewal.
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            PushSubscriptionState::Pending,
            PushSubscriptionState::Active,
            PushSubscriptionState::Unsubscribed,
        ] {
            assert_eq!(PushSubscriptionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(PushSubscriptionState::parse("unknown"), None);
    }

    #[test]
    fn test_verification_request_builders() {
        let req = VerificationRequest::subscribe("https://example.com/feed.xml", "tok", 3600);
        assert_eq!(req.mode.as_deref(), Some("subscribe"));
        assert_eq!(req.lease_seconds, Some(3600));

        let req = VerificationRequest::unsubscribe("https://example.com/feed.xml", "tok");
        assert_eq!(req.mode.as_deref(), Some("unsubscribe"));
        assert!(req.lease_seconds.is_none());
    }

    #[test]
    fn test_default_request_is_empty() {
        let req = VerificationRequest::default();
        assert!(req.mode.is_none());
        assert!(req.topic.is_none());
        assert!(req.challenge.is_none());
        assert!(req.lease_seconds.is_none());
    }
}
