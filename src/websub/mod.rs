//! WebSub push subscription management.
//!
//! Subscribing to a feed's advertised hub replaces polling with hub-pushed
//! notifications; every failure path here falls back to polling rather than
//! leaving a feed without any update channel.

pub mod manager;
pub mod repository;
pub mod types;

pub use manager::{build_hub_client, WebSubManager};
pub use repository::PushSubscriptionRepository;
pub use types::{
    NewPushSubscription, PushSubscription, PushSubscriptionState, RenewalReport,
    VerificationRequest,
};
