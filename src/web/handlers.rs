//! HTTP handlers for the WebSub callback listener.
//!
//! The route layer translates between HTTP and the push-subscription
//! manager's plain arguments; no framework types cross that boundary. A
//! failed verification is answered with 202 and the notification silently
//! discarded so a confused hub does not retry-storm us; polling covers the
//! missed update either way.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::WebSubConfig;
use crate::db::Database;
use crate::jobs::JobRepository;
use crate::websub::{build_hub_client, VerificationRequest, WebSubManager};
use crate::Result;

/// Shared state for the callback listener.
pub struct AppState {
    /// Database handle.
    pub db: Arc<Database>,
    /// WebSub configuration, threaded in at construction time.
    pub websub: WebSubConfig,
    /// Client for hub requests, shared across handlers.
    pub hub_client: reqwest::Client,
}

impl AppState {
    /// Create the listener state.
    pub fn new(db: Arc<Database>, websub: WebSubConfig) -> Result<Self> {
        Ok(Self {
            db,
            websub,
            hub_client: build_hub_client()?,
        })
    }

    fn manager(&self) -> WebSubManager<'_> {
        WebSubManager::with_client(self.db.pool(), &self.websub, self.hub_client.clone())
    }
}

/// GET /websub/callback/:feed_id - hub verification challenge.
///
/// The challenge token is echoed back verbatim as the response body; that
/// echo is what confirms the (un)subscribe to the hub.
pub async fn websub_verify(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
    Query(request): Query<VerificationRequest>,
) -> Response {
    match state.manager().handle_verification_challenge(feed_id, &request).await {
        Ok(challenge) => (StatusCode::OK, challenge).into_response(),
        Err(e) => {
            warn!(feed_id, "Verification challenge rejected: {}", e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// POST /websub/callback/:feed_id - hub content notification.
///
/// A valid signature schedules an immediate out-of-band fetch; the feed body
/// in the notification itself is never trusted as content.
pub async fn websub_notify(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get("x-hub-signature-256")
        .or_else(|| headers.get("x-hub-signature"))
        .and_then(|value| value.to_str().ok());

    match state.manager().verify_signature(feed_id, signature, &body).await {
        Ok(true) => {
            let jobs = JobRepository::new(state.db.pool());
            match jobs.update_feed_job_next_run(feed_id, Utc::now()).await {
                Ok(true) => debug!(feed_id, "Notification verified, fetch scheduled"),
                Ok(false) => warn!(feed_id, "Notification verified but feed has no fetch job"),
                Err(e) => error!(feed_id, "Failed to schedule fetch: {}", e),
            }
        }
        Ok(false) => {
            debug!(feed_id, "Notification with invalid signature discarded");
        }
        Err(e) => {
            error!(feed_id, "Notification verification failed: {}", e);
        }
    }

    StatusCode::ACCEPTED
}

/// GET /health - liveness check.
pub async fn health() -> &'static str {
    "OK"
}
