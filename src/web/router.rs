//! Router configuration for the WebSub callback listener.

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{health, websub_notify, websub_verify, AppState};

/// Create the callback listener router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/websub/callback/:feed_id",
            get(websub_verify).post(websub_notify),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebSubConfig;
    use crate::Database;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_route() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let state = Arc::new(AppState::new(db, WebSubConfig::default()).unwrap());
        let router = create_router(state);

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_challenge_for_unknown_feed_is_404() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let state = Arc::new(AppState::new(db, WebSubConfig::default()).unwrap());
        let router = create_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/websub/callback/1?hub.mode=subscribe&hub.topic=https://example.com/feed.xml&hub.challenge=tok&hub.lease_seconds=3600")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
