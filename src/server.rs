use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::handlers;
use crate::metrics::stream;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router` with all routes, middleware, and static serving.
pub fn create_router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.static_dir.clone();

    Router::new()
        // ── Probe channel ───────────────────────────────────────
        .route("/ws", get(handlers::ws::ws_handler))
        // ── Session registry ────────────────────────────────────
        .route(
            "/api/users",
            get(handlers::users::list_users).post(handlers::users::create_user),
        )
        .route("/api/users/:id", get(handlers::users::get_user))
        .route("/api/users/:id/name", get(handlers::users::get_user_name))
        .route("/api/users/:id/results", post(handlers::users::log_result))
        // ── Metrics ─────────────────────────────────────────────
        .route("/api/metrics", get(stream::get_metrics))
        .route("/api/metrics/stream", get(stream::metrics_stream))
        .with_state(state)
        // ── Browser prober page ─────────────────────────────────
        .fallback_service(ServeDir::new(static_dir))
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::create_router;
    use crate::config::ServerConfig;
    use crate::AppState;

    #[tokio::test]
    async fn browser_page_fails_runs_instead_of_hanging() {
        let app = create_router(AppState::new(ServerConfig::default()));

        let req = Request::builder().uri("/index.html").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let page = String::from_utf8(bytes.to_vec()).unwrap();

        // Each echo wait is bounded and a dropped socket rejects every pending run.
        assert!(page.contains("ECHO_TIMEOUT_MS"));
        assert!(page.contains("socket.onclose"));
        assert!(page.contains("inbox.reject("));
        assert!(page.contains("Test failed:"));
    }
}
