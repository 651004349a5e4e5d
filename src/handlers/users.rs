use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::metrics::ResultSample;
use crate::registry::UserRecord;
use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub session_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogResultRequest {
    pub avg: f64,
}

#[derive(Debug, Serialize)]
pub struct DisplayName {
    pub session_id: String,
    pub user: String,
}

// ─── GET /api/users ──────────────────────────────────────────────

pub async fn list_users(State(state): State<Arc<AppState>>) -> Json<Vec<UserRecord>> {
    Json(state.registry.list())
}

// ─── POST /api/users ─────────────────────────────────────────────

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<UserRecord>, AppError> {
    if req.session_id.trim().is_empty() {
        return Err(AppError::BadRequest("session_id must not be empty".into()));
    }

    Ok(Json(
        state
            .registry
            .get_or_create(&req.session_id, req.name.as_deref()),
    ))
}

// ─── GET /api/users/:id ──────────────────────────────────────────

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UserRecord>, AppError> {
    state
        .registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("session '{id}' not found")))
}

// ─── GET /api/users/:id/name ─────────────────────────────────────
// Creates an anonymous record for unseen ids.

pub async fn get_user_name(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<DisplayName> {
    let user = state.registry.get_display_name(&id);
    Json(DisplayName {
        session_id: id,
        user,
    })
}

// ─── POST /api/users/:id/results ─────────────────────────────────

pub async fn log_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<LogResultRequest>,
) -> Result<Json<UserRecord>, AppError> {
    let record = state.registry.log_result(&id, req.avg).map_err(|e| {
        state.metrics.record_rejected();
        AppError::from(e)
    })?;

    state.metrics.record_result(ResultSample {
        session_id: record.id.clone(),
        user: record.user.clone(),
        avg_ms: req.avg,
    });

    Ok(Json(record))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::ServerConfig;
    use crate::server::create_router;
    use crate::AppState;

    async fn call(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn app() -> (axum::Router, std::sync::Arc<AppState>) {
        let state = AppState::new(ServerConfig::default());
        (create_router(state.clone()), state)
    }

    #[tokio::test]
    async fn create_then_get_user() {
        let (app, _) = app();

        let (status, body) = call(
            app.clone(),
            "POST",
            "/api/users",
            Some(json!({"session_id": "s1", "name": "alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"], "alice");

        let (status, body) = call(app, "GET", "/api/users/s1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"], "alice");
        assert_eq!(body["latency_result"], Value::Null);
    }

    #[tokio::test]
    async fn unknown_user_is_404_and_not_created() {
        let (app, state) = app();

        let (status, body) = call(app, "GET", "/api/users/nobody", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn name_lookup_assigns_anonymous_name() {
        let (app, state) = app();

        let (status, body) = call(app, "GET", "/api/users/s9/name", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"], "anonymous1");
        assert_eq!(state.registry.len(), 1);
    }

    #[tokio::test]
    async fn logging_result_updates_record_and_metrics() {
        let (app, state) = app();

        let (status, body) = call(
            app,
            "POST",
            "/api/users/s1/results",
            Some(json!({"avg": 20})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["latency_result"], 20.0);
        assert_eq!(state.metrics.snapshot().total_results, 1);
    }

    #[tokio::test]
    async fn negative_result_is_bad_request() {
        let (app, state) = app();

        let (status, _) = call(
            app,
            "POST",
            "/api/users/s1/results",
            Some(json!({"avg": -3})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.metrics.snapshot().total_rejected, 1);
        assert!(state.registry.get("s1").is_none());
    }
}
