//! HTTP Ingest and API
//!
//! `POST /upload` is where the game client pushes its payloads. The
//! remaining routes expose engine status, manual control and stored
//! match history.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::core::entity::EntityId;
use crate::game::engine::{EngineError, EngineStatus, SharedEngine};
use crate::network::protocol::GsiPayload;
use crate::store::{recompute_from_rows, MatchStore, StoreError};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Live engine
    pub engine: SharedEngine,
    /// Stored history
    pub store: Arc<dyn MatchStore>,
    /// Reported by the health route
    pub version: String,
}

/// Error returned by API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Create an error with a status and message.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "status": "error", "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match e {
            StoreError::MatchNotFound(_) | StoreError::PlayerNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::new(StatusCode::CONFLICT, e.to_string())
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/api/status", get(status))
        .route("/api/health", get(health))
        .route("/api/abandon_match", post(abandon_match))
        .route("/api/matches", get(list_matches))
        .route("/api/matches/{match_id}", delete(delete_match))
        .route("/api/matches/{match_id}/changes", get(match_changes))
        .with_state(state)
}

/// Accept a payload and process it on its own task.
///
/// The client only needs to know the payload arrived; processing waits
/// for the engine lock off the request path.
async fn upload(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let payload: GsiPayload = serde_json::from_slice(&body).map_err(|e| {
        debug!("Rejected payload: {}", e);
        ApiError::new(StatusCode::BAD_REQUEST, "invalid payload")
    })?;
    let received_at = Utc::now();

    let engine = state.engine.clone();
    tokio::spawn(async move {
        let mut engine = engine.lock().await;
        engine.process_payload(&payload, received_at);
    });

    Ok(Json(json!({ "status": "ok" })))
}

async fn status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.lock().await.status())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "timestamp": Utc::now(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct AbandonRequest {
    reason: Option<String>,
}

async fn abandon_match(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: AbandonRequest = if body.is_empty() {
        AbandonRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "invalid request body"))?
    };
    let reason = request.reason.unwrap_or_else(|| "Manually abandoned".to_string());

    let abandoned = state.engine.lock().await.abandon(reason.clone(), Utc::now());
    match abandoned {
        Some(match_id) => {
            info!(match_id = %match_id, "Match abandoned by request");
            Ok(Json(json!({ "status": "ok", "match_id": match_id, "reason": reason })))
        }
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "no active match")),
    }
}

async fn list_matches(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let matches = state.store.list_matches()?;
    Ok(Json(json!({ "matches": matches })))
}

async fn delete_match(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.engine.lock().await.delete_match(&match_id).map_err(|e| {
        warn!(match_id = %match_id, "Refused to delete active match");
        ApiError::from(e)
    })?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "ok", "match_id": match_id }))))
}

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    entity_id: Option<i64>,
    limit: Option<usize>,
}

/// Change events of a match, newest first.
///
/// The active match is served from the live log; anything else is
/// recomputed from its stored snapshots.
async fn match_changes(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<Value>, ApiError> {
    let entity = query.entity_id.map(EntityId::new);

    {
        let engine = state.engine.lock().await;
        if engine.active_match().is_some_and(|m| m.match_id() == match_id) {
            let changes = engine.changes(entity, query.limit);
            return Ok(Json(json!({ "match_id": match_id, "live": true, "changes": changes })));
        }
    }

    let rows = state.store.match_snapshots(&match_id)?;
    let mut changes = recompute_from_rows(&rows)?;
    changes.reverse();
    changes.retain(|c| entity.map_or(true, |e| c.entity_id == e));
    if let Some(limit) = query.limit {
        changes.truncate(limit);
    }

    Ok(Json(json!({ "match_id": match_id, "live": false, "changes": changes })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::game::engine::LiveMatchEngine;
    use crate::network::publisher::RecordingPublisher;
    use crate::store::{InMemoryStore, PersistenceWorker};
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::Mutex;
    use tower::util::ServiceExt;

    fn app() -> (Router, AppState, PersistenceWorker) {
        let store = InMemoryStore::new();
        let (worker, handle) = PersistenceWorker::new(Arc::new(store.clone()));
        let engine = LiveMatchEngine::new(
            EngineConfig::default(),
            handle,
            Arc::new(RecordingPublisher::new()),
        );
        let state = AppState {
            engine: Arc::new(Mutex::new(engine)),
            store: Arc::new(store),
            version: "test".into(),
        };
        (router(state.clone()), state, worker)
    }

    fn roster_payload() -> String {
        let data: Vec<Value> = (1..=8)
            .map(|i| {
                json!({ "public_player_state": {
                    "account_id": 1000 + i,
                    "player_slot": i,
                    "sequence_number": 1,
                    "health": 100,
                    "level": 1,
                }})
            })
            .collect();
        json!({ "block": [ { "data": data } ] }).to_string()
    }

    async fn call(app: Router, method: &str, uri: &str, body: String) -> (StatusCode, Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    async fn wait_for_payloads(state: &AppState, count: u64) {
        for _ in 0..100 {
            if state.engine.lock().await.status().payloads_processed >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("payload was never processed");
    }

    #[tokio::test]
    async fn test_upload_starts_match() {
        let (app, state, _worker) = app();

        let (status, json) = call(app.clone(), "POST", "/upload", roster_payload()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");

        wait_for_payloads(&state, 1).await;
        let (status, json) = call(app, "GET", "/api/status", String::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["phase"], "active");
        assert_eq!(json["matches_started"], 1);
        assert_eq!(json["current_match"]["player_count"], 8);
    }

    #[tokio::test]
    async fn test_upload_rejects_garbage() {
        let (app, _state, _worker) = app();
        let (status, _) = call(app, "POST", "/upload", "not json".into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _state, _worker) = app();
        let (status, json) = call(app, "GET", "/api/health", String::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["version"], "test");
    }

    #[tokio::test]
    async fn test_abandon_and_delete() {
        let (app, state, _worker) = app();

        let (status, _) = call(app.clone(), "POST", "/api/abandon_match", String::new()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        call(app.clone(), "POST", "/upload", roster_payload()).await;
        wait_for_payloads(&state, 1).await;
        let match_id = state
            .engine
            .lock()
            .await
            .active_match()
            .map(|m| m.match_id().to_string())
            .unwrap();

        let uri = format!("/api/matches/{match_id}");
        let (status, _) = call(app.clone(), "DELETE", &uri, String::new()).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, json) = call(
            app.clone(),
            "POST",
            "/api/abandon_match",
            r#"{"reason":"test"}"#.into(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["match_id"], match_id.as_str());

        let (status, _) = call(app, "DELETE", &uri, String::new()).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_changes_for_unknown_match() {
        let (app, _state, _worker) = app();
        let (status, _) = call(app, "GET", "/api/matches/nope/changes", String::new()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_live_changes_served_from_engine() {
        let (app, state, _worker) = app();
        call(app.clone(), "POST", "/upload", roster_payload()).await;
        wait_for_payloads(&state, 1).await;

        let hit = json!({ "block": [ { "data": [ { "public_player_state": {
            "account_id": 1001, "player_slot": 1, "sequence_number": 2,
            "health": 93, "level": 1,
        }}]}]});
        call(app.clone(), "POST", "/upload", hit.to_string()).await;
        wait_for_payloads(&state, 2).await;

        let match_id = state
            .engine
            .lock()
            .await
            .active_match()
            .map(|m| m.match_id().to_string())
            .unwrap();
        let (status, json) = call(
            app,
            "GET",
            &format!("/api/matches/{match_id}/changes?entity_id=1001"),
            String::new(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["live"], true);
        assert_eq!(json["changes"][0]["type"], "hp_change");
    }
}
