// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - HTTP API
 * axum router over the shared application state: scan session CRUD, bulk
 * analysis control, rules configuration and the live WebSocket event feed
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::broadcast::JobRegistry;
use crate::bulk::BulkAnalysisOrchestrator;
use crate::config::{CustomRule, RulesConfig};
use crate::errors::HunterError;
use crate::runner::ScanRunner;
use crate::store::SessionStore;
use crate::types::ScanConfig;

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub registry: Arc<JobRegistry>,
    pub runner: Arc<ScanRunner>,
    pub bulk: Arc<BulkAnalysisOrchestrator>,
    pub rules: Arc<RulesConfig>,
}

/// API error envelope. Maps the library taxonomy onto HTTP status codes.
struct ApiError(HunterError);

impl From<HunterError> for ApiError {
    fn from(err: HunterError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn status_for(err: &HunterError) -> StatusCode {
    match err {
        HunterError::NotFound(_) => StatusCode::NOT_FOUND,
        HunterError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
        HunterError::Config(_) | HunterError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/scans", post(create_scan).get(list_scans))
        .route("/api/scans/:id", get(get_scan).delete(delete_scan))
        .route("/api/scans/:id/stop", post(stop_scan))
        .route("/api/scans/:id/items", get(list_items))
        .route("/api/analysis/bulk/:id", post(launch_bulk).get(bulk_stats))
        .route("/api/analysis/bulk/:id/stop", post(stop_bulk))
        .route("/api/rules", get(get_rules))
        .route("/api/rules/toggle", post(toggle_ruleset))
        .route("/api/rules/custom", post(add_custom_rule))
        .route("/api/rules/custom/:id", delete(remove_custom_rule))
        .route("/ws/scans/:id", get(scan_events_ws))
        .with_state(state)
}

/// Bind and serve until the process is told to shut down.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct CreateScanResponse {
    session_id: u64,
    ws_url: String,
}

async fn create_scan(
    State(state): State<AppState>,
    Json(config): Json<ScanConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let config = config.normalized_for_abandoned();
    let session_id = state.runner.start(config).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateScanResponse {
            session_id,
            ws_url: format!("/ws/scans/{session_id}"),
        }),
    ))
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_scans(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let sessions = state
        .store
        .sessions(query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await;
    Json(sessions)
}

async fn get_scan(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.store.session(id).await?;
    Ok(Json(session))
}

async fn stop_scan(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.session(id).await?;
    if state.runner.stop(id) {
        Ok(Json(json!({ "stopping": true })))
    } else {
        // The session exists but nothing is running: a state conflict, not a
        // malformed request.
        Err(HunterError::ConcurrencyConflict(format!("no scan running for session {id}")).into())
    }
}

async fn delete_scan(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    // A still-running job is told to stop first; the delete cascades to
    // items and the bulk record either way.
    state.runner.stop(id);
    state.bulk.stop(id).ok();
    if state.store.delete_session(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HunterError::NotFound(format!("scan session {id}")).into())
    }
}

async fn list_items(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state.store.items(id).await?;
    Ok(Json(items))
}

async fn launch_bulk(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    state.bulk.launch(id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "launched": true }))))
}

async fn stop_bulk(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    state.bulk.stop(id)?;
    Ok(Json(json!({ "stopping": true })))
}

async fn bulk_stats(State(state): State<AppState>, Path(id): Path<u64>) -> impl IntoResponse {
    Json(state.bulk.stats(id).await)
}

async fn get_rules(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "rulesets": state.rules.rulesets(),
        "custom_rules": state.rules.custom_rules(),
    }))
}

#[derive(Deserialize)]
struct ToggleRequest {
    id: String,
}

async fn toggle_ruleset(
    State(state): State<AppState>,
    Json(request): Json<ToggleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let enabled = state
        .rules
        .toggle_ruleset(&request.id)
        .map_err(|err| HunterError::Config(err.to_string()))?;
    Ok(Json(json!({ "id": request.id, "enabled": enabled })))
}

async fn add_custom_rule(
    State(state): State<AppState>,
    Json(rule): Json<CustomRule>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .rules
        .add_custom_rule(rule)
        .map_err(|err| HunterError::Config(err.to_string()))?;
    Ok(StatusCode::CREATED)
}

async fn remove_custom_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state
        .rules
        .remove_custom_rule(&id)
        .map_err(|err| HunterError::Config(err.to_string()))?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HunterError::NotFound(format!("custom rule {id}")).into())
    }
}

/// Live event feed for one session. Forwards broadcast events as JSON text
/// frames until the socket closes or the observer lags out entirely.
async fn scan_events_ws(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| forward_events(state, id, socket))
}

async fn forward_events(state: AppState, session_id: u64, mut socket: WebSocket) {
    let mut rx = state.registry.attach(session_id);
    debug!("WebSocket observer attached to session {}", session_id);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Ok(payload) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                // A lagged observer loses oldest events but stays attached.
                Err(RecvError::Lagged(skipped)) => {
                    debug!(
                        "Observer of session {} lagged, {} event(s) dropped",
                        session_id, skipped
                    );
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
    debug!("WebSocket observer detached from session {}", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(&HunterError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&HunterError::ConcurrencyConflict("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&HunterError::Config("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&HunterError::InvalidTransition {
                from: "Pending".into(),
                to: "Merged".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&HunterError::Store(StoreError::Io(std::io::Error::other("io")))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_partial_scan_config_body() {
        // Requests may supply any subset of config fields.
        let config: ScanConfig = serde_json::from_str(r#"{"abandoned": true}"#).unwrap();
        let config = config.normalized_for_abandoned();
        assert_eq!(config.pages, 100);
        assert_eq!(config.min_installs, 1000);
    }
}
