//! Lab session endpoints (admin-gated).

use crate::auth::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

fn record_view(r: &examlab_session_manager::SessionRecord) -> Value {
    json!({
        "prefix": r.prefix,
        "id": r.id,
        "candidate_email": r.candidate_email,
        "state": r.state,
        "containers": r.containers,
        "created_at": r.created_at,
        "updated_at": r.updated_at,
        "recovered": r.recovered,
    })
}

/// Provision (or resume) a lab session for a candidate.
pub async fn provision(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let email = email.to_lowercase();
    if state.store.read().find_candidate(&email).is_none() {
        return Err(ApiError::NotFound("candidate not found".to_string()));
    }
    let record = state.sessions.provision(&email).await?;
    info!(email = %email, prefix = %record.prefix, "session provisioned");
    Ok(Json(json!({ "ok": true, "session": record_view(&record) })))
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let sessions: Vec<Value> = state.sessions.list().iter().map(record_view).collect();
    Ok(Json(json!({ "total": sessions.len(), "sessions": sessions })))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(prefix): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let record = state
        .sessions
        .session(&prefix)
        .ok_or_else(|| ApiError::NotFound(format!("session {prefix}")))?;
    Ok(Json(record_view(&record)))
}

/// Snapshot every container and tear the session down. Used when a
/// candidate finishes their lab tasks.
pub async fn complete_session(
    State(state): State<Arc<AppState>>,
    Path(prefix): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let manifest = state.sessions.snapshot_and_teardown(&prefix).await?;
    Ok(Json(json!({ "ok": true, "snapshot": manifest })))
}

/// Abort a session without snapshotting.
pub async fn destroy_session(
    State(state): State<Arc<AppState>>,
    Path(prefix): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let report = state.sessions.teardown(&prefix).await?;
    Ok(Json(json!({
        "ok": report.clean(),
        "removed": report.removed,
        "failed": report.failed,
    })))
}
