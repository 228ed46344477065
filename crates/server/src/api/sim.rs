//! Canned simulation endpoints exam tasks point at.
//!
//! The gateway, IAM, and policy endpoints intentionally stay simple: their
//! behavior IS the exam content (candidates probe them with curl and read
//! headers and status codes), so nothing here should become clever.

use crate::error::{ApiError, ApiResult};
use crate::models::{IamGrantRequest, PolicyRequest};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use examlab_state_store::PolicyDoc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Trace header candidates are asked to find with curl -v.
const TRACE_HEADER: &str = "X-Lab-Trace";
const TRACE_VALUE: &str = "LAB-QGZK7V";

const MAX_DELAY_MS: u64 = 10_000;

fn traced(status: StatusCode, body: &'static str) -> Response {
    (status, [(TRACE_HEADER, TRACE_VALUE)], body).into_response()
}

pub async fn gateway_ok() -> Response {
    traced(StatusCode::OK, "OK")
}

pub async fn gateway_forbidden() -> Response {
    traced(StatusCode::FORBIDDEN, "Forbidden")
}

pub async fn gateway_bad() -> Response {
    traced(StatusCode::BAD_GATEWAY, "Bad Gateway")
}

pub async fn gateway_delay(Path(ms): Path<u64>) -> Response {
    let ms = ms.min(MAX_DELAY_MS);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    (
        [(TRACE_HEADER, TRACE_VALUE)],
        format!("Delayed {ms}ms"),
    )
        .into_response()
}

/// Admin page behind the simulated gateway; blocked when the stored policy
/// denies `/admin`.
pub async fn gateway_admin(State(state): State<Arc<AppState>>) -> Response {
    let s = state.store.read();
    if s.policy.deny.iter().any(|p| p == "/admin") {
        traced(StatusCode::FORBIDDEN, "Admin blocked by policy")
    } else {
        traced(StatusCode::OK, "Admin panel")
    }
}

pub async fn iam_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    Ok(Json(json!(state.store.read().iam)))
}

/// Grant a role; gated by the lab API key, which is itself one of the
/// things candidates have to discover.
pub async fn iam_grant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IamGrantRequest>,
) -> ApiResult<Json<Value>> {
    let key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if key != state.config.iam_api_key {
        return Err(ApiError::Unauthorized("invalid api key".to_string()));
    }
    if req.user.is_empty() || req.role.is_empty() {
        return Err(ApiError::BadRequest("user and role required".to_string()));
    }
    let iam = state.store.mutate(|s| {
        let user = s.iam.entry(req.user.clone()).or_default();
        if !user.roles.contains(&req.role) {
            user.roles.push(req.role.clone());
        }
        s.iam.clone()
    })?;
    Ok(Json(json!({ "ok": true, "iam": iam })))
}

/// Log download gated on the `student` user holding the LogReader role.
pub async fn cloud_logs(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let s = state.store.read();
    let has_role = s
        .iam
        .get("student")
        .is_some_and(|u| u.roles.iter().any(|r| r == "LogReader"));
    if !has_role {
        return Err(ApiError::Forbidden("requires LogReader role".to_string()));
    }
    let text = state
        .config
        .cloud_log_file
        .as_ref()
        .and_then(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| "(no logs)".to_string());
    Ok(([("content-type", "text/plain")], text).into_response())
}

pub async fn get_policy(State(state): State<Arc<AppState>>) -> ApiResult<Json<PolicyDoc>> {
    Ok(Json(state.store.read().policy.clone()))
}

pub async fn set_policy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PolicyRequest>,
) -> ApiResult<Json<Value>> {
    let policy = state.store.mutate(|s| {
        s.policy = PolicyDoc { deny: req.deny.clone() };
        s.policy.clone()
    })?;
    Ok(Json(json!({ "ok": true, "policy": policy })))
}

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let s = state.store.read();
    Ok(Json(json!({
        "ok": true,
        "time": AppState::now_ms(),
        "candidates": s.candidates.len(),
        "sessions": state.sessions.list().len(),
    })))
}

pub async fn ping() -> Json<Value> {
    Json(json!({ "ok": true, "time": AppState::now_ms() }))
}
