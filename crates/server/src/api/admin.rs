//! Admin endpoints: candidate management, time control, grading views,
//! configuration.

use crate::auth::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    AnswerExportRow, CandidateView, ConfigRequest, CreateCandidateRequest, ExtendRequest,
    ExtendResponse,
};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use examlab_core::timer::clamp_extension_minutes;
use examlab_core::Candidate;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub async fn list_candidates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let now = AppState::now_ms();
    let s = state.store.read();
    let list: Vec<CandidateView> = s
        .candidates
        .iter()
        .map(|c| CandidateView::from_candidate(c, now))
        .collect();
    Ok(Json(json!({ "total": list.len(), "candidates": list })))
}

pub async fn create_candidate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateCandidateRequest>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    if req.email.is_empty() {
        return Err(ApiError::BadRequest("email required".to_string()));
    }
    let now = AppState::now_ms();
    state.store.mutate(|s| {
        if s.find_candidate(&req.email).is_none() {
            s.candidates.push(Candidate::new(&req.email, &req.name, now));
        }
    })?;
    Ok(Json(json!({ "ok": true })))
}

/// Delete a candidate and their answers. Final snapshots are kept for audit.
pub async fn delete_candidate(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let email = email.to_lowercase();
    let removed = state.store.mutate(|s| {
        let before = s.candidates.len();
        s.candidates.retain(|c| c.email != email);
        s.answers.remove(&email);
        before != s.candidates.len()
    })?;
    if !removed {
        return Err(ApiError::NotFound("not found".to_string()));
    }
    info!(email = %email, "candidate deleted");
    Ok(Json(json!({ "ok": true })))
}

/// Grant extra time, clamped to eight hours per request.
pub async fn extend_time(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ExtendRequest>,
) -> ApiResult<Json<ExtendResponse>> {
    require_admin(&state, &headers)?;
    let minutes = clamp_extension_minutes(req.minutes)
        .ok_or_else(|| ApiError::BadRequest("minutes > 0 required".to_string()))?;

    let updated = state.store.mutate(|s| {
        let c = s.find_candidate_mut(&email)?;
        c.extra_time_ms += minutes * 60_000;
        Some(c.clone())
    })?;
    let candidate = updated.ok_or_else(|| ApiError::NotFound("not found".to_string()))?;

    let timer = candidate.timer(AppState::now_ms());
    info!(email = %candidate.email, minutes, "time extended");
    Ok(Json(ExtendResponse {
        ok: true,
        remaining_ms: timer.remaining_ms,
        total_duration_ms: timer.total_duration_ms,
    }))
}

/// Reset a candidate's timer so they can restart from zero.
pub async fn reset_timer(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let found = state.store.mutate(|s| {
        let Some(c) = s.find_candidate_mut(&email) else {
            return false;
        };
        c.start_time = None;
        true
    })?;
    if !found {
        return Err(ApiError::NotFound("not found".to_string()));
    }
    info!(email = %email, "timer reset");
    Ok(Json(json!({ "ok": true })))
}

pub async fn slug_info(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let s = state.store.read();
    let c = s
        .find_by_slug(&slug)
        .ok_or_else(|| ApiError::NotFound("not found".to_string()))?;
    Ok(Json(json!({
        "email": c.email,
        "slug": c.slug,
        "task_tokens": c.task_tokens,
        "submitted_at": c.submitted_at,
    })))
}

pub async fn candidate_answers(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let s = state.store.read();
    if s.find_candidate(&email).is_none() {
        return Err(ApiError::NotFound("candidate not found".to_string()));
    }
    Ok(Json(
        json!({ "ok": true, "email": email.to_lowercase(), "answers": s.answers_for(&email) }),
    ))
}

/// The frozen final submission for grading; 404 until the candidate submits.
pub async fn final_work(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let s = state.store.read();
    let c = s
        .find_candidate(&email)
        .ok_or_else(|| ApiError::NotFound("candidate not found".to_string()))?;
    let snapshot = s
        .final_snapshots
        .get(&c.email)
        .ok_or_else(|| ApiError::NotFound("no final submission".to_string()))?;
    Ok(Json(json!({
        "ok": true,
        "email": c.email,
        "submitted_at": c.submitted_at,
        "snapshot": snapshot,
    })))
}

/// Flat export of every saved answer, one row per (candidate, task).
pub async fn export_answers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let s = state.store.read();
    let mut rows = Vec::new();
    for (email, tasks) in &s.answers {
        for (task_id, answer) in tasks {
            rows.push(AnswerExportRow {
                email: email.clone(),
                task_id: task_id.clone(),
                updated_at: answer.updated_at,
                fields: answer.fields.clone(),
            });
        }
    }
    Ok(Json(json!({ "ok": true, "rows": rows })))
}

pub async fn get_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let s = state.store.read();
    Ok(Json(json!({ "recipients": s.recipients, "on_call": s.on_call })))
}

pub async fn set_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ConfigRequest>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    state.store.mutate(|s| {
        s.recipients = req.recipients.clone();
        s.on_call = req.on_call.clone();
    })?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn staff_directory(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let s = state.store.read();
    Ok(Json(json!({ "ok": true, "on_call": s.on_call, "staff": state.staff })))
}

/// Current on-call staff member, shown to candidates on the task pages.
/// Unauthenticated by design.
pub async fn on_call(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let s = state.store.read();
    let email = s.on_call.to_lowercase();
    if email.is_empty() {
        return Ok(Json(json!({ "ok": true, "on_call": null })));
    }
    let entry = state
        .staff
        .iter()
        .find(|m| m.email.eq_ignore_ascii_case(&email));
    let on_call = match entry {
        Some(m) => json!({ "email": m.email, "name": m.name, "phone": m.phone }),
        None => json!({ "email": email }),
    };
    Ok(Json(json!({ "ok": true, "on_call": on_call })))
}

pub async fn list_uploads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let s = state.store.read();
    Ok(Json(json!({ "ok": true, "uploads": s.uploads })))
}
