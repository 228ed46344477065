//! Candidate-facing endpoints: profile, exam start, answers, submission,
//! final work upload.

use crate::auth::{require_admin, require_candidate, AuthSession};
use crate::error::{ApiError, ApiResult};
use crate::models::{CandidateView, SaveAnswersRequest, SaveAnswersResponse};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use examlab_core::FinalSnapshot;
use examlab_state_store::{UploadRecord, UploadedFile};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

fn own_email(session: &AuthSession) -> ApiResult<String> {
    session
        .email
        .clone()
        .ok_or_else(|| ApiError::Unauthorized("candidate required".to_string()))
}

pub async fn get_candidate(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> ApiResult<Json<CandidateView>> {
    let s = state.store.read();
    let c = s
        .find_candidate(&email)
        .ok_or_else(|| ApiError::NotFound("not found".to_string()))?;
    Ok(Json(CandidateView::from_candidate(c, AppState::now_ms())))
}

#[derive(Deserialize)]
pub struct StartQuery {
    #[serde(default)]
    pub myself: bool,
}

/// Start the exam clock. Admins may start anyone; a candidate may start
/// their own with `?myself=true`. Starting twice is reported, not an error.
pub async fn start_exam(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
    Query(q): Query<StartQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let allowed = require_admin(&state, &headers).is_ok()
        || (q.myself
            && require_candidate(&state, &headers)
                .ok()
                .and_then(|s| s.email)
                .is_some_and(|e| e.eq_ignore_ascii_case(&email)));
    if !allowed {
        return Err(ApiError::Unauthorized(
            "admin or self start required".to_string(),
        ));
    }

    let now = AppState::now_ms();
    let (candidate, already) = state.store.mutate(|s| {
        let Some(c) = s.find_candidate_mut(&email) else {
            return (None, false);
        };
        if c.start_time.is_some() {
            return (Some(c.clone()), true);
        }
        c.start_time = Some(now);
        (Some(c.clone()), false)
    })?;

    let candidate = candidate.ok_or_else(|| ApiError::NotFound("not found".to_string()))?;
    info!(email = %candidate.email, already, "exam started");
    Ok(Json(json!({
        "ok": true,
        "already": already,
        "candidate": CandidateView::from_candidate(&candidate, now),
    })))
}

/// Merge-save answers for one task. Refused once the candidate is locked
/// (submitted or out of time).
pub async fn save_answers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SaveAnswersRequest>,
) -> ApiResult<Json<SaveAnswersResponse>> {
    let session = require_candidate(&state, &headers)?;
    let email = own_email(&session)?;
    if req.task_id.is_empty() {
        return Err(ApiError::BadRequest("task_id required".to_string()));
    }

    let now = AppState::now_ms();
    let updated = state.store.mutate(|s| {
        let locked = match s.find_candidate(&email) {
            Some(c) => c.locked(now),
            None => return None,
        };
        if locked {
            return None;
        }
        let answers = s.answers_for_mut(&email);
        let entry = answers.entry(req.task_id.clone()).or_default();
        entry.merge(req.fields.clone(), now);
        Some(entry.clone())
    })?;

    let answer =
        updated.ok_or_else(|| ApiError::NotFound("candidate not found or locked".to_string()))?;
    Ok(Json(SaveAnswersResponse {
        ok: true,
        task_id: req.task_id,
        answer,
    }))
}

pub async fn my_answers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let session = require_candidate(&state, &headers)?;
    let email = own_email(&session)?;
    let s = state.store.read();
    if s.find_candidate(&email).is_none() {
        return Err(ApiError::NotFound("candidate not found".to_string()));
    }
    Ok(Json(json!({ "ok": true, "answers": s.answers_for(&email) })))
}

/// Final submission: sets `submitted_at` once and freezes a snapshot of the
/// answers as they stood. Re-submitting returns the original timestamp.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let session = require_candidate(&state, &headers)?;
    let email = own_email(&session)?;
    let now = AppState::now_ms();

    let submitted_at = state.store.mutate(|s| {
        let answers = s.answers_for(&email);
        let key = {
            let c = s.find_candidate_mut(&email)?;
            if let Some(at) = c.submitted_at {
                return Some(at);
            }
            c.submitted_at = Some(now);
            c.email.clone()
        };
        s.final_snapshots.insert(
            key,
            FinalSnapshot {
                created_at: now,
                answers,
            },
        );
        Some(now)
    })?;

    let submitted_at =
        submitted_at.ok_or_else(|| ApiError::NotFound("candidate not found".to_string()))?;
    info!(email = %email, submitted_at, "final submission");
    Ok(Json(json!({ "ok": true, "submitted_at": submitted_at })))
}

#[derive(Deserialize)]
pub struct UploadQuery {
    pub field: String,
    pub filename: String,
}

/// Raw-body upload of the candidate's final work file. The file lands in
/// the upload directory named `<email>_final_<ts>.<ext>` and is recorded in
/// the state document.
pub async fn upload_final(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let session = require_candidate(&state, &headers)?;
    let email = own_email(&session)?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty upload".to_string()));
    }
    let ext = q
        .filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_lowercase())
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()) && !e.is_empty())
        .ok_or_else(|| ApiError::BadRequest("filename with extension required".to_string()))?;

    let now = AppState::now_ms();
    let stored = format!("{email}_final_{now}.{ext}");
    std::fs::create_dir_all(&state.config.upload_dir)
        .and_then(|_| std::fs::write(state.config.upload_dir.join(&stored), &body))
        .map_err(|e| ApiError::Internal(format!("upload write failed: {e}")))?;

    let size = body.len() as u64;
    state.store.mutate(|s| {
        let record = s.uploads.entry(email.clone()).or_insert(UploadRecord {
            time: now,
            files: Vec::new(),
        });
        record.time = now;
        record.files.push(UploadedFile {
            field: q.field.clone(),
            name: stored.clone(),
            size,
        });
    })?;

    info!(email = %email, file = %stored, size, "final work uploaded");
    Ok(Json(json!({ "ok": true, "file": stored, "size": size })))
}

/// Public (unauthenticated) slug lookup used by grader links.
pub async fn public_slug_info(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> ApiResult<Json<Value>> {
    let s = state.store.read();
    let c = s
        .find_by_slug(&slug)
        .ok_or_else(|| ApiError::NotFound("not found".to_string()))?;
    Ok(Json(json!({ "email": c.email, "slug": slug })))
}

/// Public sanitized answers view for a slug: task fields and timestamps
/// only, nothing about the candidate beyond their email.
pub async fn public_slug_answers(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> ApiResult<Json<Value>> {
    let s = state.store.read();
    let c = s
        .find_by_slug(&slug)
        .ok_or_else(|| ApiError::NotFound("not found".to_string()))?;
    let answers = s.answers_for(&c.email);
    Ok(Json(json!({ "slug": slug, "email": c.email, "answers": answers })))
}
