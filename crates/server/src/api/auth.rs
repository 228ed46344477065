//! Login and logout.

use crate::auth::{bearer, Role};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    AdminLoginRequest, AdminLoginResponse, CandidateLoginRequest, CandidateLoginResponse,
    CandidateView,
};
use crate::staff::resolve_username;
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

fn plausible_email(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        _ => false,
    }
}

/// Candidate login: upsert by email, mint slug and task tokens on first
/// contact, and hand back a bearer token plus the timer view.
pub async fn candidate_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CandidateLoginRequest>,
) -> ApiResult<Json<CandidateLoginResponse>> {
    if !plausible_email(&req.email) {
        return Err(ApiError::BadRequest("invalid email".to_string()));
    }
    let now = AppState::now_ms();

    let candidate = state.store.mutate(|s| {
        let used = s.used_slugs();
        if s.find_candidate(&req.email).is_none() {
            s.candidates
                .push(examlab_core::Candidate::new(&req.email, &req.name, now));
        }
        let c = s.find_candidate_mut(&req.email).expect("just inserted");
        // A returning candidate keeps their original name unless it was empty.
        if c.name.is_empty() && !req.name.trim().is_empty() {
            c.name = req.name.trim().chars().take(120).collect();
        }
        c.ensure_identity(&used);
        c.clone()
    })?;

    let token = state
        .auth
        .issue(Role::Candidate, Some(candidate.email.clone()));
    info!(email = %candidate.email, slug = ?candidate.slug, "candidate logged in");
    Ok(Json(CandidateLoginResponse {
        token,
        candidate: CandidateView::from_candidate(&candidate, now),
    }))
}

/// Admin login against the shared password; the username resolves to a
/// staff-directory email for attribution.
pub async fn admin_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdminLoginRequest>,
) -> ApiResult<Json<AdminLoginResponse>> {
    if req.password != state.config.admin_password {
        return Err(ApiError::Unauthorized("bad password".to_string()));
    }
    let user = if req.username.is_empty() {
        String::new()
    } else {
        resolve_username(&state.staff, &req.username)
    };
    let token = state.auth.issue(
        Role::Admin,
        (!user.is_empty()).then(|| user.clone()),
    );
    info!(user = %user, "admin logged in");
    Ok(Json(AdminLoginResponse { token, user }))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    if let Some(token) = bearer(&headers) {
        state.auth.revoke(&token);
    }
    Ok(Json(json!({ "ok": true })))
}
