//! Bearer-token authentication.
//!
//! Logins mint an opaque token (a v4 uuid) mapped to a role in an in-memory
//! registry. Tokens live for the process lifetime; a restart logs everyone
//! out, which is acceptable for a proctored exam where admins are present.

use crate::error::ApiError;
use crate::state::AppState;
use axum::http::HeaderMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
    Candidate,
}

#[derive(Clone, Debug)]
pub struct AuthSession {
    pub role: Role,
    /// Candidate email or resolved admin email.
    pub email: Option<String>,
}

#[derive(Default)]
pub struct AuthRegistry {
    sessions: RwLock<HashMap<String, AuthSession>>,
}

impl AuthRegistry {
    pub fn issue(&self, role: Role, email: Option<String>) -> String {
        let token = Uuid::new_v4().to_string();
        self.sessions
            .write()
            .insert(token.clone(), AuthSession { role, email });
        token
    }

    pub fn lookup(&self, token: &str) -> Option<AuthSession> {
        self.sessions.read().get(token).cloned()
    }

    pub fn revoke(&self, token: &str) {
        self.sessions.write().remove(token);
    }
}

pub fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

pub fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<AuthSession, ApiError> {
    let token =
        bearer(headers).ok_or_else(|| ApiError::Unauthorized("admin required".to_string()))?;
    match state.auth.lookup(&token) {
        Some(session) if session.role == Role::Admin => Ok(session),
        _ => Err(ApiError::Unauthorized("admin required".to_string())),
    }
}

pub fn require_candidate(state: &AppState, headers: &HeaderMap) -> Result<AuthSession, ApiError> {
    let token =
        bearer(headers).ok_or_else(|| ApiError::Unauthorized("candidate required".to_string()))?;
    match state.auth.lookup(&token) {
        Some(session) if session.role == Role::Candidate => Ok(session),
        _ => Err(ApiError::Unauthorized("candidate required".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_lookup() {
        let reg = AuthRegistry::default();
        let token = reg.issue(Role::Admin, Some("a@b.c".into()));
        let session = reg.lookup(&token).unwrap();
        assert_eq!(session.role, Role::Admin);
        assert_eq!(session.email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn test_revoked_token_gone() {
        let reg = AuthRegistry::default();
        let token = reg.issue(Role::Candidate, None);
        reg.revoke(&token);
        assert!(reg.lookup(&token).is_none());
    }

    #[test]
    fn test_bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer(&headers).is_none());
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer abc123".parse().unwrap(),
        );
        assert_eq!(bearer(&headers).as_deref(), Some("abc123"));
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Basic abc123".parse().unwrap(),
        );
        assert!(bearer(&headers).is_none());
    }
}
