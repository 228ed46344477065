//! Request and response bodies.

use examlab_core::{AnswerSet, Candidate, TaskTokens};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct CandidateLoginRequest {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CandidateView {
    pub email: String,
    pub name: String,
    pub slug: Option<String>,
    pub task_tokens: Option<TaskTokens>,
    pub start_time: Option<i64>,
    pub submitted_at: Option<i64>,
    pub remaining_ms: i64,
    pub total_duration_ms: i64,
    pub running: bool,
    pub end_time: Option<i64>,
}

impl CandidateView {
    pub fn from_candidate(c: &Candidate, now_ms: i64) -> Self {
        let timer = c.timer(now_ms);
        Self {
            email: c.email.clone(),
            name: c.name.clone(),
            slug: c.slug.clone(),
            task_tokens: c.task_tokens.clone(),
            start_time: c.start_time,
            submitted_at: c.submitted_at,
            remaining_ms: timer.remaining_ms,
            total_duration_ms: timer.total_duration_ms,
            running: timer.running,
            end_time: timer.end_time,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CandidateLoginResponse {
    pub token: String,
    pub candidate: CandidateView,
}

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    #[serde(default)]
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AdminLoginResponse {
    pub token: String,
    pub user: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCandidateRequest {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub minutes: i64,
}

#[derive(Debug, Serialize)]
pub struct ExtendResponse {
    pub ok: bool,
    pub remaining_ms: i64,
    pub total_duration_ms: i64,
}

#[derive(Debug, Deserialize)]
pub struct SaveAnswersRequest {
    pub task_id: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct SaveAnswersResponse {
    pub ok: bool,
    pub task_id: String,
    pub answer: AnswerSet,
}

#[derive(Debug, Serialize)]
pub struct AnswerExportRow {
    pub email: String,
    pub task_id: String,
    pub updated_at: i64,
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigRequest {
    #[serde(default)]
    pub recipients: String,
    #[serde(default)]
    pub on_call: String,
}

#[derive(Debug, Deserialize)]
pub struct IamGrantRequest {
    pub user: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct PolicyRequest {
    pub deny: Vec<String>,
}
