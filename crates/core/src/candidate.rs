//! Candidate records and answer sets.

use crate::ids::{make_slug, make_token};
use crate::timer::TimerStatus;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Per-task access tokens embedded in the candidate's tokenized hub URLs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTokens {
    pub hub: String,
    pub casestudy: String,
    pub mail: String,
    pub users: String,
    pub alerts: String,
}

impl TaskTokens {
    pub fn mint() -> Self {
        Self {
            hub: make_token(),
            casestudy: make_token(),
            mail: make_token(),
            users: make_token(),
            alerts: make_token(),
        }
    }
}

/// One exam-taker, keyed by lowercased email.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candidate {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub task_tokens: Option<TaskTokens>,
    /// Epoch millis; `None` until the exam is started.
    #[serde(default)]
    pub start_time: Option<i64>,
    pub created_at: i64,
    #[serde(default)]
    pub extra_time_ms: i64,
    #[serde(default)]
    pub submitted_at: Option<i64>,
}

impl Candidate {
    pub fn new(email: &str, name: &str, now_ms: i64) -> Self {
        Self {
            email: email.to_lowercase(),
            name: name.trim().chars().take(120).collect(),
            slug: None,
            task_tokens: None,
            start_time: None,
            created_at: now_ms,
            extra_time_ms: 0,
            submitted_at: None,
        }
    }

    pub fn timer(&self, now_ms: i64) -> TimerStatus {
        TimerStatus::compute(self.start_time, self.extra_time_ms, now_ms)
    }

    /// A locked candidate can no longer modify answers: either the final
    /// submission happened or the timer ran out.
    pub fn locked(&self, now_ms: i64) -> bool {
        self.submitted_at.is_some() || self.timer(now_ms).expired()
    }

    /// Assign a slug avoiding collisions with `used`, and mint task tokens.
    /// Idempotent: an already-provisioned candidate is left untouched.
    pub fn ensure_identity(&mut self, used: &HashSet<String>) {
        if self.slug.is_none() {
            let mut slug = make_slug();
            while used.contains(&slug) {
                slug = make_slug();
            }
            self.slug = Some(slug);
        }
        if self.task_tokens.is_none() {
            self.task_tokens = Some(TaskTokens::mint());
        }
    }
}

/// Saved fields for one task. Saves merge rather than replace so partial
/// autosaves from different form sections cannot clobber each other.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerSet {
    pub updated_at: i64,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl AnswerSet {
    pub fn merge(&mut self, fields: BTreeMap<String, serde_json::Value>, now_ms: i64) {
        self.fields.extend(fields);
        self.updated_at = now_ms;
    }
}

/// Immutable copy of a candidate's answers taken at final submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalSnapshot {
    pub created_at: i64,
    pub answers: BTreeMap<String, AnswerSet>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::BASE_EXAM_DURATION_MS;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_candidate_normalizes_email_and_name() {
        let c = Candidate::new("User@Example.COM", &"  long name  ".repeat(20), 0);
        assert_eq!(c.email, "user@example.com");
        assert!(c.name.chars().count() <= 120);
    }

    #[test]
    fn test_ensure_identity_idempotent() {
        let mut c = Candidate::new("a@b.c", "A", 0);
        c.ensure_identity(&HashSet::new());
        let slug = c.slug.clone();
        let tokens = c.task_tokens.clone();
        c.ensure_identity(&HashSet::new());
        assert_eq!(c.slug, slug);
        assert_eq!(c.task_tokens, tokens);
    }

    #[test]
    fn test_ensure_identity_avoids_collisions() {
        let mut c = Candidate::new("a@b.c", "A", 0);
        // Can't force rand to collide, but an empty used-set must produce a slug.
        c.ensure_identity(&HashSet::new());
        assert_eq!(c.slug.as_ref().unwrap().len(), 12);
    }

    #[test]
    fn test_loads_documents_with_retired_fields() {
        // State files written by earlier builds carry extra keys; they must
        // still deserialize.
        let json = r#"{
            "email": "a@b.c",
            "name": "A",
            "start_time": 100,
            "end_time": 200,
            "created_at": 1
        }"#;
        let c: Candidate = serde_json::from_str(json).unwrap();
        assert_eq!(c.start_time, Some(100));
        assert_eq!(c.created_at, 1);
    }

    #[test]
    fn test_locked_by_submission_and_expiry() {
        let mut c = Candidate::new("a@b.c", "A", 0);
        assert!(!c.locked(0));
        c.start_time = Some(0);
        assert!(!c.locked(10));
        assert!(c.locked(BASE_EXAM_DURATION_MS + 1));
        c.start_time = None;
        c.submitted_at = Some(5);
        assert!(c.locked(10));
    }

    #[test]
    fn test_answer_merge_keeps_existing_fields() {
        let mut a = AnswerSet::default();
        a.merge(fields(&[("q1", "one"), ("q2", "two")]), 10);
        a.merge(fields(&[("q2", "revised")]), 20);
        assert_eq!(a.updated_at, 20);
        assert_eq!(a.fields["q1"], "one");
        assert_eq!(a.fields["q2"], "revised");
    }
}
