//! The persisted state document.
//!
//! Every field is defaultable so documents written by older builds keep
//! loading; additions only ever come with `#[serde(default)]`.

use examlab_core::{AnswerSet, Candidate, FinalSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Root state document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExamState {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// email -> task id -> answers
    #[serde(default)]
    pub answers: BTreeMap<String, BTreeMap<String, AnswerSet>>,
    /// email -> snapshot taken at final submission
    #[serde(default)]
    pub final_snapshots: BTreeMap<String, FinalSnapshot>,
    /// IAM simulation: user -> roles
    #[serde(default)]
    pub iam: BTreeMap<String, IamUser>,
    /// Gateway policy simulation
    #[serde(default)]
    pub policy: PolicyDoc,
    /// Admin config: notification recipients (comma separated)
    #[serde(default)]
    pub recipients: String,
    /// Admin config: on-call staff email
    #[serde(default)]
    pub on_call: String,
    /// email -> final file upload record
    #[serde(default)]
    pub uploads: BTreeMap<String, UploadRecord>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IamUser {
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolicyDoc {
    /// Request paths denied by the simulated gateway policy.
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadRecord {
    pub time: i64,
    pub files: Vec<UploadedFile>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadedFile {
    pub field: String,
    pub name: String,
    pub size: u64,
}

impl ExamState {
    pub fn find_candidate(&self, email: &str) -> Option<&Candidate> {
        let email = email.to_lowercase();
        self.candidates.iter().find(|c| c.email == email)
    }

    pub fn find_candidate_mut(&mut self, email: &str) -> Option<&mut Candidate> {
        let email = email.to_lowercase();
        self.candidates.iter_mut().find(|c| c.email == email)
    }

    pub fn find_by_slug(&self, slug: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.slug.as_deref() == Some(slug))
    }

    /// All slugs currently in use, for collision-free minting.
    pub fn used_slugs(&self) -> HashSet<String> {
        self.candidates.iter().filter_map(|c| c.slug.clone()).collect()
    }

    pub fn answers_for(&self, email: &str) -> BTreeMap<String, AnswerSet> {
        self.answers.get(&email.to_lowercase()).cloned().unwrap_or_default()
    }

    pub fn answers_for_mut(&mut self, email: &str) -> &mut BTreeMap<String, AnswerSet> {
        self.answers.entry(email.to_lowercase()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_candidate_case_insensitive() {
        let mut state = ExamState::default();
        state.candidates.push(Candidate::new("User@Example.com", "U", 0));
        assert!(state.find_candidate("user@example.com").is_some());
        assert!(state.find_candidate("USER@EXAMPLE.COM").is_some());
        assert!(state.find_candidate("other@example.com").is_none());
    }

    #[test]
    fn test_old_document_loads_with_defaults() {
        let json = r#"{"candidates":[]}"#;
        let state: ExamState = serde_json::from_str(json).unwrap();
        assert!(state.iam.is_empty());
        assert!(state.policy.deny.is_empty());
        assert_eq!(state.recipients, "");
    }

    #[test]
    fn test_used_slugs() {
        let mut state = ExamState::default();
        let mut a = Candidate::new("a@x.y", "A", 0);
        a.slug = Some("slugaaaa".into());
        state.candidates.push(a);
        state.candidates.push(Candidate::new("b@x.y", "B", 0));
        assert_eq!(state.used_slugs().len(), 1);
    }
}
