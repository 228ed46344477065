//! Session lifecycle state machine.
//!
//! Pending -> Provisioning -> Active -> Snapshotting -> TornDown, with
//! Failed reachable from any in-flight state. Transitions outside the table
//! are rejected; re-asserting the current state is a no-op so that retried
//! operations stay idempotent.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one candidate session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum SessionState {
    /// Record created, nothing provisioned yet.
    Pending,
    /// Topology reconciliation in progress.
    Provisioning,
    /// All containers up and faults seeded; terminals may attach.
    Active,
    /// Exporting container filesystems and logs.
    Snapshotting,
    /// Containers and network removed. Terminal state.
    TornDown,
    /// Provisioning or snapshotting failed; retry or teardown from here.
    Failed(String),
}

impl SessionState {
    /// Whether `from -> to` is a legal transition. Identical states are
    /// handled by [`advance`], not here.
    pub fn is_valid_transition(from: &SessionState, to: &SessionState) -> bool {
        use SessionState::*;
        matches!(
            (from, to),
            (Pending, Provisioning)
                | (Pending, TornDown)
                | (Provisioning, Active)
                | (Provisioning, Failed(_))
                | (Active, Snapshotting)
                | (Active, TornDown)
                | (Active, Failed(_))
                | (Snapshotting, TornDown)
                | (Snapshotting, Failed(_))
                | (Failed(_), Provisioning)
                | (Failed(_), TornDown)
        )
    }

    /// Sessions in these states own live containers.
    pub fn holds_containers(&self) -> bool {
        matches!(
            self,
            SessionState::Provisioning | SessionState::Active | SessionState::Snapshotting
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Pending => write!(f, "pending"),
            SessionState::Provisioning => write!(f, "provisioning"),
            SessionState::Active => write!(f, "active"),
            SessionState::Snapshotting => write!(f, "snapshotting"),
            SessionState::TornDown => write!(f, "torn_down"),
            SessionState::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

/// Apply a transition in place.
///
/// Returns `Ok(true)` when the state changed, `Ok(false)` for a no-op
/// re-assertion of the current state, and an error for anything outside the
/// table.
pub fn advance(current: &mut SessionState, to: SessionState) -> SessionResult<bool> {
    if *current == to {
        return Ok(false);
    }
    // Failed -> Failed with a different reason keeps the newest reason.
    if matches!((&*current, &to), (SessionState::Failed(_), SessionState::Failed(_))) {
        *current = to;
        return Ok(false);
    }
    if !SessionState::is_valid_transition(current, &to) {
        return Err(SessionError::InvalidTransition {
            from: current.to_string(),
            to: to.to_string(),
        });
    }
    *current = to;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut s = SessionState::Pending;
        assert!(advance(&mut s, SessionState::Provisioning).unwrap());
        assert!(advance(&mut s, SessionState::Active).unwrap());
        assert!(advance(&mut s, SessionState::Snapshotting).unwrap());
        assert!(advance(&mut s, SessionState::TornDown).unwrap());
    }

    #[test]
    fn test_reassert_is_noop() {
        let mut s = SessionState::Active;
        assert!(!advance(&mut s, SessionState::Active).unwrap());
        assert_eq!(s, SessionState::Active);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut s = SessionState::Pending;
        assert!(advance(&mut s, SessionState::Active).is_err());
        let mut s = SessionState::TornDown;
        assert!(advance(&mut s, SessionState::Provisioning).is_err());
        let mut s = SessionState::TornDown;
        assert!(advance(&mut s, SessionState::Snapshotting).is_err());
    }

    #[test]
    fn test_failed_is_retryable() {
        let mut s = SessionState::Failed("boom".into());
        assert!(advance(&mut s, SessionState::Provisioning).unwrap());
        assert_eq!(s, SessionState::Provisioning);

        let mut s = SessionState::Failed("boom".into());
        assert!(advance(&mut s, SessionState::TornDown).unwrap());
    }

    #[test]
    fn test_failed_updates_reason_quietly() {
        let mut s = SessionState::Failed("first".into());
        assert!(!advance(&mut s, SessionState::Failed("second".into())).unwrap());
        assert_eq!(s, SessionState::Failed("second".into()));
    }

    #[test]
    fn test_holds_containers() {
        assert!(SessionState::Active.holds_containers());
        assert!(SessionState::Provisioning.holds_containers());
        assert!(!SessionState::Pending.holds_containers());
        assert!(!SessionState::TornDown.holds_containers());
    }
}
