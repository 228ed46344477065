//! Shared domain types for the exam lab platform.
//!
//! Everything here is plain data consumed by the other crates: candidate
//! records and answer sets, session identifiers and container naming,
//! slug/token minting, and the exam timer arithmetic. No I/O happens in this
//! crate.

pub mod candidate;
pub mod ids;
pub mod timer;

pub use candidate::{AnswerSet, Candidate, FinalSnapshot, TaskTokens};
pub use ids::{make_slug, make_token, SessionId, CONTAINER_PREFIX};
pub use timer::{TimerStatus, BASE_EXAM_DURATION_MS};
