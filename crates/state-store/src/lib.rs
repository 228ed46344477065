//! Versioned JSON state store.
//!
//! The platform's durable state (candidates, answers, simulation fixtures,
//! admin config) lives in a single JSON document. Unlike the usual
//! read-modify-write-the-whole-file pattern, every persisted document carries
//! a monotonically increasing version, writes are atomic
//! (temp file + rename), and mutations run through a compare-and-swap loop:
//! a writer that observes version `v` commits `v + 1` or retries against the
//! newer document. Two admins extending time for different candidates can
//! therefore never silently drop each other's update.

pub mod model;
pub mod store;

pub use model::{ExamState, IamUser, PolicyDoc, UploadRecord, UploadedFile};
pub use store::{StateStore, StoreError, StoreResult};
