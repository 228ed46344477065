//! HTTP API for the exam lab platform.
//!
//! Everything is served from one axum router: candidate login and timers,
//! answer persistence, admin management, session provisioning, the canned
//! gateway/IAM/policy simulations the exam tasks point at, and the WebSocket
//! terminal gateway into lab containers.

pub mod api;
pub mod auth;
pub mod error;
pub mod models;
pub mod router;
pub mod staff;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use router::build_router;
pub use state::{AppState, ServerConfig};
