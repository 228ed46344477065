//! Route handlers, grouped by concern.

pub mod admin;
pub mod auth;
pub mod candidates;
pub mod sessions;
pub mod sim;
pub mod terminal;
