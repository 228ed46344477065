//! Route table.

use crate::api;
use crate::state::AppState;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Auth
        .route("/api/candidate/login", post(api::auth::candidate_login))
        .route("/api/auth/admin-login", post(api::auth::admin_login))
        .route("/api/auth/logout", post(api::auth::logout))
        // Candidate
        .route(
            "/api/candidate/answers",
            post(api::candidates::save_answers).get(api::candidates::my_answers),
        )
        .route("/api/candidate/submit", post(api::candidates::submit))
        .route(
            "/api/candidate/upload-final",
            post(api::candidates::upload_final),
        )
        .route("/api/candidate/:email", get(api::candidates::get_candidate))
        .route(
            "/api/candidate/:email/start",
            post(api::candidates::start_exam),
        )
        // Public grader links
        .route(
            "/public/slug/:slug/info",
            get(api::candidates::public_slug_info),
        )
        .route(
            "/public/slug/:slug/answers",
            get(api::candidates::public_slug_answers),
        )
        // Admin: candidates and grading
        .route(
            "/api/admin/candidates",
            get(api::admin::list_candidates).post(api::admin::create_candidate),
        )
        .route(
            "/api/admin/candidate/:email",
            delete(api::admin::delete_candidate),
        )
        .route(
            "/api/admin/candidate/:email/extend",
            post(api::admin::extend_time),
        )
        .route(
            "/api/admin/candidate/:email/reset",
            post(api::admin::reset_timer),
        )
        .route(
            "/api/admin/candidate/:email/answers",
            get(api::admin::candidate_answers),
        )
        .route(
            "/api/admin/candidate/:email/final-work",
            get(api::admin::final_work),
        )
        .route(
            "/api/admin/candidate/:email/session",
            post(api::sessions::provision),
        )
        .route("/api/admin/slug/:slug/info", get(api::admin::slug_info))
        .route("/api/admin/answers/export", get(api::admin::export_answers))
        .route(
            "/api/admin/config",
            get(api::admin::get_config).post(api::admin::set_config),
        )
        .route("/api/admin/staff", get(api::admin::staff_directory))
        .route("/api/admin/uploads", get(api::admin::list_uploads))
        .route("/api/oncall", get(api::admin::on_call))
        // Admin: lab sessions
        .route("/api/admin/sessions", get(api::sessions::list_sessions))
        .route(
            "/api/admin/session/:prefix",
            get(api::sessions::get_session).delete(api::sessions::destroy_session),
        )
        .route(
            "/api/admin/session/:prefix/complete",
            post(api::sessions::complete_session),
        )
        // Terminal gateway
        .route(
            "/ws/session/:prefix/terminal/:terminal",
            get(api::terminal::attach),
        )
        // Gateway / IAM / policy simulations
        .route("/gateway/ok", get(api::sim::gateway_ok))
        .route("/gateway/forbidden", get(api::sim::gateway_forbidden))
        .route("/gateway/bad", get(api::sim::gateway_bad))
        .route("/gateway/delay/:ms", get(api::sim::gateway_delay))
        .route("/gateway/admin", get(api::sim::gateway_admin))
        .route("/iam/status", get(api::sim::iam_status))
        .route("/iam/grant", post(api::sim::iam_grant))
        .route("/cloud/logs", get(api::sim::cloud_logs))
        .route("/policy", get(api::sim::get_policy).post(api::sim::set_policy))
        // Liveness
        .route("/health", get(api::sim::health))
        .route("/api/ping", get(api::sim::ping))
        .with_state(state)
}
