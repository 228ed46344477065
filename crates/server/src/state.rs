//! Shared application state.

use crate::auth::AuthRegistry;
use crate::staff::StaffMember;
use examlab_session_manager::SessionManager;
use examlab_state_store::StateStore;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub admin_password: String,
    pub iam_api_key: String,
    /// File served by the cloud-logs simulation task.
    pub cloud_log_file: Option<PathBuf>,
    /// Directory receiving candidates' final work uploads.
    pub upload_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            admin_password: "2025".to_string(),
            iam_api_key: "admin123".to_string(),
            cloud_log_file: None,
            upload_dir: PathBuf::from("data/uploads"),
        }
    }
}

pub struct AppState {
    pub store: StateStore,
    pub sessions: SessionManager,
    pub auth: AuthRegistry,
    pub staff: Vec<StaffMember>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(
        store: StateStore,
        sessions: SessionManager,
        staff: Vec<StaffMember>,
        config: ServerConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            auth: AuthRegistry::default(),
            staff,
            config,
        }
    }

    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
