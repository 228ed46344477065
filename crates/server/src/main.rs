use anyhow::Context;
use clap::Parser;
use examlab_server::staff::default_directory;
use examlab_server::{build_router, AppState, ServerConfig};
use examlab_session_manager::{
    DockerCli, SessionManager, SessionPolicy, SessionTopology,
};
use examlab_state_store::StateStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "examlab-server", about = "Exam lab platform API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "EXAMLAB_LISTEN", default_value = "0.0.0.0:4080")]
    listen: SocketAddr,

    /// Path of the JSON state file.
    #[arg(long, env = "EXAMLAB_STATE_FILE", default_value = "data/state.json")]
    state_file: PathBuf,

    /// Root directory for per-session state, snapshots, and transcripts.
    #[arg(long, env = "EXAMLAB_SESSION_ROOT", default_value = "data/sessions")]
    session_root: PathBuf,

    /// Directory receiving candidates' final work uploads.
    #[arg(long, env = "EXAMLAB_UPLOAD_DIR", default_value = "data/uploads")]
    upload_dir: PathBuf,

    #[arg(long, env = "EXAMLAB_ADMIN_PASSWORD", default_value = "2025")]
    admin_password: String,

    /// API key accepted by the IAM grant simulation.
    #[arg(long, env = "EXAMLAB_IAM_API_KEY", default_value = "admin123")]
    iam_api_key: String,

    /// File served by the cloud-logs simulation.
    #[arg(long, env = "EXAMLAB_CLOUD_LOG_FILE")]
    cloud_log_file: Option<PathBuf>,

    /// Skip adopting leftover lab containers at startup.
    #[arg(long, env = "EXAMLAB_NO_RECOVER")]
    no_recover: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let args = Args::parse();

    let store = StateStore::open(&args.state_file)
        .with_context(|| format!("opening state file {}", args.state_file.display()))?;

    let runtime = Arc::new(DockerCli::default());
    let sessions = SessionManager::new(
        runtime,
        SessionPolicy::lab(),
        SessionTopology::standard(),
        &args.session_root,
    );
    if args.no_recover {
        warn!("startup recovery disabled, leftover lab containers will be ignored");
    } else {
        match sessions.recover().await {
            Ok(count) if count > 0 => info!(count, "adopted sessions from running containers"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "session recovery failed"),
        }
    }

    let state = Arc::new(AppState::new(
        store,
        sessions,
        default_directory(),
        ServerConfig {
            admin_password: args.admin_password,
            iam_api_key: args.iam_api_key,
            cloud_log_file: args.cloud_log_file,
            upload_dir: args.upload_dir,
        },
    ));

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(listen = %args.listen, "exam lab server ready");
    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}
