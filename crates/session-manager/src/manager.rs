//! Session manager.
//!
//! Owns the session registry, drives the lifecycle state machine through the
//! reconciler, persists per-session metadata so a restarted server can pick
//! its sessions back up from `docker ps`, and produces the final snapshot
//! when a candidate submits.

use crate::error::{SessionError, SessionResult};
use crate::lifecycle::{advance, SessionState};
use crate::policy::SessionPolicy;
use crate::reconciler::{Reconciler, TeardownReport};
use crate::runtime::ContainerRuntime;
use crate::topology::SessionTopology;
use chrono::{DateTime, Utc};
use examlab_core::ids::{SessionId, CONTAINER_PREFIX};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// One tracked session. The registry key is the eight-char container
/// namespace prefix, which is the part recoverable from container names.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub prefix: String,
    /// Full id. Unknown for sessions recovered from containers whose state
    /// directory was lost.
    pub id: Option<SessionId>,
    pub candidate_email: Option<String>,
    pub state: SessionState,
    pub containers: Vec<String>,
    pub state_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// True when this record was rebuilt after a restart rather than
    /// created by a provision call.
    pub recovered: bool,
}

impl SessionRecord {
    fn namespace(&self) -> String {
        format!("{CONTAINER_PREFIX}-{}", self.prefix)
    }

    fn network(&self) -> String {
        format!("{}-net", self.namespace())
    }
}

/// Per-node snapshot entry in the manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub container: String,
    pub filesystem_tar: String,
    pub log_file: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub prefix: String,
    pub candidate_email: Option<String>,
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<SnapshotEntry>,
}

pub struct SessionManager {
    runtime: Arc<dyn ContainerRuntime>,
    reconciler: Reconciler,
    topology: SessionTopology,
    state_root: PathBuf,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        policy: SessionPolicy,
        topology: SessionTopology,
        state_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(runtime.clone(), policy),
            runtime,
            topology,
            state_root: state_root.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the reconciler, used by tests to shorten ready probes.
    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn session(&self, prefix: &str) -> Option<SessionRecord> {
        self.sessions.read().get(prefix).cloned()
    }

    pub fn session_for_candidate(&self, email: &str) -> Option<SessionRecord> {
        self.sessions
            .read()
            .values()
            .find(|r| r.candidate_email.as_deref() == Some(email))
            .cloned()
    }

    pub fn list(&self) -> Vec<SessionRecord> {
        let mut v: Vec<SessionRecord> = self.sessions.read().values().cloned().collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        v
    }

    /// Provision a session for a candidate, or resume their existing one.
    ///
    /// Calling this again after a partial failure retries from `Failed`;
    /// calling it for an already `Active` session is a no-op. Either way the
    /// reconciler only creates containers that are missing.
    pub async fn provision(&self, candidate_email: &str) -> SessionResult<SessionRecord> {
        // Lookup and registration happen under one write lock so two
        // concurrent calls for the same candidate cannot both mint a session.
        let (prefix, created) = {
            let mut sessions = self.sessions.write();
            let existing = sessions
                .values()
                .find(|r| r.candidate_email.as_deref() == Some(candidate_email))
                .cloned();
            match existing {
                Some(existing) => match existing.state {
                    SessionState::Active => return Ok(existing),
                    SessionState::Pending | SessionState::Failed(_) => (existing.prefix, None),
                    other => {
                        return Err(SessionError::Provisioning(format!(
                            "session {} is {other}, cannot provision",
                            existing.prefix
                        )))
                    }
                },
                None => {
                    let id = SessionId::new();
                    let record = SessionRecord {
                        prefix: id.prefix8(),
                        id: Some(id),
                        candidate_email: Some(candidate_email.to_string()),
                        state: SessionState::Pending,
                        containers: Vec::new(),
                        state_dir: self.state_root.join(id.prefix8()),
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                        recovered: false,
                    };
                    let prefix = record.prefix.clone();
                    sessions.insert(prefix.clone(), record.clone());
                    (prefix, Some(record))
                }
            }
        };
        if let Some(record) = &created {
            if let Err(e) = self.persist(record) {
                self.sessions.write().remove(&prefix);
                return Err(e);
            }
        }

        self.transition(&prefix, SessionState::Provisioning)?;
        let (namespace, network) = {
            let sessions = self.sessions.read();
            let record = sessions.get(&prefix).ok_or_else(|| {
                SessionError::NotFound(prefix.clone())
            })?;
            (record.namespace(), record.network())
        };

        match self
            .reconciler
            .converge(&namespace, &network, &self.topology)
            .await
        {
            Ok(nodes) => {
                {
                    let mut sessions = self.sessions.write();
                    if let Some(record) = sessions.get_mut(&prefix) {
                        record.containers = nodes.into_iter().map(|n| n.container).collect();
                    }
                }
                self.transition(&prefix, SessionState::Active)?;
                info!(prefix = %prefix, candidate = candidate_email, "session active");
                Ok(self.session(&prefix).ok_or(SessionError::NotFound(prefix))?)
            }
            Err(e) => {
                error!(prefix = %prefix, error = %e, "provisioning failed");
                // Containers stay up so a retry resumes instead of rebuilding.
                self.transition(&prefix, SessionState::Failed(e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Rebuild the registry after a restart.
    ///
    /// Containers are the source of truth: anything matching the naming
    /// scheme becomes an `Active` session, enriched from its state directory
    /// when one survives. Metadata directories that claim live containers
    /// but have none are marked `Failed` so an operator can retry or tear
    /// them down.
    pub async fn recover(&self) -> SessionResult<usize> {
        let containers = self
            .runtime
            .list_containers(&format!("{CONTAINER_PREFIX}-"))
            .await?;

        let mut by_prefix: HashMap<String, Vec<String>> = HashMap::new();
        for name in containers {
            if let Some(prefix) = parse_prefix(&name) {
                by_prefix.entry(prefix).or_default().push(name);
            }
        }

        let mut recovered = 0;
        for (prefix, mut nodes) in by_prefix {
            if self.sessions.read().contains_key(&prefix) {
                continue;
            }
            nodes.sort();
            let state_dir = self.state_root.join(&prefix);
            let meta = self.load_metadata(&state_dir);
            let record = SessionRecord {
                prefix: prefix.clone(),
                id: meta.as_ref().and_then(|m| m.id),
                candidate_email: meta.as_ref().and_then(|m| m.candidate_email.clone()),
                state: SessionState::Active,
                containers: nodes,
                state_dir,
                created_at: meta.as_ref().map(|m| m.created_at).unwrap_or_else(Utc::now),
                updated_at: Utc::now(),
                recovered: true,
            };
            self.persist(&record)?;
            info!(prefix = %prefix, containers = record.containers.len(), "session recovered");
            self.sessions.write().insert(prefix, record);
            recovered += 1;
        }

        // State dirs whose sessions should have containers but do not.
        if let Ok(entries) = std::fs::read_dir(&self.state_root) {
            for entry in entries.flatten() {
                let prefix = entry.file_name().to_string_lossy().into_owned();
                if self.sessions.read().contains_key(&prefix) {
                    continue;
                }
                let Some(meta) = self.load_metadata(&entry.path()) else {
                    continue;
                };
                if !meta.state.holds_containers() {
                    continue;
                }
                warn!(prefix = %prefix, "session metadata found but no containers survive");
                let record = SessionRecord {
                    prefix: prefix.clone(),
                    id: meta.id,
                    candidate_email: meta.candidate_email,
                    state: SessionState::Failed("no containers survived restart".into()),
                    containers: Vec::new(),
                    state_dir: entry.path(),
                    created_at: meta.created_at,
                    updated_at: Utc::now(),
                    recovered: true,
                };
                self.persist(&record)?;
                self.sessions.write().insert(prefix, record);
            }
        }

        Ok(recovered)
    }

    /// Container name for a terminal id, only while the session is active.
    ///
    /// Ids that match no node or alias pass through as literal node names
    /// (still namespaced), so shared or hand-started containers stay
    /// reachable.
    pub fn resolve_terminal(&self, prefix: &str, terminal: &str) -> SessionResult<String> {
        let sessions = self.sessions.read();
        let record = sessions
            .get(prefix)
            .ok_or_else(|| SessionError::NotFound(prefix.to_string()))?;
        if record.state != SessionState::Active {
            return Err(SessionError::Provisioning(format!(
                "session {prefix} is {}, terminals unavailable",
                record.state
            )));
        }
        let node = self
            .topology
            .resolve(terminal)
            .map(|n| n.node.as_str())
            .unwrap_or(terminal);
        Ok(format!("{}-{}", record.namespace(), node))
    }

    /// Export every container filesystem and its logs, write the manifest,
    /// then tear the session down.
    pub async fn snapshot_and_teardown(&self, prefix: &str) -> SessionResult<SnapshotManifest> {
        self.transition(prefix, SessionState::Snapshotting)?;
        let record = self
            .session(prefix)
            .ok_or_else(|| SessionError::NotFound(prefix.to_string()))?;

        let snapshot_dir = record.state_dir.join("snapshot");
        std::fs::create_dir_all(&snapshot_dir)?;

        let mut entries = Vec::new();
        for container in &record.containers {
            let node = container
                .rsplit_once(&format!("{}-", record.namespace()))
                .map(|(_, n)| n.to_string())
                .unwrap_or_else(|| container.clone());
            let tar = snapshot_dir.join(format!("{node}.tar"));
            let log = snapshot_dir.join(format!("{node}.log"));

            if let Err(e) = self.runtime.export(container, &tar).await {
                // A crashed container should not block submission; note the
                // gap in the manifest by omission and keep going.
                warn!(container = %container, error = %e, "filesystem export failed");
                continue;
            }
            match self.runtime.logs(container).await {
                Ok(text) => std::fs::write(&log, text)?,
                Err(e) => warn!(container = %container, error = %e, "log capture failed"),
            }
            entries.push(SnapshotEntry {
                container: container.clone(),
                filesystem_tar: tar.to_string_lossy().into_owned(),
                log_file: log.to_string_lossy().into_owned(),
            });
        }

        let manifest = SnapshotManifest {
            prefix: prefix.to_string(),
            candidate_email: record.candidate_email.clone(),
            taken_at: Utc::now(),
            entries,
        };
        std::fs::write(
            snapshot_dir.join("manifest.json"),
            serde_json::to_vec_pretty(&manifest)?,
        )?;

        let report = self
            .reconciler
            .teardown(&record.namespace(), &record.network())
            .await?;
        if !report.clean() {
            warn!(prefix = %prefix, failed = ?report.failed, "teardown left containers behind");
        }

        {
            let mut sessions = self.sessions.write();
            if let Some(r) = sessions.get_mut(prefix) {
                r.containers.clear();
            }
        }
        self.transition(prefix, SessionState::TornDown)?;
        info!(prefix = %prefix, nodes = manifest.entries.len(), "session snapshotted and torn down");
        Ok(manifest)
    }

    /// Tear a session down without snapshotting (operator abort).
    pub async fn teardown(&self, prefix: &str) -> SessionResult<TeardownReport> {
        let record = self
            .session(prefix)
            .ok_or_else(|| SessionError::NotFound(prefix.to_string()))?;
        let report = self
            .reconciler
            .teardown(&record.namespace(), &record.network())
            .await?;
        {
            let mut sessions = self.sessions.write();
            if let Some(r) = sessions.get_mut(prefix) {
                r.containers.clear();
            }
        }
        self.transition(prefix, SessionState::TornDown)?;
        Ok(report)
    }

    fn transition(&self, prefix: &str, to: SessionState) -> SessionResult<()> {
        let record = {
            let mut sessions = self.sessions.write();
            let record = sessions
                .get_mut(prefix)
                .ok_or_else(|| SessionError::NotFound(prefix.to_string()))?;
            advance(&mut record.state, to)?;
            record.updated_at = Utc::now();
            record.clone()
        };
        self.persist(&record)
    }

    fn persist(&self, record: &SessionRecord) -> SessionResult<()> {
        std::fs::create_dir_all(&record.state_dir)?;
        let path = record.state_dir.join("metadata.json");
        let tmp = record.state_dir.join("metadata.json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load_metadata(&self, dir: &Path) -> Option<SessionRecord> {
        let bytes = std::fs::read(dir.join("metadata.json")).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "unreadable session metadata");
                None
            }
        }
    }
}

/// Extract the eight-char prefix from `exam-<prefix8>-<node>`.
fn parse_prefix(container: &str) -> Option<String> {
    let rest = container.strip_prefix(&format!("{CONTAINER_PREFIX}-"))?;
    let (prefix, node) = rest.split_once('-')?;
    if prefix.len() == 8 && !node.is_empty() {
        Some(prefix.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MemoryRuntime;
    use std::time::Duration;

    fn manager(rt: Arc<MemoryRuntime>, root: &Path) -> SessionManager {
        let reconciler = Reconciler::new(rt.clone(), SessionPolicy::lab())
            .with_ready_probe(2, Duration::from_millis(1));
        SessionManager::new(rt, SessionPolicy::lab(), SessionTopology::standard(), root)
            .with_reconciler(reconciler)
    }

    #[tokio::test]
    async fn test_provision_reaches_active() {
        let rt = Arc::new(MemoryRuntime::new());
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(rt.clone(), dir.path());

        let record = mgr.provision("ana@example.com").await.unwrap();
        assert_eq!(record.state, SessionState::Active);
        assert_eq!(record.containers.len(), 14);
        assert!(record.state_dir.join("metadata.json").exists());
        assert_eq!(rt.running().len(), 14);
    }

    #[tokio::test]
    async fn test_provision_is_idempotent_per_candidate() {
        let rt = Arc::new(MemoryRuntime::new());
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(rt.clone(), dir.path());

        let first = mgr.provision("ana@example.com").await.unwrap();
        let second = mgr.provision("ana@example.com").await.unwrap();
        assert_eq!(first.prefix, second.prefix);
        assert_eq!(rt.running().len(), 14);
    }

    #[tokio::test]
    async fn test_concurrent_provision_mints_one_session() {
        let rt = Arc::new(MemoryRuntime::new());
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(rt.clone(), dir.path());

        let (a, b) = tokio::join!(
            mgr.provision("ana@example.com"),
            mgr.provision("ana@example.com"),
        );
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.prefix, b.prefix);
        assert_eq!(mgr.list().len(), 1);
        assert_eq!(rt.running().len(), 14);
    }

    #[tokio::test]
    async fn test_failed_provision_is_retryable() {
        let rt = Arc::new(MemoryRuntime::new());
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(rt.clone(), dir.path());

        rt.fail_on_run("router");
        assert!(mgr.provision("ana@example.com").await.is_err());
        let record = mgr.session_for_candidate("ana@example.com").unwrap();
        assert!(matches!(record.state, SessionState::Failed(_)));
        let partial = rt.running().len();
        assert!(partial > 0 && partial < 14);

        // Clearing the failure and retrying finishes the same session.
        let rt2 = Arc::new(MemoryRuntime::new());
        for name in rt.running() {
            rt2.seed_container(&crate::runtime::RunSpec {
                name,
                network: None,
                spec: SessionTopology::standard().resolve("g1").cloned().unwrap(),
            });
        }
        let mgr2 = manager(rt2.clone(), dir.path());
        mgr2.recover().await.unwrap();
        // Recovered container sets come back as Active already.
        let record = mgr2.session(&record.prefix).unwrap();
        assert_eq!(record.state, SessionState::Active);
    }

    #[tokio::test]
    async fn test_recover_rebuilds_registry_from_containers() {
        let rt = Arc::new(MemoryRuntime::new());
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(rt.clone(), dir.path());
        let record = mgr.provision("ana@example.com").await.unwrap();

        // Fresh manager over the same runtime and state root.
        let mgr2 = manager(rt.clone(), dir.path());
        assert_eq!(mgr2.recover().await.unwrap(), 1);
        let recovered = mgr2.session(&record.prefix).unwrap();
        assert!(recovered.recovered);
        assert_eq!(recovered.state, SessionState::Active);
        assert_eq!(recovered.candidate_email.as_deref(), Some("ana@example.com"));
        assert_eq!(recovered.containers.len(), 14);
    }

    #[tokio::test]
    async fn test_recover_flags_vanished_sessions() {
        let rt = Arc::new(MemoryRuntime::new());
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(rt.clone(), dir.path());
        let record = mgr.provision("ana@example.com").await.unwrap();

        // Containers are gone but the state dir remains.
        for name in rt.running() {
            rt.remove(&name).await.unwrap();
        }
        let mgr2 = manager(rt.clone(), dir.path());
        assert_eq!(mgr2.recover().await.unwrap(), 0);
        let flagged = mgr2.session(&record.prefix).unwrap();
        assert!(matches!(flagged.state, SessionState::Failed(_)));
    }

    #[tokio::test]
    async fn test_resolve_terminal_requires_active() {
        let rt = Arc::new(MemoryRuntime::new());
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(rt.clone(), dir.path());
        let record = mgr.provision("ana@example.com").await.unwrap();

        let container = mgr.resolve_terminal(&record.prefix, "branch-tokyo").unwrap();
        assert_eq!(container, format!("exam-{}-tokyo", record.prefix));

        // Unknown ids pass through as literal node names, still namespaced.
        let container = mgr.resolve_terminal(&record.prefix, "scratch").unwrap();
        assert_eq!(container, format!("exam-{}-scratch", record.prefix));

        mgr.snapshot_and_teardown(&record.prefix).await.unwrap();
        assert!(mgr.resolve_terminal(&record.prefix, "branch-tokyo").is_err());
    }

    #[tokio::test]
    async fn test_snapshot_then_teardown() {
        let rt = Arc::new(MemoryRuntime::new());
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(rt.clone(), dir.path());
        let record = mgr.provision("ana@example.com").await.unwrap();

        let manifest = mgr.snapshot_and_teardown(&record.prefix).await.unwrap();
        assert_eq!(manifest.entries.len(), 14);
        assert_eq!(rt.exported().len(), 14);
        assert!(rt.running().is_empty());
        assert!(rt.networks().is_empty());

        let after = mgr.session(&record.prefix).unwrap();
        assert_eq!(after.state, SessionState::TornDown);
        assert!(after.containers.is_empty());
        assert!(record.state_dir.join("snapshot/manifest.json").exists());
        assert!(record.state_dir.join("snapshot/tokyo.tar").exists());
    }

    #[tokio::test]
    async fn test_snapshot_from_torn_down_rejected() {
        let rt = Arc::new(MemoryRuntime::new());
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(rt.clone(), dir.path());
        let record = mgr.provision("ana@example.com").await.unwrap();
        mgr.snapshot_and_teardown(&record.prefix).await.unwrap();
        assert!(mgr.snapshot_and_teardown(&record.prefix).await.is_err());
    }

    #[tokio::test]
    async fn test_teardown_without_snapshot() {
        let rt = Arc::new(MemoryRuntime::new());
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(rt.clone(), dir.path());
        let record = mgr.provision("ana@example.com").await.unwrap();

        let report = mgr.teardown(&record.prefix).await.unwrap();
        assert!(report.clean());
        assert!(rt.running().is_empty());
        assert!(!record.state_dir.join("snapshot").exists());
    }

    #[test]
    fn test_parse_prefix() {
        assert_eq!(parse_prefix("exam-1a2b3c4d-tokyo"), Some("1a2b3c4d".into()));
        assert_eq!(
            parse_prefix("exam-1a2b3c4d-waf-nginx"),
            Some("1a2b3c4d".into())
        );
        assert_eq!(parse_prefix("exam-short-x"), None);
        assert_eq!(parse_prefix("other-1a2b3c4d-tokyo"), None);
    }
}
