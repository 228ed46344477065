//! Topology reconciliation.
//!
//! The reconciler looks at which containers already exist under a session's
//! namespace and creates only what is missing, so a retried provision after
//! a partial failure picks up where the last attempt stopped instead of
//! colliding on names. Teardown is driven by the observed name prefix, not
//! by bookkeeping, so it also sweeps containers the manager never recorded.

use crate::error::{SessionError, SessionResult};
use crate::faults;
use crate::policy::SessionPolicy;
use crate::runtime::{ContainerRuntime, RunSpec};
use crate::topology::{NodeSpec, SessionTopology};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One node after convergence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedNode {
    pub node: String,
    pub container: String,
    /// False when the container already existed and was left alone.
    pub created: bool,
}

/// Outcome of a teardown sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
    pub network_removed: bool,
}

impl TeardownReport {
    pub fn clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Reconciler {
    runtime: Arc<dyn ContainerRuntime>,
    policy: SessionPolicy,
    ready_attempts: u32,
    ready_delay: Duration,
}

impl Reconciler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, policy: SessionPolicy) -> Self {
        Self {
            runtime,
            policy,
            ready_attempts: 30,
            ready_delay: Duration::from_secs(2),
        }
    }

    /// Shorten the ready probe for tests.
    pub fn with_ready_probe(mut self, attempts: u32, delay: Duration) -> Self {
        self.ready_attempts = attempts;
        self.ready_delay = delay;
        self
    }

    /// Drive the namespace toward the desired topology.
    ///
    /// The whole topology is validated before any runtime call. Existing
    /// containers are kept as-is; new ones get their config files and faults
    /// after the ready probe passes.
    pub async fn converge(
        &self,
        namespace: &str,
        network: &str,
        topology: &SessionTopology,
    ) -> SessionResult<Vec<ProvisionedNode>> {
        self.policy.validate_topology(topology)?;

        self.runtime.create_network(network).await?;

        let existing = self
            .runtime
            .list_containers(&format!("{namespace}-"))
            .await?;

        let mut provisioned = Vec::with_capacity(topology.nodes.len());
        for spec in &topology.nodes {
            let container = format!("{namespace}-{}", spec.node);
            if existing.contains(&container) {
                debug!(container, "already running, skipping");
                provisioned.push(ProvisionedNode {
                    node: spec.node.clone(),
                    container,
                    created: false,
                });
                continue;
            }

            self.start_node(namespace, network, spec, &container).await?;
            provisioned.push(ProvisionedNode {
                node: spec.node.clone(),
                container,
                created: true,
            });
        }

        info!(
            namespace,
            created = provisioned.iter().filter(|n| n.created).count(),
            kept = provisioned.iter().filter(|n| !n.created).count(),
            "topology converged"
        );
        Ok(provisioned)
    }

    async fn start_node(
        &self,
        namespace: &str,
        network: &str,
        spec: &NodeSpec,
        container: &str,
    ) -> SessionResult<()> {
        let run = RunSpec {
            name: container.to_string(),
            network: if spec.host_network {
                None
            } else {
                Some(network.to_string())
            },
            spec: spec.clone(),
        };
        self.runtime.run(&run).await.map_err(|e| {
            SessionError::Provisioning(format!("node {} ({namespace}): {e}", spec.node))
        })?;

        self.wait_ready(container).await?;

        for file in &spec.files {
            self.runtime
                .write_file(container, &file.path, &file.content)
                .await?;
        }
        if !spec.files.is_empty() && spec.image.starts_with("nginx") {
            // Pick up injected vhost config without a restart.
            if let Err(e) = self.runtime.exec(container, &["nginx", "-s", "reload"]).await {
                warn!(container, error = %e, "nginx reload failed");
            }
        }

        for fault in &spec.faults {
            faults::apply(self.runtime.as_ref(), container, fault).await?;
        }
        Ok(())
    }

    /// Poll until the node can run commands. Alpine nodes spend their first
    /// seconds in `apk add`, and the terminal bridge needs `script` present.
    async fn wait_ready(&self, container: &str) -> SessionResult<()> {
        for attempt in 0..self.ready_attempts {
            match self
                .runtime
                .exec(container, &["sh", "-c", "command -v script"])
                .await
            {
                Ok(out) if out.success() => return Ok(()),
                Ok(_) | Err(_) if attempt + 1 < self.ready_attempts => {
                    tokio::time::sleep(self.ready_delay).await;
                }
                Ok(_) => break,
                Err(e) => {
                    warn!(container, error = %e, "ready probe errored");
                    break;
                }
            }
        }
        Err(SessionError::NotReady(container.to_string()))
    }

    /// Remove every container under the namespace, then the network.
    /// Individual failures are collected rather than aborting the sweep.
    pub async fn teardown(&self, namespace: &str, network: &str) -> SessionResult<TeardownReport> {
        let containers = self
            .runtime
            .list_containers(&format!("{namespace}-"))
            .await?;

        let mut report = TeardownReport::default();
        for container in containers {
            match self.runtime.remove(&container).await {
                Ok(()) => report.removed.push(container),
                Err(e) => {
                    warn!(container = %container, error = %e, "container removal failed");
                    report.failed.push(container);
                }
            }
        }

        report.network_removed = match self.runtime.remove_network(network).await {
            Ok(()) => true,
            Err(e) => {
                warn!(network, error = %e, "network removal failed");
                false
            }
        };

        info!(
            namespace,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "teardown complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MemoryRuntime;

    fn reconciler(rt: Arc<MemoryRuntime>) -> Reconciler {
        Reconciler::new(rt, SessionPolicy::lab())
            .with_ready_probe(2, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_converge_creates_all_nodes() {
        let rt = Arc::new(MemoryRuntime::new());
        let nodes = reconciler(rt.clone())
            .converge("exam-abc12345", "exam-abc12345-net", &SessionTopology::standard())
            .await
            .unwrap();

        assert_eq!(nodes.len(), 14);
        assert!(nodes.iter().all(|n| n.created));
        assert!(rt.running().contains(&"exam-abc12345-g4".to_string()));
        assert_eq!(rt.networks(), vec!["exam-abc12345-net"]);
    }

    #[tokio::test]
    async fn test_converge_is_idempotent() {
        let rt = Arc::new(MemoryRuntime::new());
        let rec = reconciler(rt.clone());
        let topo = SessionTopology::standard();
        rec.converge("exam-abc12345", "exam-abc12345-net", &topo).await.unwrap();

        let second = rec
            .converge("exam-abc12345", "exam-abc12345-net", &topo)
            .await
            .unwrap();
        assert!(second.iter().all(|n| !n.created));
        assert_eq!(rt.running().len(), 14);
    }

    #[tokio::test]
    async fn test_converge_resumes_partial_session() {
        let rt = Arc::new(MemoryRuntime::new());
        let rec = reconciler(rt.clone());
        let topo = SessionTopology::standard();

        rt.fail_on_run("router");
        assert!(rec
            .converge("exam-abc12345", "exam-abc12345-net", &topo)
            .await
            .is_err());
        let partial = rt.running().len();
        assert!(partial > 0 && partial < 14);

        // Retry with the failure cleared only creates what is missing.
        let rt2 = Arc::new(MemoryRuntime::new());
        for name in rt.running() {
            rt2.seed_container(&RunSpec {
                name,
                network: Some("exam-abc12345-net".into()),
                spec: topo.resolve("g1").cloned().unwrap(),
            });
        }
        let nodes = reconciler(rt2.clone())
            .converge("exam-abc12345", "exam-abc12345-net", &topo)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 14);
        assert_eq!(nodes.iter().filter(|n| n.created).count(), 14 - partial);
    }

    #[tokio::test]
    async fn test_policy_checked_before_any_runtime_call() {
        let rt = Arc::new(MemoryRuntime::new());
        let mut topo = SessionTopology::standard();
        topo.nodes[3].privileged = true; // a gateway, not on the allow-list
        assert!(reconciler(rt.clone())
            .converge("exam-abc12345", "exam-abc12345-net", &topo)
            .await
            .is_err());
        assert!(rt.running().is_empty());
        assert!(rt.networks().is_empty());
    }

    #[tokio::test]
    async fn test_config_files_and_faults_applied() {
        let rt = Arc::new(MemoryRuntime::new());
        reconciler(rt.clone())
            .converge("exam-abc12345", "exam-abc12345-net", &SessionTopology::standard())
            .await
            .unwrap();

        let conf = rt
            .file("exam-abc12345-waf-nginx", "/etc/nginx/conf.d/default.conf")
            .unwrap();
        assert!(conf.contains("proxy_pass http://upstream:80"));

        let leaf = rt.exec_history("exam-abc12345-leaf01");
        assert!(leaf.contains(&vec![
            "ip".to_string(),
            "route".to_string(),
            "del".to_string(),
            "default".to_string()
        ]));
    }

    #[tokio::test]
    async fn test_teardown_sweeps_by_prefix() {
        let rt = Arc::new(MemoryRuntime::new());
        let rec = reconciler(rt.clone());
        let topo = SessionTopology::standard();
        rec.converge("exam-abc12345", "exam-abc12345-net", &topo).await.unwrap();
        rec.converge("exam-zzz99999", "exam-zzz99999-net", &topo).await.unwrap();

        let report = rec.teardown("exam-abc12345", "exam-abc12345-net").await.unwrap();
        assert!(report.clean());
        assert_eq!(report.removed.len(), 14);
        assert!(report.network_removed);

        // The other session is untouched.
        assert_eq!(rt.running().len(), 14);
        assert!(rt.running().iter().all(|n| n.starts_with("exam-zzz99999-")));
    }

    #[tokio::test]
    async fn test_teardown_of_empty_namespace_is_clean() {
        let rt = Arc::new(MemoryRuntime::new());
        let report = reconciler(rt)
            .teardown("exam-nothing1", "exam-nothing1-net")
            .await
            .unwrap();
        assert!(report.clean());
        assert!(report.removed.is_empty());
    }
}
