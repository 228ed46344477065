//! Node spec validation.
//!
//! Every spec in a topology is checked against the policy before the
//! reconciler touches the runtime. A violation anywhere rejects the whole
//! provision, so a bad topology never leaves half a session behind.

use crate::error::{SessionError, SessionResult};
use crate::topology::{NodeSpec, SessionTopology};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Image references must start with one of these.
    pub allowed_image_prefixes: Vec<String>,
    /// Linux capabilities a node may request.
    pub allowed_caps: Vec<String>,
    /// Nodes allowed to run privileged.
    pub privileged_nodes: HashSet<String>,
    /// Nodes allowed on the host network.
    pub host_network_nodes: HashSet<String>,
    /// Nodes allowed to bind the Docker socket.
    pub docker_socket_nodes: HashSet<String>,
    /// Host paths that may never be bind-mounted.
    pub forbidden_mount_prefixes: Vec<String>,
    pub max_nodes_per_session: usize,
    /// Upper bound for any tmpfs mount.
    pub max_tmpfs_mb: u64,
}

impl Default for SessionPolicy {
    /// Strict baseline: no caps, no privilege, no host access.
    fn default() -> Self {
        Self {
            allowed_image_prefixes: vec!["alpine:".into()],
            allowed_caps: Vec::new(),
            privileged_nodes: HashSet::new(),
            host_network_nodes: HashSet::new(),
            docker_socket_nodes: HashSet::new(),
            forbidden_mount_prefixes: vec![
                "/etc".into(),
                "/root".into(),
                "/home".into(),
                "/proc".into(),
                "/sys".into(),
            ],
            max_nodes_per_session: 8,
            max_tmpfs_mb: 256,
        }
    }
}

impl SessionPolicy {
    /// Policy matching the standard lab topology. Exceptions are named per
    /// node rather than granted globally.
    pub fn lab() -> Self {
        Self {
            allowed_image_prefixes: vec!["alpine:".into(), "nginx:".into(), "node:".into()],
            allowed_caps: vec!["NET_ADMIN".into()],
            privileged_nodes: ["router"].into_iter().map(String::from).collect(),
            host_network_nodes: ["waf-terminal"].into_iter().map(String::from).collect(),
            docker_socket_nodes: ["waf-terminal"].into_iter().map(String::from).collect(),
            max_nodes_per_session: 16,
            ..Self::default()
        }
    }

    pub fn validate_node(&self, spec: &NodeSpec) -> SessionResult<()> {
        if !self
            .allowed_image_prefixes
            .iter()
            .any(|p| spec.image.starts_with(p.as_str()))
        {
            return Err(SessionError::PolicyViolation(format!(
                "node {}: image {} is not on the allow-list",
                spec.node, spec.image
            )));
        }

        for cap in &spec.caps {
            if !self.allowed_caps.contains(cap) {
                return Err(SessionError::PolicyViolation(format!(
                    "node {}: capability {cap} is not permitted",
                    spec.node
                )));
            }
        }

        if spec.privileged && !self.privileged_nodes.contains(&spec.node) {
            return Err(SessionError::PolicyViolation(format!(
                "node {} may not run privileged",
                spec.node
            )));
        }

        if spec.host_network && !self.host_network_nodes.contains(&spec.node) {
            return Err(SessionError::PolicyViolation(format!(
                "node {} may not join the host network",
                spec.node
            )));
        }

        for bind in &spec.binds {
            if bind.source == "/var/run/docker.sock" {
                if !self.docker_socket_nodes.contains(&spec.node) {
                    return Err(SessionError::PolicyViolation(format!(
                        "node {} may not mount the docker socket",
                        spec.node
                    )));
                }
                continue;
            }
            if self
                .forbidden_mount_prefixes
                .iter()
                .any(|p| bind.source.starts_with(p.as_str()))
            {
                return Err(SessionError::PolicyViolation(format!(
                    "node {}: bind mount of {} is forbidden",
                    spec.node, bind.source
                )));
            }
        }

        if let Some(tmpfs) = &spec.tmpfs {
            if tmpfs.size_mb == 0 || tmpfs.size_mb > self.max_tmpfs_mb {
                return Err(SessionError::PolicyViolation(format!(
                    "node {}: tmpfs of {} MB is outside 1..={} MB",
                    spec.node, tmpfs.size_mb, self.max_tmpfs_mb
                )));
            }
        }

        Ok(())
    }

    pub fn validate_topology(&self, topo: &SessionTopology) -> SessionResult<()> {
        if topo.nodes.len() > self.max_nodes_per_session {
            return Err(SessionError::PolicyViolation(format!(
                "topology has {} nodes, limit is {}",
                topo.nodes.len(),
                self.max_nodes_per_session
            )));
        }
        let mut seen = HashSet::new();
        for spec in &topo.nodes {
            if !seen.insert(spec.node.as_str()) {
                return Err(SessionError::PolicyViolation(format!(
                    "duplicate node name {}",
                    spec.node
                )));
            }
            self.validate_node(spec)?;
        }
        Ok(())
    }
}
