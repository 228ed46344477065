//! Declarative session topology.
//!
//! A topology is a list of [`NodeSpec`]s on one per-session network. The
//! reconciler is the only consumer; it diffs this description against the
//! containers that actually exist and converges. Nothing here runs anything.

use serde::{Deserialize, Serialize};

/// A file injected into a node after it is ready.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub path: String,
    pub content: String,
}

/// Tmpfs mount with a hard size cap, used for the disk-pressure scenario.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmpfsMount {
    pub target: String,
    pub size_mb: u64,
}

/// Host bind mount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// A seeded broken state candidates must diagnose.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Fault {
    /// Fill a size-limited filesystem with crash dumps and bulk transfer
    /// data until usage sits around 80%, and point /var/log and /opt/dlp at
    /// it. The cleanup playbook is the exam task.
    DiskPressure { mount: String, dump_mb: u64, ftp_dirs: u64, ftp_mb_each: u64 },
    /// Small baseline logs so healthy gateways contrast with the full one.
    BaselineDiskUsage,
    /// Remove the default route; the candidate has to add it back.
    DropDefaultRoute,
    /// Disable IPv4 forwarding on the router node.
    DisableIpForwarding,
    /// CPU stress plus egress latency to simulate an overloaded branch.
    Degraded { delay_ms: u32, cpu_workers: u32, cpu_load_pct: u32 },
}

impl Fault {
    /// Faults that merely color the scenario may fail without failing the
    /// whole provision; faults that define a task must stick.
    pub fn best_effort(&self) -> bool {
        matches!(self, Fault::Degraded { .. } | Fault::BaselineDiskUsage)
    }
}

/// One container in the topology.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Logical node name; the container is `<session namespace>-<node>`.
    pub node: String,
    pub image: String,
    pub hostname: String,
    /// Container argv. Empty means the image default.
    pub command: Vec<String>,
    #[serde(default)]
    pub caps: Vec<String>,
    #[serde(default)]
    pub tmpfs: Option<TmpfsMount>,
    #[serde(default)]
    pub binds: Vec<BindMount>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub host_network: bool,
    #[serde(default)]
    pub files: Vec<ConfigFile>,
    #[serde(default)]
    pub faults: Vec<Fault>,
    /// Additional terminal ids that resolve to this node.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl NodeSpec {
    fn new(node: &str, image: &str, hostname: &str) -> Self {
        Self {
            node: node.to_string(),
            image: image.to_string(),
            hostname: hostname.to_string(),
            command: Vec::new(),
            caps: Vec::new(),
            tmpfs: None,
            binds: Vec::new(),
            privileged: false,
            host_network: false,
            files: Vec::new(),
            faults: Vec::new(),
            aliases: Vec::new(),
        }
    }

    fn shell_init(mut self, packages: &str, extra: &str) -> Self {
        // Alpine nodes install their toolset then idle. `script` (util-linux)
        // must be present before the terminal bridge will attach.
        let tail = if extra.is_empty() {
            "tail -f /dev/null".to_string()
        } else {
            format!("{extra} && tail -f /dev/null")
        };
        self.command = vec![
            "sh".into(),
            "-c".into(),
            format!("apk add --no-cache {packages} && ln -sf /bin/bash /bin/sh && {tail}"),
        ];
        self
    }

    fn cap(mut self, cap: &str) -> Self {
        self.caps.push(cap.to_string());
        self
    }

    fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    fn fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }
}

const BRANCH_PACKAGES: &str =
    "bash curl iputils bind-tools tcpdump iproute2 util-linux traceroute coreutils";
const GATEWAY_PACKAGES: &str = "bash curl iputils bind-tools util-linux coreutils";
const LEAF_PACKAGES: &str = "bash curl iputils bind-tools iproute2 util-linux coreutils";

/// Hostnames the upstream application serves; anything else gets the
/// DEPLOYMENT_NOT_FOUND page. The WAF's seeded bug forwards a typo'd Host.
const UPSTREAM_HOSTS: &str = "gt.maswebics.example msy.maswebics.example";
const BROKEN_PROXY_HOST: &str = "gt.maswebcs.example";

/// Full topology for one candidate session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTopology {
    pub nodes: Vec<NodeSpec>,
}

impl SessionTopology {
    /// The standard lab: three branch offices (one degraded), four gateways
    /// (one with a full disk), a phoenix gateway, a routed leaf pair with a
    /// broken router, and the WAF stack (upstream + misconfigured proxy +
    /// operator terminal).
    pub fn standard() -> Self {
        let mut nodes = Vec::new();

        for branch in ["tokyo", "osaka", "kyoto"] {
            let mut spec = NodeSpec::new(branch, "alpine:3.20", &format!("{branch}-branch"))
                .shell_init(
                    if branch == "osaka" {
                        // stress-ng backs the degradation fault
                        "bash curl iputils bind-tools tcpdump iproute2 util-linux traceroute coreutils stress-ng"
                    } else {
                        BRANCH_PACKAGES
                    },
                    "",
                )
                .cap("NET_ADMIN")
                .alias(&format!("branch-{branch}"));
            if branch == "osaka" {
                spec = spec.fault(Fault::Degraded {
                    delay_ms: 500,
                    cpu_workers: 2,
                    cpu_load_pct: 80,
                });
            }
            nodes.push(spec);
        }

        for gw in ["g1", "g2", "g3"] {
            nodes.push(
                NodeSpec::new(gw, "alpine:3.20", gw)
                    .shell_init(GATEWAY_PACKAGES, "")
                    .fault(Fault::BaselineDiskUsage),
            );
        }

        // g4: the disk-pressure task. 50 MB tmpfs, ~40 MB of seeded junk.
        let mut g4 = NodeSpec::new("g4", "alpine:3.20", "g4")
            .shell_init(GATEWAY_PACKAGES, "")
            .fault(Fault::DiskPressure {
                mount: "/mnt/limited".into(),
                dump_mb: 10,
                ftp_dirs: 5,
                ftp_mb_each: 6,
            });
        g4.tmpfs = Some(TmpfsMount {
            target: "/mnt/limited".into(),
            size_mb: 50,
        });
        nodes.push(g4);

        nodes.push(
            NodeSpec::new("phoenix", "alpine:3.20", "gateway-phoenix")
                .shell_init(GATEWAY_PACKAGES, "")
                .alias("gateway-phoenix"),
        );

        // Routed segment: two leaves that lose their default route and a
        // router with forwarding switched off.
        nodes.push(
            NodeSpec::new("leaf01", "alpine:3.20", "leaf01")
                .shell_init(LEAF_PACKAGES, "ip addr add 192.168.178.10/24 dev eth0")
                .cap("NET_ADMIN")
                .alias("nbr-leaf01")
                .fault(Fault::DropDefaultRoute),
        );
        nodes.push(
            NodeSpec::new("leaf02", "alpine:3.20", "leaf02")
                .shell_init(LEAF_PACKAGES, "ip addr add 10.0.0.20/16 dev eth0")
                .cap("NET_ADMIN")
                .alias("nbr-leaf02")
                .fault(Fault::DropDefaultRoute),
        );
        let mut router = NodeSpec::new("router", "alpine:3.20", "router")
            .shell_init(
                LEAF_PACKAGES,
                "ip addr add 192.168.178.2/24 dev eth0 && ip addr add 10.0.0.2/16 dev eth0",
            )
            .cap("NET_ADMIN")
            .alias("nbr-router")
            .fault(Fault::DisableIpForwarding);
        router.privileged = true;
        nodes.push(router);

        // WAF stack. The upstream serves the two real hostnames; the proxy
        // forwards a misspelled Host header, which is the seeded bug.
        let mut upstream = NodeSpec::new("upstream", "nginx:alpine", "upstream");
        upstream.files.push(ConfigFile {
            path: "/etc/nginx/conf.d/default.conf".into(),
            content: format!(
                "server {{\n    listen 80 default_server;\n    return 404 'DEPLOYMENT_NOT_FOUND';\n}}\n\
                 server {{\n    listen 80;\n    server_name {UPSTREAM_HOSTS};\n    \
                 location / {{\n        return 200 'Healthcare Portal';\n        add_header Content-Type text/html;\n    }}\n}}\n"
            ),
        });
        nodes.push(upstream);

        let mut waf = NodeSpec::new("waf-nginx", "nginx:alpine", "waf-nginx");
        waf.files.push(ConfigFile {
            path: "/etc/nginx/conf.d/default.conf".into(),
            content: format!(
                "server {{\n    listen 80;\n    server_name {UPSTREAM_HOSTS};\n\n    \
                 location / {{\n        proxy_pass http://upstream:80;\n        \
                 proxy_set_header Host {BROKEN_PROXY_HOST};\n    }}\n}}\n"
            ),
        });
        nodes.push(waf);

        let mut term = NodeSpec::new("waf-terminal", "alpine:3.20", "waf-terminal").shell_init(
            "bash curl docker-cli docker-cli-compose nano vim jq util-linux ncurses socat",
            "",
        );
        term.host_network = true;
        term.binds.push(BindMount {
            source: "/var/run/docker.sock".into(),
            target: "/var/run/docker.sock".into(),
            read_only: false,
        });
        term.binds.push(BindMount {
            source: "/opt/waf-exam".into(),
            target: "/opt/waf-exam".into(),
            read_only: false,
        });
        nodes.push(term);

        Self { nodes }
    }

    /// Resolve a terminal id (node name or alias) to its node.
    pub fn resolve(&self, terminal: &str) -> Option<&NodeSpec> {
        self.nodes
            .iter()
            .find(|n| n.node == terminal || n.aliases.iter().any(|a| a == terminal))
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.node.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_node_set() {
        let topo = SessionTopology::standard();
        let names = topo.node_names();
        for expected in [
            "tokyo", "osaka", "kyoto", "g1", "g2", "g3", "g4", "phoenix", "leaf01", "leaf02",
            "router", "upstream", "waf-nginx", "waf-terminal",
        ] {
            assert!(names.contains(&expected), "missing node {expected}");
        }
        assert_eq!(names.len(), 14);
    }

    #[test]
    fn test_aliases_resolve() {
        let topo = SessionTopology::standard();
        assert_eq!(topo.resolve("branch-tokyo").unwrap().node, "tokyo");
        assert_eq!(topo.resolve("nbr-router").unwrap().node, "router");
        assert_eq!(topo.resolve("gateway-phoenix").unwrap().node, "phoenix");
        assert_eq!(topo.resolve("osaka").unwrap().node, "osaka");
        assert!(topo.resolve("nonexistent").is_none());
    }

    #[test]
    fn test_seeded_faults_present() {
        let topo = SessionTopology::standard();
        assert!(matches!(
            topo.resolve("osaka").unwrap().faults[..],
            [Fault::Degraded { delay_ms: 500, .. }]
        ));
        assert!(matches!(
            topo.resolve("g4").unwrap().faults[..],
            [Fault::DiskPressure { .. }]
        ));
        assert!(matches!(
            topo.resolve("leaf01").unwrap().faults[..],
            [Fault::DropDefaultRoute]
        ));
        assert!(matches!(
            topo.resolve("router").unwrap().faults[..],
            [Fault::DisableIpForwarding]
        ));
    }

    #[test]
    fn test_g4_tmpfs_is_capped() {
        let topo = SessionTopology::standard();
        let g4 = topo.resolve("g4").unwrap();
        let tmpfs = g4.tmpfs.as_ref().unwrap();
        assert_eq!(tmpfs.size_mb, 50);
        assert_eq!(tmpfs.target, "/mnt/limited");
    }

    #[test]
    fn test_waf_proxy_seeds_wrong_host() {
        let topo = SessionTopology::standard();
        let waf = topo.resolve("waf-nginx").unwrap();
        let conf = &waf.files[0].content;
        assert!(conf.contains("proxy_set_header Host gt.maswebcs.example"));
        // The typo'd host must not be one the upstream actually serves.
        let upstream = topo.resolve("upstream").unwrap();
        assert!(!upstream.files[0].content.contains("maswebcs"));
    }

    #[test]
    fn test_only_router_is_privileged() {
        let topo = SessionTopology::standard();
        let privileged: Vec<_> = topo.nodes.iter().filter(|n| n.privileged).collect();
        assert_eq!(privileged.len(), 1);
        assert_eq!(privileged[0].node, "router");
    }

    #[test]
    fn test_fault_best_effort_split() {
        assert!(Fault::Degraded { delay_ms: 1, cpu_workers: 1, cpu_load_pct: 1 }.best_effort());
        assert!(Fault::BaselineDiskUsage.best_effort());
        assert!(!Fault::DropDefaultRoute.best_effort());
        assert!(!Fault::DisableIpForwarding.best_effort());
    }
}
