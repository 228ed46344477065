//! Per-candidate lab session management.
//!
//! Each candidate gets an isolated container topology: three branch-office
//! nodes, four gateways, a two-leaf routed segment, and a WAF reverse-proxy
//! stack, all on a dedicated network namespaced by the session id. This crate
//! owns the whole lifecycle:
//!
//! - [`lifecycle`]: the session state machine (Pending, Provisioning, Active,
//!   Snapshotting, TornDown, with Failed as the recovery point) and its
//!   valid-transition table.
//! - [`topology`]: the topology as declarative data, node specs plus config
//!   files plus seeded faults. The reconciler consumes this; nothing in the
//!   crate builds shell command strings.
//! - [`policy`]: validation every node spec must pass before a single
//!   runtime call is made. Image allow-list, capability allow-list, mount
//!   restrictions, per-session quota.
//! - [`runtime`]: the [`runtime::ContainerRuntime`] trait with an
//!   argv-based Docker CLI implementation and an in-memory fake for tests.
//! - [`reconciler`]: converges observed container state toward the desired
//!   topology; idempotent, prefix-driven teardown.
//! - [`faults`]: applies the seeded broken states (disk pressure, dropped
//!   routes, disabled forwarding, latency) to ready nodes.
//! - [`manager`]: provisioning, crash recovery, terminal routing, and
//!   snapshot-on-completion, with per-session state directories.

pub mod error;
pub mod faults;
pub mod lifecycle;
pub mod manager;
pub mod policy;
pub mod reconciler;
pub mod runtime;
pub mod topology;

pub use error::{SessionError, SessionResult};
pub use lifecycle::SessionState;
pub use manager::{SessionManager, SessionRecord, SnapshotEntry, SnapshotManifest};
pub use policy::SessionPolicy;
pub use reconciler::{ProvisionedNode, Reconciler, TeardownReport};
pub use runtime::{ContainerRuntime, DockerCli, ExecOutput, MemoryRuntime, RunSpec};
pub use topology::{BindMount, ConfigFile, Fault, NodeSpec, SessionTopology, TmpfsMount};
