//! Container runtime abstraction.
//!
//! [`ContainerRuntime`] is the only seam through which the crate touches
//! containers. [`DockerCli`] shells out to the docker binary with argv
//! vectors (never composed command strings); [`MemoryRuntime`] is a fake
//! that records every call so the reconciler and manager are testable
//! without a daemon.

use crate::error::{SessionError, SessionResult};
use crate::topology::NodeSpec;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Everything needed to start one container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub network: Option<String>,
    pub spec: NodeSpec,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_network(&self, name: &str) -> SessionResult<()>;
    async fn remove_network(&self, name: &str) -> SessionResult<()>;
    async fn list_networks(&self, prefix: &str) -> SessionResult<Vec<String>>;

    /// Start a detached container. Returns the runtime's container id.
    async fn run(&self, spec: &RunSpec) -> SessionResult<String>;

    /// Names of running containers whose name starts with `prefix`.
    async fn list_containers(&self, prefix: &str) -> SessionResult<Vec<String>>;

    /// Run argv inside a container and wait for it.
    async fn exec(&self, container: &str, argv: &[&str]) -> SessionResult<ExecOutput>;

    /// Run argv inside a container without waiting.
    async fn exec_detached(&self, container: &str, argv: &[&str]) -> SessionResult<()>;

    /// Write `content` to `path` inside a container.
    async fn write_file(&self, container: &str, path: &str, content: &str) -> SessionResult<()>;

    /// Export the container filesystem as a tar at `dest` on the host.
    async fn export(&self, container: &str, dest: &Path) -> SessionResult<()>;

    async fn logs(&self, container: &str) -> SessionResult<String>;

    /// Force-remove a container. Removing a container that does not exist
    /// is not an error.
    async fn remove(&self, container: &str) -> SessionResult<()>;
}

/// Docker CLI backend.
pub struct DockerCli {
    binary: String,
    command_timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            command_timeout: Duration::from_secs(120),
        }
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            command_timeout,
        }
    }

    async fn docker(&self, args: &[&str]) -> SessionResult<ExecOutput> {
        self.docker_with_stdin(args, None).await
    }

    async fn docker_with_stdin(
        &self,
        args: &[&str],
        stdin: Option<&str>,
    ) -> SessionResult<ExecOutput> {
        debug!(args = ?args, "docker");
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SessionError::Runtime(format!("failed to spawn docker: {e}")))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
            }
        }

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| SessionError::Runtime(format!("docker {:?} timed out", args.first())))?
            .map_err(|e| SessionError::Runtime(e.to_string()))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn expect_success(out: ExecOutput, what: &str) -> SessionResult<ExecOutput> {
        if out.success() {
            Ok(out)
        } else {
            Err(SessionError::Runtime(format!(
                "{what} failed (exit {}): {}",
                out.exit_code,
                out.stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create_network(&self, name: &str) -> SessionResult<()> {
        let out = self.docker(&["network", "create", name]).await?;
        // Re-creating an existing network is fine; provisioning retries hit this.
        if out.success() || out.stderr.contains("already exists") {
            Ok(())
        } else {
            Err(SessionError::Runtime(format!(
                "network create {name} failed: {}",
                out.stderr.trim()
            )))
        }
    }

    async fn remove_network(&self, name: &str) -> SessionResult<()> {
        let out = self.docker(&["network", "rm", name]).await?;
        if out.success() || out.stderr.contains("not found") {
            Ok(())
        } else {
            warn!(network = name, stderr = %out.stderr.trim(), "network rm failed");
            Err(SessionError::Runtime(format!(
                "network rm {name} failed: {}",
                out.stderr.trim()
            )))
        }
    }

    async fn list_networks(&self, prefix: &str) -> SessionResult<Vec<String>> {
        let out = Self::expect_success(
            self.docker(&["network", "ls", "--format", "{{.Name}}"]).await?,
            "network ls",
        )?;
        Ok(out
            .stdout
            .lines()
            .filter(|l| l.starts_with(prefix))
            .map(str::to_string)
            .collect())
    }

    async fn run(&self, run: &RunSpec) -> SessionResult<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            run.name.clone(),
            "--hostname".into(),
            run.spec.hostname.clone(),
        ];
        if run.spec.host_network {
            args.push("--network".into());
            args.push("host".into());
        } else if let Some(network) = &run.network {
            args.push("--network".into());
            args.push(network.clone());
        }
        for cap in &run.spec.caps {
            args.push("--cap-add".into());
            args.push(cap.clone());
        }
        if run.spec.privileged {
            args.push("--privileged".into());
        }
        if let Some(tmpfs) = &run.spec.tmpfs {
            args.push("--tmpfs".into());
            args.push(format!("{}:size={}m", tmpfs.target, tmpfs.size_mb));
        }
        for bind in &run.spec.binds {
            args.push("-v".into());
            let mode = if bind.read_only { ":ro" } else { "" };
            args.push(format!("{}:{}{mode}", bind.source, bind.target));
        }
        args.push(run.spec.image.clone());
        args.extend(run.spec.command.iter().cloned());

        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = Self::expect_success(self.docker(&argv).await?, "docker run")?;
        Ok(out.stdout.trim().to_string())
    }

    async fn list_containers(&self, prefix: &str) -> SessionResult<Vec<String>> {
        let filter = format!("name=^{prefix}");
        let out = Self::expect_success(
            self.docker(&["ps", "--filter", &filter, "--format", "{{.Names}}"])
                .await?,
            "docker ps",
        )?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn exec(&self, container: &str, argv: &[&str]) -> SessionResult<ExecOutput> {
        let mut args = vec!["exec", container];
        args.extend_from_slice(argv);
        self.docker(&args).await
    }

    async fn exec_detached(&self, container: &str, argv: &[&str]) -> SessionResult<()> {
        let mut args = vec!["exec", "-d", container];
        args.extend_from_slice(argv);
        Self::expect_success(self.docker(&args).await?, "docker exec -d")?;
        Ok(())
    }

    async fn write_file(&self, container: &str, path: &str, content: &str) -> SessionResult<()> {
        // Content goes over stdin so it never hits a shell or the host fs.
        let out = self
            .docker_with_stdin(
                &["exec", "-i", container, "sh", "-c", &format!("cat > {path}")],
                Some(content),
            )
            .await?;
        Self::expect_success(out, "write file")?;
        Ok(())
    }

    async fn export(&self, container: &str, dest: &Path) -> SessionResult<()> {
        let dest_str = dest
            .to_str()
            .ok_or_else(|| SessionError::Runtime("non-utf8 export path".into()))?;
        Self::expect_success(
            self.docker(&["export", "-o", dest_str, container]).await?,
            "docker export",
        )?;
        Ok(())
    }

    async fn logs(&self, container: &str) -> SessionResult<String> {
        let out = self.docker(&["logs", "--tail", "2000", container]).await?;
        // Logs land on both streams; keep both for the snapshot.
        Ok(format!("{}{}", out.stdout, out.stderr))
    }

    async fn remove(&self, container: &str) -> SessionResult<()> {
        let out = self.docker(&["rm", "-f", container]).await?;
        if out.success() || out.stderr.contains("No such container") {
            Ok(())
        } else {
            Err(SessionError::Runtime(format!(
                "docker rm {container} failed: {}",
                out.stderr.trim()
            )))
        }
    }
}

/// In-memory fake runtime.
#[derive(Default)]
pub struct MemoryRuntime {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    networks: HashSet<String>,
    containers: BTreeMap<String, RunSpec>,
    files: BTreeMap<(String, String), String>,
    exec_history: Vec<(String, Vec<String>)>,
    exports: Vec<(String, String)>,
    fail_nodes: HashSet<String>,
    exec_exit: Option<(i32, String)>,
    next_id: u64,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `run` fail for any container whose name contains `fragment`.
    pub fn fail_on_run(&self, fragment: &str) {
        self.inner.lock().fail_nodes.insert(fragment.to_string());
    }

    /// Make every subsequent `exec` complete with this exit code and stderr,
    /// modeling commands docker dispatches fine but the container rejects.
    pub fn set_exec_exit(&self, exit_code: i32, stderr: &str) {
        self.inner.lock().exec_exit = Some((exit_code, stderr.to_string()));
    }

    pub fn running(&self) -> Vec<String> {
        self.inner.lock().containers.keys().cloned().collect()
    }

    pub fn networks(&self) -> Vec<String> {
        let mut v: Vec<String> = self.inner.lock().networks.iter().cloned().collect();
        v.sort();
        v
    }

    pub fn file(&self, container: &str, path: &str) -> Option<String> {
        self.inner
            .lock()
            .files
            .get(&(container.to_string(), path.to_string()))
            .cloned()
    }

    pub fn exec_history(&self, container: &str) -> Vec<Vec<String>> {
        self.inner
            .lock()
            .exec_history
            .iter()
            .filter(|(c, _)| c == container)
            .map(|(_, argv)| argv.clone())
            .collect()
    }

    pub fn exported(&self) -> Vec<(String, String)> {
        self.inner.lock().exports.clone()
    }

    /// Seed a running container directly, bypassing `run`. Used to model
    /// containers that survived a server restart.
    pub fn seed_container(&self, spec: &RunSpec) {
        self.inner
            .lock()
            .containers
            .insert(spec.name.clone(), spec.clone());
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn create_network(&self, name: &str) -> SessionResult<()> {
        self.inner.lock().networks.insert(name.to_string());
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> SessionResult<()> {
        self.inner.lock().networks.remove(name);
        Ok(())
    }

    async fn list_networks(&self, prefix: &str) -> SessionResult<Vec<String>> {
        let mut v: Vec<String> = self
            .inner
            .lock()
            .networks
            .iter()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect();
        v.sort();
        Ok(v)
    }

    async fn run(&self, spec: &RunSpec) -> SessionResult<String> {
        let mut state = self.inner.lock();
        if state.fail_nodes.iter().any(|f| spec.name.contains(f.as_str())) {
            return Err(SessionError::Runtime(format!(
                "simulated run failure for {}",
                spec.name
            )));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(SessionError::Runtime(format!(
                "container name {} already in use",
                spec.name
            )));
        }
        state.containers.insert(spec.name.clone(), spec.clone());
        state.next_id += 1;
        Ok(format!("mem{:08x}", state.next_id))
    }

    async fn list_containers(&self, prefix: &str) -> SessionResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .containers
            .keys()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn exec(&self, container: &str, argv: &[&str]) -> SessionResult<ExecOutput> {
        let mut state = self.inner.lock();
        if !state.containers.contains_key(container) {
            return Err(SessionError::Runtime(format!(
                "no such container: {container}"
            )));
        }
        state.exec_history.push((
            container.to_string(),
            argv.iter().map(|s| s.to_string()).collect(),
        ));
        let (exit_code, stderr) = state
            .exec_exit
            .clone()
            .unwrap_or((0, String::new()));
        Ok(ExecOutput {
            exit_code,
            stdout: String::new(),
            stderr,
        })
    }

    async fn exec_detached(&self, container: &str, argv: &[&str]) -> SessionResult<()> {
        self.exec(container, argv).await.map(|_| ())
    }

    async fn write_file(&self, container: &str, path: &str, content: &str) -> SessionResult<()> {
        let mut state = self.inner.lock();
        if !state.containers.contains_key(container) {
            return Err(SessionError::Runtime(format!(
                "no such container: {container}"
            )));
        }
        state
            .files
            .insert((container.to_string(), path.to_string()), content.to_string());
        Ok(())
    }

    async fn export(&self, container: &str, dest: &Path) -> SessionResult<()> {
        let mut state = self.inner.lock();
        if !state.containers.contains_key(container) {
            return Err(SessionError::Runtime(format!(
                "no such container: {container}"
            )));
        }
        let dest = dest.to_string_lossy().into_owned();
        std::fs::write(&dest, b"fake-tar")?;
        state.exports.push((container.to_string(), dest));
        Ok(())
    }

    async fn logs(&self, container: &str) -> SessionResult<String> {
        if !self.inner.lock().containers.contains_key(container) {
            return Err(SessionError::Runtime(format!(
                "no such container: {container}"
            )));
        }
        Ok(format!("logs for {container}\n"))
    }

    async fn remove(&self, container: &str) -> SessionResult<()> {
        self.inner.lock().containers.remove(container);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::SessionTopology;

    fn run_spec(name: &str) -> RunSpec {
        let topo = SessionTopology::standard();
        RunSpec {
            name: name.to_string(),
            network: Some("exam-test-net".to_string()),
            spec: topo.resolve("g1").cloned().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_memory_runtime_tracks_containers() {
        let rt = MemoryRuntime::new();
        rt.run(&run_spec("exam-abc-g1")).await.unwrap();
        rt.run(&run_spec("exam-abc-g2")).await.unwrap();
        rt.run(&run_spec("exam-def-g1")).await.unwrap();

        let abc = rt.list_containers("exam-abc-").await.unwrap();
        assert_eq!(abc, vec!["exam-abc-g1", "exam-abc-g2"]);

        rt.remove("exam-abc-g1").await.unwrap();
        assert_eq!(rt.list_containers("exam-abc-").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_runtime_rejects_duplicate_names() {
        let rt = MemoryRuntime::new();
        rt.run(&run_spec("exam-abc-g1")).await.unwrap();
        assert!(rt.run(&run_spec("exam-abc-g1")).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_runtime_remove_is_idempotent() {
        let rt = MemoryRuntime::new();
        rt.remove("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_exec_against_missing_container_fails() {
        let rt = MemoryRuntime::new();
        assert!(rt.exec("ghost", &["true"]).await.is_err());
    }

    #[tokio::test]
    async fn test_write_file_round_trip() {
        let rt = MemoryRuntime::new();
        rt.run(&run_spec("exam-abc-g1")).await.unwrap();
        rt.write_file("exam-abc-g1", "/etc/motd", "hello").await.unwrap();
        assert_eq!(rt.file("exam-abc-g1", "/etc/motd").unwrap(), "hello");
    }
}
