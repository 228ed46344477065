//! Terminal bridging.
//!
//! A [`TerminalBridge`] runs an interactive process (in production,
//! `docker exec -i <container> script -qfc /bin/sh /dev/null`, which gives
//! the shell a pty inside the container) and exposes it as a pair of byte
//! channels. The WebSocket handler in the server pumps frames in and out;
//! every byte in both directions can be mirrored to an append-only
//! transcript for proctoring review.

use chrono::Utc;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn terminal process: {0}")]
    Spawn(std::io::Error),

    #[error("terminal process has no stdio")]
    MissingStdio,

    #[error("transcript error: {0}")]
    Transcript(#[from] std::io::Error),
}

/// Argv for an interactive shell inside a lab container.
///
/// `script` allocates a pty on the container side, so line editing, ctrl-c,
/// and full-screen tools work over a plain byte stream.
pub fn docker_exec_argv(container: &str) -> Vec<String> {
    [
        "docker", "exec", "-i", container, "script", "-qfc", "/bin/sh", "/dev/null",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Append-only transcript of one terminal attachment.
pub struct TranscriptWriter {
    file: std::fs::File,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl TranscriptWriter {
    /// Open (appending) a transcript file, writing a session header.
    pub fn open(path: &Path, container: &str) -> Result<Self, BridgeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        use std::io::Write;
        writeln!(
            file,
            "=== attach {} {} ===",
            container,
            Utc::now().to_rfc3339()
        )?;
        Ok(Self { file })
    }

    /// Record a chunk. Output is written raw; input is prefixed so reviewers
    /// can tell keystrokes from echo.
    pub fn record(&mut self, direction: Direction, bytes: &[u8]) -> Result<(), BridgeError> {
        use std::io::Write;
        match direction {
            Direction::Output => self.file.write_all(bytes)?,
            Direction::Input => {
                self.file.write_all(b"[in] ")?;
                self.file.write_all(bytes)?;
                self.file.write_all(b"\n")?;
            }
        }
        Ok(())
    }
}

/// A running terminal process with channel-based stdio.
pub struct TerminalBridge {
    child: Child,
    input_tx: mpsc::Sender<Vec<u8>>,
    output_rx: mpsc::Receiver<Vec<u8>>,
}

impl TerminalBridge {
    /// Spawn `argv` and start the stdio pump tasks.
    pub fn spawn(argv: &[String], mut transcript: Option<TranscriptWriter>) -> Result<Self, BridgeError> {
        let (program, args) = argv.split_first().ok_or(BridgeError::MissingStdio)?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(BridgeError::Spawn)?;

        let mut stdin = child.stdin.take().ok_or(BridgeError::MissingStdio)?;
        let mut stdout = child.stdout.take().ok_or(BridgeError::MissingStdio)?;

        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(64);
        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(64);

        // Input pump. The transcript lives here so both directions are
        // recorded by one owner; output chunks come back via a side channel.
        let (echo_tx, mut echo_rx) = mpsc::channel::<Vec<u8>>(64);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    chunk = input_rx.recv() => {
                        let Some(chunk) = chunk else { break };
                        if let Some(t) = transcript.as_mut() {
                            if let Err(e) = t.record(Direction::Input, &chunk) {
                                warn!(error = %e, "transcript write failed");
                            }
                        }
                        if stdin.write_all(&chunk).await.is_err() {
                            break;
                        }
                    }
                    chunk = echo_rx.recv() => {
                        let Some(chunk) = chunk else { break };
                        if let Some(t) = transcript.as_mut() {
                            if let Err(e) = t.record(Direction::Output, &chunk) {
                                warn!(error = %e, "transcript write failed");
                            }
                        }
                    }
                }
            }
            debug!("terminal input pump finished");
        });

        // Output pump.
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = buf[..n].to_vec();
                        let _ = echo_tx.send(chunk.clone()).await;
                        if output_tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("terminal output pump finished");
        });

        Ok(Self {
            child,
            input_tx,
            output_rx,
        })
    }

    /// Attach to a container shell, recording to `transcript_path`.
    pub fn attach_container(
        container: &str,
        transcript_path: Option<&Path>,
    ) -> Result<Self, BridgeError> {
        let transcript = transcript_path
            .map(|p| TranscriptWriter::open(p, container))
            .transpose()?;
        Self::spawn(&docker_exec_argv(container), transcript)
    }

    /// Send bytes to the process stdin. Returns false once the process side
    /// has gone away.
    pub async fn send(&self, bytes: Vec<u8>) -> bool {
        self.input_tx.send(bytes).await.is_ok()
    }

    /// Next chunk of process output, or `None` on exit.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.output_rx.recv().await
    }

    /// Kill the process and reap it.
    pub async fn shutdown(mut self) {
        let _ = self.child.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cat_argv() -> Vec<String> {
        vec!["cat".to_string()]
    }

    async fn recv_timeout(bridge: &mut TerminalBridge) -> Option<Vec<u8>> {
        tokio::time::timeout(Duration::from_secs(5), bridge.recv())
            .await
            .expect("timed out waiting for output")
    }

    #[tokio::test]
    async fn test_round_trip_through_process() {
        let mut bridge = TerminalBridge::spawn(&cat_argv(), None).unwrap();
        assert!(bridge.send(b"hello terminal\n".to_vec()).await);
        let out = recv_timeout(&mut bridge).await.unwrap();
        assert_eq!(out, b"hello terminal\n");
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_output_closes_on_process_exit() {
        let argv = vec!["sh".to_string(), "-c".to_string(), "printf done".to_string()];
        let mut bridge = TerminalBridge::spawn(&argv, None).unwrap();
        let out = recv_timeout(&mut bridge).await.unwrap();
        assert_eq!(out, b"done");
        assert!(recv_timeout(&mut bridge).await.is_none());
    }

    #[tokio::test]
    async fn test_transcript_records_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t/session.log");
        let transcript = TranscriptWriter::open(&path, "exam-abc-tokyo").unwrap();

        let mut bridge = TerminalBridge::spawn(&cat_argv(), Some(transcript)).unwrap();
        assert!(bridge.send(b"ls -la".to_vec()).await);
        let _ = recv_timeout(&mut bridge).await.unwrap();
        bridge.shutdown().await;
        // Give the pump a beat to flush the echo side.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("=== attach exam-abc-tokyo"));
        assert!(text.contains("[in] ls -la"));
        assert!(text.contains("ls -la"));
    }

    #[tokio::test]
    async fn test_transcript_appends_across_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.log");
        for _ in 0..2 {
            let t = TranscriptWriter::open(&path, "exam-abc-g1").unwrap();
            drop(t);
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("=== attach exam-abc-g1").count(), 2);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let argv = vec!["/nonexistent/binary".to_string()];
        assert!(matches!(
            TerminalBridge::spawn(&argv, None),
            Err(BridgeError::Spawn(_))
        ));
    }

    #[test]
    fn test_docker_exec_argv_shape() {
        let argv = docker_exec_argv("exam-abc-tokyo");
        assert_eq!(argv[0], "docker");
        assert!(argv.contains(&"exam-abc-tokyo".to_string()));
        assert!(argv.contains(&"script".to_string()));
    }
}
