//! Seeded fault application.
//!
//! Each [`Fault`] turns into a short sequence of argv execs against a ready
//! container. Task-defining faults must succeed or the provision fails;
//! flavor faults log a warning and move on.

use crate::error::{SessionError, SessionResult};
use crate::runtime::ContainerRuntime;
use crate::topology::Fault;
use tracing::{debug, warn};

pub async fn apply(
    runtime: &dyn ContainerRuntime,
    container: &str,
    fault: &Fault,
) -> SessionResult<()> {
    debug!(container, fault = ?fault, "applying fault");
    let result = match fault {
        Fault::DiskPressure {
            mount,
            dump_mb,
            ftp_dirs,
            ftp_mb_each,
        } => disk_pressure(runtime, container, mount, *dump_mb, *ftp_dirs, *ftp_mb_each).await,
        Fault::BaselineDiskUsage => baseline_disk(runtime, container).await,
        Fault::DropDefaultRoute => {
            run(runtime, container, &["ip", "route", "del", "default"]).await
        }
        Fault::DisableIpForwarding => {
            run(runtime, container, &["sysctl", "-w", "net.ipv4.ip_forward=0"]).await
        }
        Fault::Degraded {
            delay_ms,
            cpu_workers,
            cpu_load_pct,
        } => degraded(runtime, container, *delay_ms, *cpu_workers, *cpu_load_pct).await,
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if fault.best_effort() => {
            warn!(container, error = %e, "best-effort fault did not apply");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Exec that treats a non-zero exit as a failure. A fault command that the
/// container rejects (missing tool, bad route state) must surface, not leave
/// the scenario half-seeded.
async fn run(
    runtime: &dyn ContainerRuntime,
    container: &str,
    argv: &[&str],
) -> SessionResult<()> {
    let out = runtime.exec(container, argv).await?;
    if out.success() {
        Ok(())
    } else {
        Err(SessionError::Runtime(format!(
            "{container}: `{}` exited {}: {}",
            argv.join(" "),
            out.exit_code,
            out.stderr.trim()
        )))
    }
}

/// Fill the capped mount to roughly 80%: one large crash dump plus a set of
/// stale bulk-transfer directories, then repoint the paths the cleanup
/// playbook references at it.
async fn disk_pressure(
    runtime: &dyn ContainerRuntime,
    container: &str,
    mount: &str,
    dump_mb: u64,
    ftp_dirs: u64,
    ftp_mb_each: u64,
) -> SessionResult<()> {
    let crash_dir = format!("{mount}/var/crash");
    let dump = format!("{crash_dir}/kernel-panic-20250614.dmp");
    run(runtime, container, &["mkdir", "-p", &crash_dir]).await?;
    run(
        runtime,
        container,
        &[
            "dd",
            "if=/dev/zero",
            &format!("of={dump}"),
            "bs=1M",
            &format!("count={dump_mb}"),
        ],
    )
    .await?;

    for i in 1..=ftp_dirs {
        let dir = format!("{mount}/ftp/transfer-{i:02}");
        let blob = format!("{dir}/payload.bin");
        run(runtime, container, &["mkdir", "-p", &dir]).await?;
        run(
            runtime,
            container,
            &[
                "dd",
                "if=/dev/zero",
                &format!("of={blob}"),
                "bs=1M",
                &format!("count={ftp_mb_each}"),
            ],
        )
        .await?;
    }

    run(runtime, container, &["mkdir", "-p", &format!("{mount}/log")]).await?;
    run(
        runtime,
        container,
        &["ln", "-sfn", &format!("{mount}/log"), "/var/log/gw"],
    )
    .await?;
    run(
        runtime,
        container,
        &["ln", "-sfn", &format!("{mount}/ftp"), "/opt/dlp"],
    )
    .await?;
    Ok(())
}

/// A few megabytes of logs so healthy gateways are plausibly non-empty.
async fn baseline_disk(runtime: &dyn ContainerRuntime, container: &str) -> SessionResult<()> {
    run(runtime, container, &["mkdir", "-p", "/var/log/gw"]).await?;
    run(
        runtime,
        container,
        &[
            "dd",
            "if=/dev/zero",
            "of=/var/log/gw/messages.log",
            "bs=1M",
            "count=2",
        ],
    )
    .await?;
    Ok(())
}

async fn degraded(
    runtime: &dyn ContainerRuntime,
    container: &str,
    delay_ms: u32,
    cpu_workers: u32,
    cpu_load_pct: u32,
) -> SessionResult<()> {
    run(
        runtime,
        container,
        &[
            "tc",
            "qdisc",
            "add",
            "dev",
            "eth0",
            "root",
            "netem",
            "delay",
            &format!("{delay_ms}ms"),
        ],
    )
    .await?;
    runtime
        .exec_detached(
            container,
            &[
                "stress-ng",
                "--cpu",
                &cpu_workers.to_string(),
                "--cpu-load",
                &cpu_load_pct.to_string(),
            ],
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MemoryRuntime, RunSpec};
    use crate::topology::SessionTopology;

    async fn runtime_with(name: &str) -> MemoryRuntime {
        let rt = MemoryRuntime::new();
        let topo = SessionTopology::standard();
        rt.run(&RunSpec {
            name: name.to_string(),
            network: Some("exam-t-net".into()),
            spec: topo.resolve("g1").cloned().unwrap(),
        })
        .await
        .unwrap();
        rt
    }

    #[tokio::test]
    async fn test_drop_default_route_exec() {
        let rt = runtime_with("exam-t-leaf01").await;
        apply(&rt, "exam-t-leaf01", &Fault::DropDefaultRoute).await.unwrap();
        let history = rt.exec_history("exam-t-leaf01");
        assert_eq!(history, vec![vec!["ip", "route", "del", "default"]]);
    }

    #[tokio::test]
    async fn test_disable_forwarding_exec() {
        let rt = runtime_with("exam-t-router").await;
        apply(&rt, "exam-t-router", &Fault::DisableIpForwarding).await.unwrap();
        let history = rt.exec_history("exam-t-router");
        assert_eq!(history, vec![vec!["sysctl", "-w", "net.ipv4.ip_forward=0"]]);
    }

    #[tokio::test]
    async fn test_disk_pressure_seeds_dump_and_transfers() {
        let rt = runtime_with("exam-t-g4").await;
        apply(
            &rt,
            "exam-t-g4",
            &Fault::DiskPressure {
                mount: "/mnt/limited".into(),
                dump_mb: 10,
                ftp_dirs: 3,
                ftp_mb_each: 6,
            },
        )
        .await
        .unwrap();

        let history = rt.exec_history("exam-t-g4");
        let dd_calls = history.iter().filter(|argv| argv[0] == "dd").count();
        assert_eq!(dd_calls, 4);
        assert!(history
            .iter()
            .any(|argv| argv.iter().any(|a| a.contains("kernel-panic"))));
        assert!(history
            .iter()
            .any(|argv| argv.iter().any(|a| a.contains("transfer-03"))));
    }

    #[tokio::test]
    async fn test_task_fault_error_propagates() {
        let rt = MemoryRuntime::new();
        // No container seeded, so the exec fails.
        assert!(apply(&rt, "exam-t-leaf01", &Fault::DropDefaultRoute).await.is_err());
    }

    #[tokio::test]
    async fn test_task_fault_nonzero_exit_is_an_error() {
        // docker exec returning Ok with a failing exit code must not count
        // as an applied fault.
        let rt = runtime_with("exam-t-leaf01").await;
        rt.set_exec_exit(2, "RTNETLINK answers: No such process");
        let err = apply(&rt, "exam-t-leaf01", &Fault::DropDefaultRoute)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited 2"));
        assert!(err.to_string().contains("RTNETLINK"));

        let rt = runtime_with("exam-t-router").await;
        rt.set_exec_exit(1, "sysctl: permission denied");
        assert!(apply(&rt, "exam-t-router", &Fault::DisableIpForwarding)
            .await
            .is_err());

        let rt = runtime_with("exam-t-g4").await;
        rt.set_exec_exit(1, "dd: writing: No space left on device");
        assert!(apply(
            &rt,
            "exam-t-g4",
            &Fault::DiskPressure {
                mount: "/mnt/limited".into(),
                dump_mb: 10,
                ftp_dirs: 1,
                ftp_mb_each: 6,
            },
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_best_effort_fault_nonzero_exit_swallowed() {
        let rt = runtime_with("exam-t-osaka").await;
        rt.set_exec_exit(2, "RTNETLINK answers: Operation not permitted");
        apply(
            &rt,
            "exam-t-osaka",
            &Fault::Degraded {
                delay_ms: 500,
                cpu_workers: 2,
                cpu_load_pct: 80,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_best_effort_fault_error_swallowed() {
        let rt = MemoryRuntime::new();
        apply(
            &rt,
            "exam-t-osaka",
            &Fault::Degraded {
                delay_ms: 500,
                cpu_workers: 2,
                cpu_load_pct: 80,
            },
        )
        .await
        .unwrap();
    }
}
