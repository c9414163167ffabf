//! Tool runners: the [`ToolRunner`] seam and the container-runtime backend.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use headway_shared::{HeadwayError, Result};

use crate::invocation::Invocation;
use crate::service::{ServiceHandle, ServiceSpec};

/// Lines of stderr attached to a tool failure.
const STDERR_TAIL_LINES: usize = 20;

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes tool invocations and manages transient services.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run one invocation to completion. Non-zero exit or a missing declared
    /// output is an [`HeadwayError::ExternalTool`] carrying the stage name.
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;

    /// Start a long-running service and return once it has been launched.
    async fn start_service(&self, spec: &ServiceSpec) -> Result<ServiceHandle>;

    /// Stop and remove a service started by [`ToolRunner::start_service`].
    async fn stop_service(&self, handle: &ServiceHandle) -> Result<()>;

    /// Best-effort synchronous teardown, used when a scoped service is
    /// dropped without reaching its async stop.
    fn abandon_service(&self, _handle: &ServiceHandle) {}
}

// ---------------------------------------------------------------------------
// Container runtime backend
// ---------------------------------------------------------------------------

/// Drives `docker` (or a CLI-compatible runtime such as `podman`).
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    runtime: String,
}

impl ContainerRunner {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    async fn exec(&self, stage: &str, args: &[String]) -> Result<ToolOutput> {
        debug!(runtime = %self.runtime, args = ?args, "spawning container runtime");

        let output = Command::new(&self.runtime)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                HeadwayError::tool(
                    stage,
                    format!("failed to spawn `{}`: {e}. Is it installed?", self.runtime),
                )
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            debug!(stage, %stderr, "tool stderr");
            return Err(HeadwayError::tool(
                stage,
                format!("exited with status {code}: {}", stderr_tail(&stderr)),
            ));
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

#[async_trait]
impl ToolRunner for ContainerRunner {
    #[instrument(skip_all, fields(stage = %invocation.stage, image = %invocation.image))]
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        for mount in invocation.mounts.iter().filter(|m| !m.read_only) {
            std::fs::create_dir_all(&mount.host).map_err(|e| HeadwayError::io(&mount.host, e))?;
        }

        info!(cmd = %invocation.command_line(), "running tool");
        let output = self.exec(&invocation.stage, &run_args(invocation)).await?;

        let missing = invocation.missing_outputs();
        if !missing.is_empty() {
            let paths: Vec<String> = missing
                .iter()
                .map(|o| o.path().display().to_string())
                .collect();
            return Err(HeadwayError::tool(
                &invocation.stage,
                format!("declared output(s) not produced: {}", paths.join(", ")),
            ));
        }

        Ok(output)
    }

    #[instrument(skip_all, fields(service = %spec.name, image = %spec.image))]
    async fn start_service(&self, spec: &ServiceSpec) -> Result<ServiceHandle> {
        let handle = ServiceHandle::for_spec(spec);

        for mount in spec.mounts.iter().filter(|m| !m.read_only) {
            std::fs::create_dir_all(&mount.host).map_err(|e| HeadwayError::io(&mount.host, e))?;
        }

        let stage = format!("start {}", spec.name);
        self.exec(
            &stage,
            &["network".into(), "create".into(), handle.network.clone()],
        )
        .await?;

        if let Err(e) = self.exec(&stage, &service_args(spec, &handle)).await {
            if let Err(cleanup) = self
                .exec(&stage, &["network".into(), "rm".into(), handle.network.clone()])
                .await
            {
                warn!(error = %cleanup, "failed to remove service network");
            }
            return Err(e);
        }

        info!(container = %handle.container, network = %handle.network, "service started");
        Ok(handle)
    }

    #[instrument(skip_all, fields(container = %handle.container))]
    async fn stop_service(&self, handle: &ServiceHandle) -> Result<()> {
        let stage = format!("stop {}", handle.hostname);
        let mut failures = Vec::new();
        for args in teardown_args(handle) {
            if let Err(e) = self.exec(&stage, &args).await {
                warn!(error = %e, "service teardown step failed");
                failures.push(e.to_string());
            }
        }
        if !failures.is_empty() {
            return Err(HeadwayError::tool(stage, failures.join("; ")));
        }
        info!("service stopped");
        Ok(())
    }

    fn abandon_service(&self, handle: &ServiceHandle) {
        warn!(container = %handle.container, "service abandoned, removing in background");
        let runtime = self.runtime.clone();
        let steps = teardown_args(handle);
        // The network can only go once the container has been removed.
        let spawned = std::thread::Builder::new()
            .name("headway-service-cleanup".into())
            .spawn(move || {
                for args in steps {
                    let _ = std::process::Command::new(&runtime)
                        .args(&args)
                        .stdin(Stdio::null())
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status();
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn service cleanup");
        }
    }
}

/// Container removal, then network removal, for a started service.
pub fn teardown_args(handle: &ServiceHandle) -> [Vec<String>; 2] {
    [
        vec!["rm".into(), "-f".into(), handle.container.clone()],
        vec!["network".into(), "rm".into(), handle.network.clone()],
    ]
}

/// `run --rm ...` argv for an invocation.
pub fn run_args(inv: &Invocation) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--rm".to_string()];
    if let Some(network) = &inv.network {
        args.push("--network".into());
        args.push(network.clone());
    }
    if let Some(ep) = &inv.entrypoint {
        args.push("--entrypoint".into());
        args.push(ep.clone());
    }
    if let Some(dir) = &inv.workdir {
        args.push("-w".into());
        args.push(dir.clone());
    }
    for (k, v) in &inv.env {
        args.push("-e".into());
        args.push(format!("{k}={v}"));
    }
    for m in &inv.mounts {
        args.push("-v".into());
        args.push(volume_arg(&m.host.display().to_string(), &m.container, m.read_only));
    }
    args.push(inv.image.clone());
    args.extend(inv.args.iter().cloned());
    args
}

/// `run -d ...` argv for a detached service.
pub fn service_args(spec: &ServiceSpec, handle: &ServiceHandle) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        handle.container.clone(),
        "--network".to_string(),
        handle.network.clone(),
        "--network-alias".to_string(),
        handle.hostname.clone(),
    ];
    for (k, v) in &spec.env {
        args.push("-e".into());
        args.push(format!("{k}={v}"));
    }
    for m in &spec.mounts {
        args.push("-v".into());
        args.push(volume_arg(&m.host.display().to_string(), &m.container, m.read_only));
    }
    args.push(spec.image.clone());
    args
}

fn volume_arg(host: &str, container: &str, read_only: bool) -> String {
    if read_only {
        format!("{host}:{container}:ro")
    } else {
        format!("{host}:{container}")
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::Invocation;

    #[test]
    fn run_args_shape() {
        let inv = Invocation::new("clip", "osmium:latest")
            .entrypoint("osmium")
            .args(["extract", "--bbox", "1,2,3,4"])
            .workdir("/app")
            .env("K", "V")
            .mount_ro("/host/in.pbf", "/app/data.osm.pbf")
            .mount_rw("/host/out", "/app/out")
            .network("net-1");

        assert_eq!(
            run_args(&inv),
            vec![
                "run",
                "--rm",
                "--network",
                "net-1",
                "--entrypoint",
                "osmium",
                "-w",
                "/app",
                "-e",
                "K=V",
                "-v",
                "/host/in.pbf:/app/data.osm.pbf:ro",
                "-v",
                "/host/out:/app/out",
                "osmium:latest",
                "extract",
                "--bbox",
                "1,2,3,4",
            ]
        );
    }

    #[test]
    fn service_args_shape() {
        let spec = ServiceSpec::new("pelias-elasticsearch", "pelias/elasticsearch:8.12.2-beta")
            .env("ES_JAVA_OPTS", "-Xmx8g")
            .mount_rw("/cache/es", "/usr/share/elasticsearch/data");
        let handle = ServiceHandle::for_spec(&spec);
        let args = service_args(&spec, &handle);

        assert_eq!(&args[..2], &["run", "-d"]);
        assert!(args.contains(&"--network-alias".to_string()));
        assert!(args.contains(&"pelias-elasticsearch".to_string()));
        assert!(args.contains(&"ES_JAVA_OPTS=-Xmx8g".to_string()));
        assert_eq!(args.last().unwrap(), "pelias/elasticsearch:8.12.2-beta");
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let text: String = (0..50).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(&text);
        assert!(tail.starts_with("line 30"));
        assert!(tail.ends_with("line 49"));
    }

    #[tokio::test]
    async fn missing_runtime_is_tool_error() {
        let runner = ContainerRunner::new("headway-no-such-runtime");
        let inv = Invocation::new("tiles", "planetiler");
        let err = runner.run(&inv).await.unwrap_err();
        assert_eq!(err.stage(), Some("tiles"));
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[test]
    fn teardown_removes_container_before_network() {
        let spec = ServiceSpec::new("pelias-elasticsearch", "pelias/elasticsearch:8.12.2-beta");
        let handle = ServiceHandle::for_spec(&spec);
        let [container, network] = teardown_args(&handle);
        assert_eq!(container, ["rm", "-f", handle.container.as_str()]);
        assert_eq!(network, ["network", "rm", handle.network.as_str()]);
    }

    /// A runtime stand-in that records its argv and always fails.
    #[cfg(unix)]
    fn recording_runtime(dir: &std::path::Path) -> (String, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("calls.log");
        let script = dir.join("runtime");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$@\" >> '{}'\nexit 1\n", log.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script.display().to_string(), log)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_removes_network_even_when_container_removal_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, log) = recording_runtime(dir.path());
        let runner = ContainerRunner::new(runtime);
        let spec = ServiceSpec::new("pelias-elasticsearch", "pelias/elasticsearch:8.12.2-beta");
        let handle = ServiceHandle::for_spec(&spec);

        let err = runner.stop_service(&handle).await.unwrap_err();

        assert_eq!(err.stage(), Some("stop pelias-elasticsearch"));
        let calls = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<_> = calls.lines().collect();
        assert_eq!(
            lines,
            vec![
                format!("rm -f {}", handle.container),
                format!("network rm {}", handle.network),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn abandon_removes_container_and_network() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, log) = recording_runtime(dir.path());
        let runner = ContainerRunner::new(runtime);
        let spec = ServiceSpec::new("pelias-elasticsearch", "pelias/elasticsearch:8.12.2-beta");
        let handle = ServiceHandle::for_spec(&spec);

        runner.abandon_service(&handle);

        let expected = format!("network rm {}", handle.network);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        let calls = loop {
            let calls = std::fs::read_to_string(&log).unwrap_or_default();
            if calls.contains(&expected) || std::time::Instant::now() > deadline {
                break calls;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        };
        assert!(calls.contains(&format!("rm -f {}", handle.container)));
        assert!(calls.contains(&expected));
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stage_and_stderr() {
        // `sh` stands in for the runtime; `run --rm ...` makes it fail.
        let runner = ContainerRunner::new("sh");
        let inv = Invocation::new("routing tiles", "valhalla");
        let err = runner.run(&inv).await.unwrap_err();
        assert!(matches!(err, HeadwayError::ExternalTool { ref stage, .. } if stage == "routing tiles"));
    }
}
