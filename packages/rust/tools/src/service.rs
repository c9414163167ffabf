//! Transient services with scoped lifetimes.
//!
//! [`with_service`] starts a service, runs a body against it, and stops it on
//! every exit path: success, body failure, and cancellation (drop).

use std::future::Future;
use std::path::PathBuf;

use tracing::warn;

use headway_shared::Result;

use crate::invocation::Mount;
use crate::runner::ToolRunner;

/// Launch description for a long-running collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Hostname other containers use to reach the service.
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: Vec::new(),
            mounts: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Mount a persistent directory (the service's backing storage).
    pub fn mount_rw(mut self, host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        self.mounts.push(Mount {
            host: host.into(),
            container: container.into(),
            read_only: false,
        });
        self
    }
}

/// A running service. Invocations reach it by joining `network` and
/// addressing `hostname`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub container: String,
    pub network: String,
    pub hostname: String,
}

impl ServiceHandle {
    /// Fresh container and network names for one run of `spec`.
    pub fn for_spec(spec: &ServiceSpec) -> Self {
        let suffix = uuid::Uuid::now_v7().simple().to_string();
        Self {
            container: format!("headway-{}-{suffix}", spec.name),
            network: format!("headway-net-{suffix}"),
            hostname: spec.name.clone(),
        }
    }
}

/// Stops the service if the scope is dropped before the explicit stop.
struct ServiceGuard<'a> {
    runner: &'a dyn ToolRunner,
    handle: Option<ServiceHandle>,
}

impl Drop for ServiceGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.runner.abandon_service(&handle);
        }
    }
}

/// Run `body` against a freshly started service, then stop it.
///
/// A body error wins over a stop error; the stop error is logged.
pub async fn with_service<T, F, Fut>(runner: &dyn ToolRunner, spec: &ServiceSpec, body: F) -> Result<T>
where
    F: FnOnce(ServiceHandle) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let handle = runner.start_service(spec).await?;
    let mut guard = ServiceGuard {
        runner,
        handle: Some(handle.clone()),
    };

    let outcome = body(handle.clone()).await;

    guard.handle = None;
    let stopped = runner.stop_service(&handle).await;

    match (outcome, stopped) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(stop_err)) => Err(stop_err),
        (Err(body_err), Ok(())) => Err(body_err),
        (Err(body_err), Err(stop_err)) => {
            warn!(service = %spec.name, error = %stop_err, "failed to stop service after error");
            Err(body_err)
        }
    }
}
