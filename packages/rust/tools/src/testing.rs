//! Scripted [`ToolRunner`] for tests: no containers, no network.
//!
//! Every invocation is recorded. Declared outputs are created on success so
//! downstream steps (compression, bundling) see real files. Responses are
//! keyed by a pattern matched against the stage name with `contains`.

use std::sync::Mutex;

use async_trait::async_trait;

use headway_shared::{HeadwayError, Result};

use crate::invocation::{DeclaredOutput, Invocation};
use crate::runner::{ToolOutput, ToolRunner};
use crate::service::{ServiceHandle, ServiceSpec};

#[derive(Debug, Clone)]
enum Response {
    Stdout(String),
    FileContent(String),
    Fail(String),
}

#[derive(Debug, Default)]
struct State {
    invocations: Vec<Invocation>,
    started: Vec<String>,
    stopped: Vec<String>,
    abandoned: Vec<String>,
}

/// Records invocations and plays back scripted responses.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Vec<(String, Response)>,
    service_start_failure: Option<String>,
    state: Mutex<State>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages containing `pattern` print `stdout`.
    pub fn with_stdout(mut self, pattern: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.responses
            .push((pattern.into(), Response::Stdout(stdout.into())));
        self
    }

    /// Stages containing `pattern` write `content` into their declared files.
    pub fn with_file_content(
        mut self,
        pattern: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.responses
            .push((pattern.into(), Response::FileContent(content.into())));
        self
    }

    /// Stages containing `pattern` fail with `message`.
    pub fn fail_stage(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses
            .push((pattern.into(), Response::Fail(message.into())));
        self
    }

    pub fn fail_service_start(mut self, message: impl Into<String>) -> Self {
        self.service_start_failure = Some(message.into());
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every invocation run so far, in call order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.lock().invocations.clone()
    }

    /// Stage names run so far, in call order.
    pub fn stages(&self) -> Vec<String> {
        self.lock()
            .invocations
            .iter()
            .map(|i| i.stage.clone())
            .collect()
    }

    /// Invocations whose stage contains `pattern`.
    pub fn invocations_matching(&self, pattern: &str) -> Vec<Invocation> {
        self.lock()
            .invocations
            .iter()
            .filter(|i| i.stage.contains(pattern))
            .cloned()
            .collect()
    }

    pub fn services_started(&self) -> Vec<String> {
        self.lock().started.clone()
    }

    pub fn services_stopped(&self) -> Vec<String> {
        self.lock().stopped.clone()
    }

    pub fn services_abandoned(&self) -> Vec<String> {
        self.lock().abandoned.clone()
    }

    fn responses_for(&self, stage: &str) -> impl Iterator<Item = &Response> {
        self.responses
            .iter()
            .filter(move |(pattern, _)| stage.contains(pattern.as_str()))
            .map(|(_, r)| r)
    }
}

fn create_output(output: &DeclaredOutput, content: &str) -> Result<()> {
    match output {
        DeclaredOutput::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| HeadwayError::io(parent, e))?;
            }
            std::fs::write(path, content).map_err(|e| HeadwayError::io(path, e))
        }
        DeclaredOutput::Directory(path) => {
            std::fs::create_dir_all(path).map_err(|e| HeadwayError::io(path, e))?;
            let marker = path.join("scripted.out");
            std::fs::write(&marker, content).map_err(|e| HeadwayError::io(&marker, e))
        }
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        self.lock().invocations.push(invocation.clone());

        let mut stdout = String::new();
        let mut content = invocation.stage.clone();
        for response in self.responses_for(&invocation.stage) {
            match response {
                Response::Fail(message) => {
                    return Err(HeadwayError::tool(&invocation.stage, message.clone()));
                }
                Response::Stdout(s) => stdout = s.clone(),
                Response::FileContent(c) => content = c.clone(),
            }
        }

        for output in &invocation.outputs {
            create_output(output, &content)?;
        }

        Ok(ToolOutput {
            stdout,
            stderr: String::new(),
        })
    }

    async fn start_service(&self, spec: &ServiceSpec) -> Result<ServiceHandle> {
        if let Some(message) = &self.service_start_failure {
            return Err(HeadwayError::tool(
                format!("start {}", spec.name),
                message.clone(),
            ));
        }
        self.lock().started.push(spec.name.clone());
        Ok(ServiceHandle::for_spec(spec))
    }

    async fn stop_service(&self, handle: &ServiceHandle) -> Result<()> {
        self.lock().stopped.push(handle.hostname.clone());
        Ok(())
    }

    fn abandon_service(&self, handle: &ServiceHandle) {
        self.lock().abandoned.push(handle.hostname.clone());
    }
}
