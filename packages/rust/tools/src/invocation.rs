//! The shape of one external tool call.
//!
//! Every collaborator (tile builder, routing builder, clipper, importers,
//! transit graph builder, raster converter) is driven the same way: a
//! container image, an argv, host paths mounted in, and host paths the tool
//! must leave behind. Inputs are mounted read-only unless the tool writes
//! into them.

use std::path::{Path, PathBuf};

/// A host path bound into the tool's filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

/// A host path the tool must create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredOutput {
    File(PathBuf),
    Directory(PathBuf),
}

impl DeclaredOutput {
    pub fn path(&self) -> &Path {
        match self {
            Self::File(p) | Self::Directory(p) => p,
        }
    }

    /// True once the tool has produced this output.
    pub fn exists(&self) -> bool {
        match self {
            Self::File(p) => p.is_file(),
            Self::Directory(p) => p.is_dir(),
        }
    }
}

/// One stateless call into an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Stage name attached to any failure.
    pub stage: String,
    pub image: String,
    /// Overrides the image entrypoint.
    pub entrypoint: Option<String>,
    pub args: Vec<String>,
    pub workdir: Option<String>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    /// Network to join (for talking to a transient service).
    pub network: Option<String>,
    pub outputs: Vec<DeclaredOutput>,
}

impl Invocation {
    pub fn new(stage: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            image: image.into(),
            entrypoint: None,
            args: Vec::new(),
            workdir: None,
            env: Vec::new(),
            mounts: Vec::new(),
            network: None,
            outputs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run `script` through `sh -c`, for tools that write to stdout redirects.
    pub fn shell(mut self, script: impl Into<String>) -> Self {
        self.entrypoint = Some("sh".into());
        self.args = vec!["-c".into(), script.into()];
        self
    }

    pub fn entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Mount an input the tool only reads.
    pub fn mount_ro(mut self, host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        self.mounts.push(Mount {
            host: host.into(),
            container: container.into(),
            read_only: true,
        });
        self
    }

    /// Mount a directory the tool writes into. Created if absent.
    pub fn mount_rw(mut self, host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        self.mounts.push(Mount {
            host: host.into(),
            container: container.into(),
            read_only: false,
        });
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn produces_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(DeclaredOutput::File(path.into()));
        self
    }

    pub fn produces_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(DeclaredOutput::Directory(path.into()));
        self
    }

    /// Declared outputs the tool failed to produce.
    pub fn missing_outputs(&self) -> Vec<&DeclaredOutput> {
        self.outputs.iter().filter(|o| !o.exists()).collect()
    }

    /// The full argv after the image, in order.
    pub fn command_line(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(ep) = &self.entrypoint {
            parts.push(ep);
        }
        parts.extend(self.args.iter().map(String::as_str));
        parts.join(" ")
    }
}

/// Single-quote `value` for interpolation into a `sh -c` script.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
