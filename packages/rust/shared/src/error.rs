//! Error types for Headway builds.
//!
//! Library crates use [`HeadwayError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Headway build operations.
#[derive(Debug, thiserror::Error)]
pub enum HeadwayError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Generic input validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// An area build was requested without an area name.
    #[error("validation error: an area name is required")]
    MissingArea,

    /// The reference table has zero or several entries for the area.
    #[error("validation error: expected exactly one bbox entry for area '{area}', found {matches}")]
    AmbiguousOrMissingArea { area: String, matches: usize },

    /// Bbox text did not contain four numeric tokens.
    #[error("validation error: malformed bbox '{input}': {reason}")]
    MalformedBbox { input: String, reason: String },

    /// Remote fetch returned a non-success result.
    #[error("download error: {0}")]
    Download(String),

    /// An external collaborator exited with failure or produced no output.
    #[error("{stage} failed: {message}")]
    ExternalTool { stage: String, message: String },

    /// A named build stage failed.
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<HeadwayError>,
    },

    /// A transit zone sub-build failed.
    #[error("transit zone '{zone}' failed: {source}")]
    Zone {
        zone: String,
        #[source]
        source: Box<HeadwayError>,
    },

    /// One or more transit zones failed; no merged bundle was produced.
    #[error("{} transit zone(s) failed: {}", .failed.len(), summarize(.failed))]
    Zones { failed: Vec<HeadwayError> },

    /// A construction bug upstream, never an input problem.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HeadwayError>;

fn summarize(errors: &[HeadwayError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl HeadwayError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a malformed-bbox error.
    pub fn malformed_bbox(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedBbox {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an external tool failure attributed to `stage`.
    pub fn tool(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ExternalTool {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    /// Create an invariant violation.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the failing stage name.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// Attach the failing transit zone name.
    pub fn in_zone(self, zone: impl Into<String>) -> Self {
        Self::Zone {
            zone: zone.into(),
            source: Box::new(self),
        }
    }

    /// True for programmer errors that should not be reported as input errors.
    pub fn is_invariant(&self) -> bool {
        match self {
            Self::Invariant(_) => true,
            Self::Stage { source, .. } | Self::Zone { source, .. } => source.is_invariant(),
            Self::Zones { failed } => failed.iter().any(Self::is_invariant),
            _ => false,
        }
    }

    /// Name of the innermost stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Stage { source, stage } => source.stage().or(Some(stage.as_str())),
            Self::Zone { source, .. } => source.stage(),
            Self::ExternalTool { stage, .. } => Some(stage.as_str()),
            _ => None,
        }
    }
}
