//! Typed error hierarchy for appgen.
//!
//! Each pipeline stage has its own error type; `PipelineError` wraps them so
//! the orchestrator can surface exactly one failure per request:
//! - `DependencyError`: version gate (aggregates every missing/outdated tool)
//! - `GenerationError`: generation service transport and response validation
//! - `MaterializeError`: writing a file set to disk
//! - `BuildError`: build image construction and compilation
//! - `DeploymentError`: run image construction and instance start
//! - `ProcessError`: subprocess plumbing shared by every stage

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A dependency that was found but reports a version below the minimum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutdatedDependency {
    pub name: String,
    pub current: String,
    pub required: String,
}

impl fmt::Display for OutdatedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (current: {}, required: {})",
            self.name, self.current, self.required
        )
    }
}

/// Host toolchain pre-flight failure. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyError {
    pub missing: Vec<String>,
    pub outdated: Vec<OutdatedDependency>,
}

impl DependencyError {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.outdated.is_empty()
    }

    /// Total number of failing dependencies.
    pub fn len(&self) -> usize {
        self.missing.len() + self.outdated.len()
    }
}

impl fmt::Display for DependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Missing or outdated dependencies:")?;
        if !self.missing.is_empty() {
            write!(f, "\nMissing: {}", self.missing.join(", "))?;
        }
        if !self.outdated.is_empty() {
            let outdated: Vec<String> = self.outdated.iter().map(|d| d.to_string()).collect();
            write!(f, "\nOutdated: {}", outdated.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for DependencyError {}

/// Errors from the generation client.
///
/// Transport failures are mapped onto distinct variants so callers can pick a
/// retry policy per kind; see [`GenerationError::is_retryable`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Failed to parse generation response: {0}")]
    MalformedResponse(String),

    #[error("Missing required files in generation response: {}", .missing.join(", "))]
    IncompleteResponse { missing: Vec<String> },

    #[error("Invalid package.json: {0}")]
    InvalidManifest(String),

    #[error("Security issues found: {}", .issues.join("; "))]
    SecurityRejected { issues: Vec<String> },

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimit { retry_after: Option<u64> },

    #[error("Authentication failed with the generation service.")]
    Auth,

    #[error("Invalid request to the generation service: {0}")]
    InvalidRequest(String),

    #[error("Generation service error: {0}")]
    Service(String),

    #[error("Generation service is not configured: {0}")]
    Configuration(String),
}

impl GenerationError {
    /// Rate limiting and generic service failures may succeed on a later
    /// attempt; everything else needs a different prompt or operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::Service(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedResponse(_) => "malformed_response",
            Self::IncompleteResponse { .. } => "incomplete_response",
            Self::InvalidManifest(_) => "invalid_manifest",
            Self::SecurityRejected { .. } => "security_rejected",
            Self::RateLimit { .. } => "rate_limit",
            Self::Auth => "auth",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Service(_) => "service",
            Self::Configuration(_) => "configuration",
        }
    }
}

/// Errors from the shared process runner.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{label}` timed out after {}s", .timeout.as_secs())]
    TimedOut { label: String, timeout: Duration },

    #[error("Failed to wait for `{label}`: {source}")]
    Io {
        label: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from writing a file set into a workspace directory.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Refusing to write outside the workspace: {path}")]
    UnsafePath { path: String },

    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the isolated build stage.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Descriptor write or image build failed. Fatal for the request.
    #[error("Failed to build the build environment: {0}")]
    EnvironmentBuild(String),

    /// The toolchain ran and failed; `output` is its raw failure text.
    #[error("Compilation failed:\n{output}")]
    Compilation { output: String },

    /// The compile container could not be started or did not finish in
    /// time. There is no toolchain output to act on.
    #[error("Compilation did not complete: {0}")]
    CompileAborted(#[source] ProcessError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Errors from the isolated execution stage.
#[derive(Debug, Error)]
#[error("Deployment failed: {message}")]
pub struct DeploymentError {
    pub message: String,
}

impl DeploymentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<WorkspaceError> for DeploymentError {
    fn from(err: WorkspaceError) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors from the per-request workspace record.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Invalid workspace transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// The single failure the orchestrator reports for a pipeline invocation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Failed to save app files: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("{0}")]
    EnvironmentBuild(String),

    #[error("Compilation failed ({fix_attempts_remaining} fix attempts remaining):\n{output}")]
    Compilation {
        output: String,
        fix_attempts_remaining: u32,
    },

    #[error("{0}")]
    CompileAborted(String),

    #[error("Build finished but no artifact was found at {}", .path.display())]
    ArtifactMissing { path: PathBuf },

    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl PipelineError {
    /// Stage name reported alongside the error message.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Dependency(_) => "dependencies",
            Self::Generation(_) => "generation",
            Self::Materialize(_) => "materialization",
            Self::EnvironmentBuild(_) => "environment_build",
            Self::Compilation { .. } | Self::CompileAborted(_) | Self::ArtifactMissing { .. } => {
                "compilation"
            }
            Self::Deployment(_) => "deployment",
            Self::Workspace(_) => "workspace",
        }
    }

    pub fn fix_attempts_remaining(&self) -> Option<u32> {
        match self {
            Self::Compilation {
                fix_attempts_remaining,
                ..
            } => Some(*fix_attempts_remaining),
            _ => None,
        }
    }
}

impl From<BuildError> for PipelineError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::EnvironmentBuild(_) => Self::EnvironmentBuild(err.to_string()),
            BuildError::Compilation { output } => Self::Compilation {
                output,
                fix_attempts_remaining: 0,
            },
            BuildError::CompileAborted(_) => Self::CompileAborted(err.to_string()),
            BuildError::Workspace(err) => Self::Workspace(err),
        }
    }
}
