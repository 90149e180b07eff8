//! Subprocess execution shared by every pipeline stage.
//!
//! All external tools (version probes, `docker build`, `docker run`, cleanup)
//! go through [`ProcessRunner`], so timeout, capture, and logging policy live
//! in one place. Tests substitute [`mock::MockProcessRunner`].

pub mod mock;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::ProcessError;

/// A single command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
    /// Short human-readable name used in logs and timeout errors.
    pub label: String,
}

impl ProcessSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.into();
        Self {
            label: program.clone(),
            program,
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// The command line as it would be typed, for logs.
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr followed by stdout, trimmed; what an operator wants to read
    /// when a toolchain fails.
    pub fn combined_output(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (true, true) => format!("exit code {:?}", self.exit_code),
            (false, true) => stderr.to_string(),
            (true, false) => stdout.to_string(),
            (false, false) => format!("{}\n{}", stderr, stdout),
        }
    }
}

/// Abstraction over subprocess execution for testability.
/// Real implementation: `TokioProcessRunner`. Test double: `MockProcessRunner`.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a command to completion. A nonzero exit is *not* an error here;
    /// callers decide what a failed exit means for their stage.
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput, ProcessError>;
}

/// Runs commands with `tokio::process`, killing them when the timeout elapses.
#[derive(Debug, Default, Clone)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput, ProcessError> {
        debug!(label = %spec.label, command = %spec.display_command(), "spawning process");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // Dropping the future on timeout drops the child, and kill_on_drop
        // terminates it.
        let output = match timeout(spec.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ProcessError::Io {
                label: spec.label.clone(),
                source,
            })?,
            Err(_) => {
                warn!(label = %spec.label, timeout_secs = spec.timeout.as_secs(), "process timed out");
                return Err(ProcessError::TimedOut {
                    label: spec.label,
                    timeout: spec.timeout,
                });
            }
        };

        let result = ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if result.success() {
            debug!(label = %spec.label, "process finished");
        } else {
            warn!(label = %spec.label, exit_code = ?result.exit_code, "process exited unsuccessfully");
        }
        Ok(result)
    }
}
