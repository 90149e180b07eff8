//! Scripted [`ProcessRunner`] for tests.
//!
//! Rules match when every needle is a substring of the rendered command line
//! (`program arg1 arg2 ...`). Rules are tried in registration order; `once`
//! rules are consumed by their first match. Unmatched commands succeed with
//! empty output unless a different default is set.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{ProcessOutput, ProcessRunner, ProcessSpec};
use crate::errors::ProcessError;

/// What a scripted command does.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Output(ProcessOutput),
    SpawnFailure,
    Timeout,
    /// Never finishes; for cancelling a caller mid-command.
    Hang,
    /// Succeeds with empty output after the given time.
    Delay(Duration),
}

impl MockOutcome {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::Output(ProcessOutput {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        })
    }

    pub fn ok_stderr(stderr: impl Into<String>) -> Self {
        Self::Output(ProcessOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: stderr.into(),
        })
    }

    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::Output(ProcessOutput {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        })
    }
}

type Responder = Arc<dyn Fn(&ProcessSpec) -> MockOutcome + Send + Sync>;

struct Rule {
    needles: Vec<String>,
    responder: Responder,
    once: bool,
    used: bool,
}

impl Rule {
    fn matches(&self, command: &str) -> bool {
        !(self.once && self.used) && self.needles.iter().all(|n| command.contains(n.as_str()))
    }
}

pub struct MockProcessRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<ProcessSpec>>,
    default: MockOutcome,
}

impl Default for MockProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            default: MockOutcome::ok(""),
        }
    }

    /// Outcome for commands no rule matches.
    pub fn with_default(mut self, outcome: MockOutcome) -> Self {
        self.default = outcome;
        self
    }

    /// Answer every matching command with `outcome`.
    pub fn on(&self, needles: &[&str], outcome: MockOutcome) -> &Self {
        self.push(needles, Arc::new(move |_| outcome.clone()), false)
    }

    /// Answer the first matching command with `outcome`.
    pub fn on_once(&self, needles: &[&str], outcome: MockOutcome) -> &Self {
        self.push(needles, Arc::new(move |_| outcome.clone()), true)
    }

    /// Answer matching commands by calling `responder`, which may also
    /// perform side effects (e.g. create the files a real build would).
    pub fn on_with<F>(&self, needles: &[&str], responder: F) -> &Self
    where
        F: Fn(&ProcessSpec) -> MockOutcome + Send + Sync + 'static,
    {
        self.push(needles, Arc::new(responder), false)
    }

    fn push(&self, needles: &[&str], responder: Responder, once: bool) -> &Self {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Rule {
                needles: needles.iter().map(|n| n.to_string()).collect(),
                responder,
                once,
                used: false,
            });
        self
    }

    /// Every spec passed to `run`, in call order.
    pub fn calls(&self) -> Vec<ProcessSpec> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rendered command lines, in call order.
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(ProcessSpec::display_command).collect()
    }

    /// Number of recorded commands containing every needle.
    pub fn count_matching(&self, needles: &[&str]) -> usize {
        self.commands()
            .iter()
            .filter(|c| needles.iter().all(|n| c.contains(n)))
            .count()
    }

    fn respond(&self, spec: &ProcessSpec) -> MockOutcome {
        let command = spec.display_command();
        let responder = {
            let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
            rules.iter_mut().find(|r| r.matches(&command)).map(|rule| {
                rule.used = true;
                Arc::clone(&rule.responder)
            })
        };
        match responder {
            Some(responder) => responder(spec),
            None => self.default.clone(),
        }
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput, ProcessError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spec.clone());

        match self.respond(&spec) {
            MockOutcome::Output(output) => Ok(output),
            MockOutcome::SpawnFailure => Err(ProcessError::Spawn {
                program: spec.program,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
            MockOutcome::Timeout => Err(ProcessError::TimedOut {
                label: spec.label,
                timeout: Duration::ZERO,
            }),
            MockOutcome::Hang => std::future::pending().await,
            MockOutcome::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(ProcessOutput {
                    exit_code: Some(0),
                    ..Default::default()
                })
            }
        }
    }
}
