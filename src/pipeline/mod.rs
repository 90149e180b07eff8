//! Pipeline orchestrator.
//!
//! One [`Orchestrator::run`] call checks the host toolchain, then drives one
//! or more [`BuildWorkspace`]s through generation, materialization, build,
//! and execution. A compilation failure may start a new request with the
//! build output fed back to the generation service, up to the configured
//! number of fix attempts. Each attempt gets its own workspace and is torn
//! down before the next one starts.

pub mod status;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::Config;
use crate::errors::PipelineError;
use crate::gate::VersionGate;
use crate::generation::{CompletionBackend, GenerationClient, GenerationOptions};
use crate::isolation::{BuildStage, ExecutionStage, ResourceCleaner, ResourceTracker};
use crate::process::ProcessRunner;
use crate::workspace::{BuildWorkspace, GenerationRequest, RequestId, WorkspaceStage, materialize};
use status::{StatusEvent, StatusPublisher};

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSuccess {
    pub request_id: RequestId,
    pub app_name: String,
    pub app_identifier: String,
    pub artifact_path: PathBuf,
}

pub type PipelineOutcome = Result<PipelineSuccess, PipelineError>;

/// Message of the `failed` event published for an attempt dropped
/// mid-flight.
pub const CANCELLED_MESSAGE: &str = "pipeline cancelled";

/// History of one generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub request_id: RequestId,
    /// 0 for the original request, n for the n-th fix attempt.
    pub fix_attempt: u32,
    pub stages: Vec<WorkspaceStage>,
    pub error: Option<String>,
    pub cleaned_up: bool,
}

#[derive(Debug)]
pub struct PipelineReport {
    pub attempts: Vec<AttemptRecord>,
    pub outcome: PipelineOutcome,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Id of the last request made, if the run got past the gate.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.attempts.last().map(|a| &a.request_id)
    }

    pub fn envelope(&self) -> ResponseEnvelope {
        match &self.outcome {
            Ok(success) => ResponseEnvelope {
                success: true,
                request_id: Some(success.request_id.to_string()),
                ..Default::default()
            },
            Err(err) => ResponseEnvelope {
                success: false,
                request_id: self.request_id().map(ToString::to_string),
                error: Some(err.to_string()),
                stage: Some(err.stage().to_string()),
                fix_attempts_remaining: err.fix_attempts_remaining(),
            },
        }
    }
}

/// JSON body returned to callers of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_attempts_remaining: Option<u32>,
}

impl ResponseEnvelope {
    /// A request refused before the pipeline started.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

pub struct Orchestrator {
    config: Config,
    apps_root: PathBuf,
    generation: GenerationClient,
    gate: VersionGate,
    build: BuildStage,
    execution: ExecutionStage,
    cleaner: ResourceCleaner,
    tracker: ResourceTracker,
    events: StatusPublisher,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        backend: Arc<dyn CompletionBackend>,
        runner: Arc<dyn ProcessRunner>,
        events: StatusPublisher,
    ) -> Self {
        // The build container bind-mounts the workspace, which needs an
        // absolute host path.
        let apps_root = std::path::absolute(&config.workspace.apps_root)
            .unwrap_or_else(|_| config.workspace.apps_root.clone());
        let tracker = ResourceTracker::new();
        let timeouts = &config.timeouts;

        Self {
            apps_root,
            generation: GenerationClient::new(
                backend,
                GenerationOptions::from(&config.generation),
            ),
            gate: VersionGate::new(
                runner.clone(),
                config.dependencies.clone(),
                timeouts.probe(),
            ),
            build: BuildStage::new(
                runner.clone(),
                config.images.clone(),
                tracker.clone(),
                timeouts.image_build(),
                timeouts.compile(),
            ),
            execution: ExecutionStage::new(
                runner.clone(),
                config.images.clone(),
                tracker.clone(),
                timeouts.image_build(),
                timeouts.run(),
            ),
            cleaner: ResourceCleaner::new(runner, timeouts.cleanup()),
            tracker,
            events,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn apps_root(&self) -> &std::path::Path {
        &self.apps_root
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    pub fn events(&self) -> &StatusPublisher {
        &self.events
    }

    /// Run the whole pipeline for one prompt. Never panics on stage
    /// failures; the report carries exactly one error when it fails.
    pub async fn run(&self, prompt: &str) -> PipelineReport {
        let span = info_span!("pipeline", prompt_chars = prompt.len());
        self.run_inner(prompt).instrument(span).await
    }

    async fn run_inner(&self, prompt: &str) -> PipelineReport {
        let mut attempts = Vec::new();

        self.events.publish(StatusEvent::new(
            None,
            "dependencies",
            "checking host toolchain",
        ));
        if let Err(err) = self.gate.check_dependencies().await {
            error!(error = %err, "dependency check failed");
            self.events
                .publish(StatusEvent::new(None, "dependencies", err.to_string()));
            return PipelineReport {
                attempts,
                outcome: Err(err.into()),
            };
        }

        let max_fix_attempts = self.config.effective_max_fix_attempts();
        let mut build_failure: Option<String> = None;
        let mut fix_attempt = 0;

        let outcome = loop {
            let request = GenerationRequest::new(prompt);
            let (record, result) = self
                .run_attempt(request, fix_attempt, build_failure.as_deref())
                .await;
            attempts.push(record);

            match result {
                Err(PipelineError::Compilation { output, .. }) if fix_attempt < max_fix_attempts => {
                    fix_attempt += 1;
                    warn!(
                        fix_attempt,
                        max_fix_attempts, "compilation failed; requesting a fixed project"
                    );
                    build_failure = Some(output);
                }
                Err(PipelineError::Compilation { output, .. }) => {
                    break Err(PipelineError::Compilation {
                        output,
                        fix_attempts_remaining: max_fix_attempts - fix_attempt,
                    });
                }
                other => break other,
            }
        };

        match &outcome {
            Ok(success) => info!(request_id = %success.request_id, "pipeline succeeded"),
            Err(err) => error!(stage = err.stage(), error = %err, "pipeline failed"),
        }
        PipelineReport { attempts, outcome }
    }

    async fn run_attempt(
        &self,
        request: GenerationRequest,
        fix_attempt: u32,
        build_failure: Option<&str>,
    ) -> (AttemptRecord, PipelineOutcome) {
        let mut workspace = BuildWorkspace::new(request, &self.apps_root);
        let span = info_span!("attempt", request_id = %workspace.request_id(), fix_attempt);
        let mut guard = AbandonGuard {
            request_id: workspace.request_id().clone(),
            directory: (!self.config.workspace.retain_workspaces)
                .then(|| workspace.directory().to_path_buf()),
            events: self.events.clone(),
            armed: true,
        };

        async {
            let result = self.drive(&mut workspace, build_failure).await;

            if let Err(err) = &result {
                if let Err(e) = self
                    .events
                    .advance(&mut workspace, WorkspaceStage::Failed, err.to_string())
                {
                    warn!(error = %e, "could not mark workspace failed");
                }
            }

            let cleaned_up = self
                .cleaner
                .teardown(
                    &workspace,
                    &self.tracker,
                    self.config.workspace.retain_workspaces,
                )
                .await;
            if let Err(e) =
                self.events
                    .advance(&mut workspace, WorkspaceStage::CleanedUp, "workspace cleaned up")
            {
                warn!(error = %e, "could not mark workspace cleaned up");
            }
            guard.armed = false;

            let record = AttemptRecord {
                request_id: workspace.request_id().clone(),
                fix_attempt,
                stages: workspace.history().to_vec(),
                error: result.as_ref().err().map(ToString::to_string),
                cleaned_up,
            };
            (record, result)
        }
        .instrument(span)
        .await
    }

    /// Walk one workspace from `Created` to `Running`.
    async fn drive(
        &self,
        workspace: &mut BuildWorkspace,
        build_failure: Option<&str>,
    ) -> PipelineOutcome {
        let prompt = workspace.request().prompt.clone();
        let app = match build_failure {
            None => self.generation.generate(&prompt).await?,
            Some(output) => self.generation.fix_build_errors(&prompt, output).await?,
        };
        let app_identifier = app.app_identifier();
        let file_count = app.file_set.len();

        self.events.advance(
            workspace,
            WorkspaceStage::CodeSaved,
            format!("generated {} files for {}", file_count, app.app_name),
        )?;

        materialize(&app.file_set, workspace.directory()).await?;
        let saved = format!("project saved to {}", workspace.directory().display());
        self.events
            .advance(workspace, WorkspaceStage::BuildContainerReady, saved)?;

        let artifact_path = self.build.build_artifact(workspace, &self.events).await?;
        if !tokio::fs::try_exists(&artifact_path).await.unwrap_or(false) {
            return Err(PipelineError::ArtifactMissing {
                path: artifact_path,
            });
        }
        self.events
            .advance(workspace, WorkspaceStage::RunContainerReady, "artifact built")?;

        self.execution
            .deploy_and_run(workspace, &artifact_path, &app_identifier, &self.events)
            .await?;

        Ok(PipelineSuccess {
            request_id: workspace.request_id().clone(),
            app_name: app.app_name,
            app_identifier,
            artifact_path,
        })
    }

    /// Remove container resources at shutdown according to the configured
    /// scope. Returns false if anything could not be removed.
    pub async fn purge(&self) -> bool {
        let scope = self.config.pipeline.cleanup;
        self.events
            .publish(StatusEvent::new(None, "shutdown", format!("purging {} resources", scope)));
        self.cleaner.purge(scope, &self.tracker).await
    }
}

/// Removes an attempt's directory when the attempt is dropped before its
/// own teardown ran. Its containers and images stay in the tracker for the
/// shutdown purge.
struct AbandonGuard {
    request_id: RequestId,
    /// `None` when workspaces are retained.
    directory: Option<PathBuf>,
    events: StatusPublisher,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(request_id = %self.request_id, "attempt abandoned before teardown");
        self.events.publish(StatusEvent::new(
            Some(self.request_id.clone()),
            WorkspaceStage::Failed.as_str(),
            CANCELLED_MESSAGE,
        ));

        let Some(directory) = self.directory.take() else {
            return;
        };
        let request_id = self.request_id.clone();
        let remove = move || match std::fs::remove_dir_all(&directory) {
            Ok(()) => info!(%request_id, "abandoned workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(%request_id, error = %e, "failed to remove abandoned workspace");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    use crate::process::ProcessSpec;
    use crate::process::mock::{MockOutcome, MockProcessRunner};
    use crate::workspace::ARTIFACT_SUBPATH;

    /// Stand-in for gradle: drop an APK into the bind-mounted workspace.
    pub(crate) fn produce_artifact(spec: &ProcessSpec) -> MockOutcome {
        let host_dir = spec
            .args
            .iter()
            .position(|a| a == "-v")
            .and_then(|i| spec.args.get(i + 1))
            .and_then(|mount| mount.strip_suffix(":/app"))
            .map(PathBuf::from)
            .unwrap();
        let apk = host_dir.join(ARTIFACT_SUBPATH);
        std::fs::create_dir_all(apk.parent().unwrap()).unwrap();
        std::fs::write(&apk, b"PK\x03\x04apk").unwrap();
        MockOutcome::ok("BUILD SUCCESSFUL")
    }

    pub(crate) fn healthy_runner() -> MockProcessRunner {
        MockProcessRunner::new().with_default(MockOutcome::ok("99.0.0"))
    }
}
