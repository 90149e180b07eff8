//! Execution stage: run image construction and the app's first launch.
//!
//! The run container is started with `--privileged` because the emulator
//! needs KVM inside it. The app is untrusted generated code; the container
//! boundary is what isolates it, and the in-container privileges are an
//! accepted part of that boundary.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, info, info_span};

use super::{
    RUN_DESCRIPTOR, ResourceTracker, request_label, run_container_name, run_environment,
    run_image_tag,
};
use crate::config::ImageSettings;
use crate::errors::DeploymentError;
use crate::pipeline::status::StatusPublisher;
use crate::process::{ProcessRunner, ProcessSpec};
use crate::util::truncate_tail;
use crate::workspace::{BuildWorkspace, WorkspaceStage};

const MAX_DEPLOY_OUTPUT_CHARS: usize = 4_000;

pub struct ExecutionStage {
    runner: Arc<dyn ProcessRunner>,
    images: ImageSettings,
    tracker: ResourceTracker,
    image_build_timeout: Duration,
    run_timeout: Duration,
}

impl ExecutionStage {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        images: ImageSettings,
        tracker: ResourceTracker,
        image_build_timeout: Duration,
        run_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            images,
            tracker,
            image_build_timeout,
            run_timeout,
        }
    }

    /// Build the run image around `artifact_path` and run it to completion.
    ///
    /// Expects the workspace at `RunContainerReady`; it moves to `Running`
    /// once the image is built, before the instance starts.
    pub async fn deploy_and_run(
        &self,
        workspace: &mut BuildWorkspace,
        artifact_path: &Path,
        app_identifier: &str,
        events: &StatusPublisher,
    ) -> Result<(), DeploymentError> {
        let span = info_span!("deploy", request_id = %workspace.request_id(), app = app_identifier);
        async {
            self.build_run_image(workspace, artifact_path, app_identifier)
                .await?;
            events.advance(workspace, WorkspaceStage::Running, "starting app instance")?;
            self.start_instance(workspace).await
        }
        .instrument(span)
        .await
    }

    async fn build_run_image(
        &self,
        workspace: &mut BuildWorkspace,
        artifact_path: &Path,
        app_identifier: &str,
    ) -> Result<(), DeploymentError> {
        let artifact = artifact_path
            .strip_prefix(workspace.directory())
            .map_err(|_| {
                DeploymentError::new(format!(
                    "artifact {} is outside the workspace",
                    artifact_path.display()
                ))
            })?
            .to_string_lossy()
            .into_owned();

        let descriptor = workspace.directory().join(RUN_DESCRIPTOR);
        let dockerfile = run_environment(&self.images, &artifact, app_identifier).render_dockerfile();
        tokio::fs::write(&descriptor, dockerfile)
            .await
            .map_err(|e| DeploymentError::new(format!("writing {}: {}", descriptor.display(), e)))?;

        let id = workspace.request_id().clone();
        let tag = run_image_tag(&id);
        workspace.record_image(tag.clone());
        self.tracker.track_image(tag.clone());

        let spec = ProcessSpec::new(
            "docker",
            [
                "build".to_string(),
                "-t".to_string(),
                tag.clone(),
                "--label".to_string(),
                request_label(&id),
                "-f".to_string(),
                RUN_DESCRIPTOR.to_string(),
                ".".to_string(),
            ],
        )
        .current_dir(workspace.directory())
        .timeout(self.image_build_timeout)
        .label("docker build (run image)");

        let output = self
            .runner
            .run(spec)
            .await
            .map_err(|e| DeploymentError::new(e.to_string()))?;
        if !output.success() {
            return Err(DeploymentError::new(format!(
                "run image build failed: {}",
                truncate_tail(&output.combined_output(), MAX_DEPLOY_OUTPUT_CHARS)
            )));
        }
        info!(%tag, "run image ready");
        Ok(())
    }

    async fn start_instance(&self, workspace: &mut BuildWorkspace) -> Result<(), DeploymentError> {
        let id = workspace.request_id().clone();
        let container = run_container_name(&id);
        workspace.record_container(container.clone());
        self.tracker.track_container(container.clone());

        // -i without -t: the server has no TTY to hand the container.
        let spec = ProcessSpec::new(
            "docker",
            [
                "run".to_string(),
                "--privileged".to_string(),
                "-i".to_string(),
                "--name".to_string(),
                container,
                "--label".to_string(),
                request_label(&id),
                run_image_tag(&id),
            ],
        )
        .timeout(self.run_timeout)
        .label("docker run (app instance)");

        let output = self
            .runner
            .run(spec)
            .await
            .map_err(|e| DeploymentError::new(e.to_string()))?;
        if !output.success() {
            return Err(DeploymentError::new(format!(
                "app instance failed: {}",
                truncate_tail(&output.combined_output(), MAX_DEPLOY_OUTPUT_CHARS)
            )));
        }
        info!("app instance finished");
        Ok(())
    }
}
