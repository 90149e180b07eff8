//! Build stage: image construction and in-container compilation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, info, info_span};

use super::{
    BUILD_DESCRIPTOR, ResourceTracker, build_container_name, build_environment, build_image_tag,
    request_label,
};
use crate::config::ImageSettings;
use crate::errors::BuildError;
use crate::pipeline::status::StatusPublisher;
use crate::process::{ProcessRunner, ProcessSpec};
use crate::util::truncate_tail;
use crate::workspace::{BuildWorkspace, WorkspaceStage};

/// Toolchain output kept in a compilation failure.
pub const MAX_COMPILE_OUTPUT_CHARS: usize = 16_000;

const COMPILE_COMMAND: &str = "cd android && ./gradlew assembleRelease";

pub struct BuildStage {
    runner: Arc<dyn ProcessRunner>,
    images: ImageSettings,
    tracker: ResourceTracker,
    image_build_timeout: Duration,
    compile_timeout: Duration,
}

impl BuildStage {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        images: ImageSettings,
        tracker: ResourceTracker,
        image_build_timeout: Duration,
        compile_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            images,
            tracker,
            image_build_timeout,
            compile_timeout,
        }
    }

    /// Build the environment image, then compile inside it.
    ///
    /// Expects the workspace at `BuildContainerReady` and leaves it at
    /// `Built` on success. Returns the expected artifact path; whether the
    /// file exists is for the caller to check.
    pub async fn build_artifact(
        &self,
        workspace: &mut BuildWorkspace,
        events: &StatusPublisher,
    ) -> Result<PathBuf, BuildError> {
        let span = info_span!("build", request_id = %workspace.request_id());
        async {
            self.build_environment(workspace).await?;
            events.advance(workspace, WorkspaceStage::Built, "build environment ready")?;
            self.compile(workspace).await?;
            Ok::<_, BuildError>(workspace.artifact_path())
        }
        .instrument(span)
        .await
    }

    /// Write `Dockerfile` into the workspace and build the request's image.
    pub async fn build_environment(&self, workspace: &mut BuildWorkspace) -> Result<(), BuildError> {
        let id = workspace.request_id().clone();
        let descriptor = workspace.directory().join(BUILD_DESCRIPTOR);
        let dockerfile = build_environment(&self.images).render_dockerfile();
        tokio::fs::write(&descriptor, dockerfile).await.map_err(|e| {
            BuildError::EnvironmentBuild(format!("writing {}: {}", descriptor.display(), e))
        })?;

        let tag = build_image_tag(&id);
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
                BUILD_DESCRIPTOR.to_string(),
                ".".to_string(),
            ],
        )
        .current_dir(workspace.directory())
        .timeout(self.image_build_timeout)
        .label("docker build (build image)");

        let output = self
            .runner
            .run(spec)
            .await
            .map_err(|e| BuildError::EnvironmentBuild(e.to_string()))?;
        if !output.success() {
            return Err(BuildError::EnvironmentBuild(truncate_tail(
                &output.combined_output(),
                MAX_COMPILE_OUTPUT_CHARS,
            )));
        }
        info!(%tag, "build image ready");
        Ok(())
    }

    /// Run the release build in a fresh container with the workspace
    /// bind-mounted at `/app`, so outputs land on the host.
    pub async fn compile(&self, workspace: &mut BuildWorkspace) -> Result<(), BuildError> {
        let id = workspace.request_id().clone();
        let container = build_container_name(&id);
        workspace.record_container(container.clone());
        self.tracker.track_container(container.clone());

        let mount = format!("{}:/app", workspace.directory().display());
        let spec = ProcessSpec::new(
            "docker",
            [
                "run".to_string(),
                "--rm".to_string(),
                "--name".to_string(),
                container,
                "--label".to_string(),
                request_label(&id),
                "-v".to_string(),
                mount,
                build_image_tag(&id),
                "/bin/bash".to_string(),
                "-c".to_string(),
                COMPILE_COMMAND.to_string(),
            ],
        )
        .timeout(self.compile_timeout)
        .label("docker run (compile)");

        let output = self
            .runner
            .run(spec)
            .await
            .map_err(BuildError::CompileAborted)?;
        if !output.success() {
            return Err(BuildError::Compilation {
                output: truncate_tail(&output.combined_output(), MAX_COMPILE_OUTPUT_CHARS),
            });
        }
        info!("compilation finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProcessError;
    use crate::process::mock::{MockOutcome, MockProcessRunner};
    use crate::workspace::GenerationRequest;

    fn stage(runner: Arc<MockProcessRunner>, tracker: ResourceTracker) -> BuildStage {
        BuildStage::new(
            runner,
            ImageSettings::default(),
            tracker,
            Duration::from_secs(10),
            Duration::from_secs(20),
        )
    }

    fn ready_workspace(root: &std::path::Path) -> BuildWorkspace {
        let mut ws = BuildWorkspace::new(GenerationRequest::new("x"), root);
        std::fs::create_dir_all(ws.directory()).unwrap();
        ws.advance(WorkspaceStage::CodeSaved).unwrap();
        ws.advance(WorkspaceStage::BuildContainerReady).unwrap();
        ws
    }

    #[tokio::test]
    async fn test_build_artifact_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = ready_workspace(dir.path());
        let runner = Arc::new(MockProcessRunner::new());
        let tracker = ResourceTracker::new();

        let artifact = stage(runner.clone(), tracker.clone())
            .build_artifact(&mut ws, &StatusPublisher::detached())
            .await
            .unwrap();

        assert_eq!(artifact, ws.artifact_path());
        assert_eq!(ws.stage(), WorkspaceStage::Built);
        assert!(ws.directory().join("Dockerfile").exists());

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        let id = ws.request_id().to_string();
        assert_eq!(calls[0].working_dir.as_deref(), Some(ws.directory()));
        assert_eq!(calls[0].timeout, Duration::from_secs(10));
        assert!(calls[0].display_command().contains(&format!("build -t appgen-build:{}", id)));
        assert!(calls[0].display_command().contains(&format!("--label appgen.request={}", id)));
        assert_eq!(calls[1].timeout, Duration::from_secs(20));
        assert!(calls[1].display_command().contains(&format!(
            "-v {}:/app appgen-build:{} /bin/bash -c cd android && ./gradlew assembleRelease",
            ws.directory().display(),
            id
        )));

        assert_eq!(ws.images(), &[format!("appgen-build:{}", id)]);
        assert_eq!(ws.containers(), &[format!("appgen-build-{}", id)]);
        assert_eq!(tracker.images().len(), 1);
    }

    #[tokio::test]
    async fn test_image_build_failure_is_environment_error_and_skips_compile() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = ready_workspace(dir.path());
        let runner = Arc::new(MockProcessRunner::new());
        runner.on(&["docker build"], MockOutcome::fail(1, "Cannot connect to the Docker daemon"));

        let err = stage(runner.clone(), ResourceTracker::new())
            .build_artifact(&mut ws, &StatusPublisher::detached())
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::EnvironmentBuild(ref msg) if msg.contains("Docker daemon")));
        assert_eq!(ws.stage(), WorkspaceStage::BuildContainerReady);
        assert_eq!(runner.count_matching(&["docker run"]), 0);
        assert_eq!(ws.images().len(), 1);
    }

    #[tokio::test]
    async fn test_compile_failure_carries_toolchain_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = ready_workspace(dir.path());
        let runner = Arc::new(MockProcessRunner::new());
        runner.on(
            &["gradlew assembleRelease"],
            MockOutcome::fail(1, "FAILURE: Build failed with an exception.\n* What went wrong:\nExecution failed for task ':app:compileReleaseJavaWithJavac'."),
        );

        let err = stage(runner, ResourceTracker::new())
            .build_artifact(&mut ws, &StatusPublisher::detached())
            .await
            .unwrap_err();

        match err {
            BuildError::Compilation { output } => {
                assert!(output.contains("compileReleaseJavaWithJavac"))
            }
            other => panic!("expected compilation error, got {:?}", other),
        }
        assert_eq!(ws.stage(), WorkspaceStage::Built);
    }

    #[tokio::test]
    async fn test_compile_timeout_is_not_a_compilation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = ready_workspace(dir.path());
        let runner = Arc::new(MockProcessRunner::new());
        runner.on(&["gradlew"], MockOutcome::Timeout);

        let err = stage(runner, ResourceTracker::new())
            .build_artifact(&mut ws, &StatusPublisher::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::CompileAborted(ProcessError::TimedOut { .. })));
    }
}
