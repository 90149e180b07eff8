//! Per-request workspace record and its stage state machine.
//!
//! A [`BuildWorkspace`] owns one request's directory and the container
//! resources created for it. Its stage only moves along the pipeline's
//! transition table; anything else is rejected by [`BuildWorkspace::advance`].

pub mod fileset;
pub mod materialize;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::WorkspaceError;
pub use fileset::{FileContent, FileSet, validate_relative_path};
pub use materialize::materialize;

/// Release APK location inside a React Native project.
pub const ARTIFACT_SUBPATH: &str = "android/app/build/outputs/apk/release/app-release.apk";

/// Opaque unique token identifying one pipeline run. Safe to embed in
/// directory names, image tags and container names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub id: RequestId,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            prompt: prompt.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStage {
    Created,
    CodeSaved,
    BuildContainerReady,
    Built,
    RunContainerReady,
    Running,
    Failed,
    CleanedUp,
}

impl WorkspaceStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::CodeSaved => "code_saved",
            Self::BuildContainerReady => "build_container_ready",
            Self::Built => "built",
            Self::RunContainerReady => "run_container_ready",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::CleanedUp => "cleaned_up",
        }
    }

    /// The next stage on the success path, if any.
    pub fn successor(&self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::CodeSaved),
            Self::CodeSaved => Some(Self::BuildContainerReady),
            Self::BuildContainerReady => Some(Self::Built),
            Self::Built => Some(Self::RunContainerReady),
            Self::RunContainerReady => Some(Self::Running),
            Self::Running | Self::Failed | Self::CleanedUp => None,
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        match next {
            Self::Failed => !matches!(self, Self::Failed | Self::CleanedUp),
            Self::CleanedUp => matches!(self, Self::Running | Self::Failed),
            _ => self.successor() == Some(next),
        }
    }
}

impl fmt::Display for WorkspaceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk directory and container resources of one generation request.
#[derive(Debug)]
pub struct BuildWorkspace {
    request: GenerationRequest,
    directory: PathBuf,
    stage: WorkspaceStage,
    history: Vec<WorkspaceStage>,
    images: Vec<String>,
    containers: Vec<String>,
}

impl BuildWorkspace {
    /// A workspace at `<apps_root>/<request id>`. Nothing is created on disk
    /// until a file set is materialized into it.
    pub fn new(request: GenerationRequest, apps_root: &Path) -> Self {
        let directory = apps_root.join(request.id.as_str());
        Self {
            request,
            directory,
            stage: WorkspaceStage::Created,
            history: vec![WorkspaceStage::Created],
            images: Vec::new(),
            containers: Vec::new(),
        }
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request.id
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn stage(&self) -> WorkspaceStage {
        self.stage
    }

    /// Every stage this workspace has been in, oldest first.
    pub fn history(&self) -> &[WorkspaceStage] {
        &self.history
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.directory.join(ARTIFACT_SUBPATH)
    }

    pub fn advance(&mut self, next: WorkspaceStage) -> Result<(), WorkspaceError> {
        if !self.stage.can_transition_to(next) {
            return Err(WorkspaceError::InvalidTransition {
                from: self.stage.to_string(),
                to: next.to_string(),
            });
        }
        self.stage = next;
        self.history.push(next);
        Ok(())
    }

    pub fn record_image(&mut self, tag: impl Into<String>) {
        self.images.push(tag.into());
    }

    pub fn record_container(&mut self, name: impl Into<String>) {
        self.containers.push(name.into());
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn containers(&self) -> &[String] {
        &self.containers
    }
}
