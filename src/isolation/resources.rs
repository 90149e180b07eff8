//! Tracking and removal of containers and images.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::REQUEST_LABEL;
use crate::process::{ProcessOutput, ProcessRunner, ProcessSpec};
use crate::workspace::BuildWorkspace;

/// What the shutdown purge removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupScope {
    /// Only containers and images this process created.
    #[default]
    Owned,
    /// Every container and image on the host. Only for dedicated build hosts.
    All,
}

impl fmt::Display for CleanupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned => write!(f, "owned"),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for CleanupScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owned" => Ok(Self::Owned),
            "all" => Ok(Self::All),
            _ => Err(format!(
                "Invalid cleanup scope: '{}'. Valid values: owned, all",
                s
            )),
        }
    }
}

#[derive(Debug, Default)]
struct Tracked {
    images: BTreeSet<String>,
    containers: BTreeSet<String>,
}

/// Process-wide record of every image tag and container name created.
/// Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    inner: Arc<Mutex<Tracked>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Tracked) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn track_image(&self, tag: impl Into<String>) {
        self.with(|t| t.images.insert(tag.into()));
    }

    pub fn track_container(&self, name: impl Into<String>) {
        self.with(|t| t.containers.insert(name.into()));
    }

    pub fn forget_image(&self, tag: &str) {
        self.with(|t| t.images.remove(tag));
    }

    pub fn forget_container(&self, name: &str) {
        self.with(|t| t.containers.remove(name));
    }

    pub fn images(&self) -> Vec<String> {
        self.with(|t| t.images.iter().cloned().collect())
    }

    pub fn containers(&self) -> Vec<String> {
        self.with(|t| t.containers.iter().cloned().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.with(|t| t.images.is_empty() && t.containers.is_empty())
    }
}

/// `docker rm`/`rmi` report an already-gone object as an error; for cleanup
/// that is success. With several names in one call, each failing name gets
/// its own stderr line, and every one of them must be a "No such" line.
fn only_already_gone(output: &ProcessOutput) -> bool {
    let mut errors = output
        .stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .peekable();
    errors.peek().is_some()
        && errors.all(|line| line.contains("No such container") || line.contains("No such image"))
}

/// Removes containers, images, and workspace directories.
pub struct ResourceCleaner {
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
}

impl ResourceCleaner {
    pub fn new(runner: Arc<dyn ProcessRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    async fn docker(&self, args: Vec<String>, label: &str) -> Result<String, String> {
        let spec = ProcessSpec::new("docker", args)
            .timeout(self.timeout)
            .label(label);
        match self.runner.run(spec).await {
            Ok(output) if output.success() => Ok(output.stdout),
            Ok(output) if only_already_gone(&output) => Ok(String::new()),
            Ok(output) => Err(output.combined_output()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Force-remove containers. Returns false if any removal failed.
    pub async fn remove_containers(&self, names: &[String]) -> bool {
        if names.is_empty() {
            return true;
        }
        let mut args = vec!["rm".to_string(), "-f".to_string()];
        args.extend(names.iter().cloned());
        match self.docker(args, "docker rm").await {
            Ok(_) => {
                debug!(count = names.len(), "removed containers");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to remove containers");
                false
            }
        }
    }

    /// Force-remove images. Returns false if any removal failed.
    pub async fn remove_images(&self, tags: &[String]) -> bool {
        if tags.is_empty() {
            return true;
        }
        let mut args = vec!["rmi".to_string(), "-f".to_string()];
        args.extend(tags.iter().cloned());
        match self.docker(args, "docker rmi").await {
            Ok(_) => {
                debug!(count = tags.len(), "removed images");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to remove images");
                false
            }
        }
    }

    /// Remove one request's containers, images, and (unless retained) its
    /// directory. Failures are logged; whatever could not be removed stays
    /// in `tracker` for the shutdown purge.
    pub async fn teardown(
        &self,
        workspace: &BuildWorkspace,
        tracker: &ResourceTracker,
        retain_directory: bool,
    ) -> bool {
        let request_id = workspace.request_id();
        let containers = workspace.containers().to_vec();
        let images = workspace.images().to_vec();

        let containers_ok = self.remove_containers(&containers).await;
        if containers_ok {
            containers.iter().for_each(|c| tracker.forget_container(c));
        }
        let images_ok = self.remove_images(&images).await;
        if images_ok {
            images.iter().for_each(|i| tracker.forget_image(i));
        }

        let dir_ok = if retain_directory {
            true
        } else {
            match tokio::fs::remove_dir_all(workspace.directory()).await {
                Ok(()) => true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
                Err(e) => {
                    warn!(%request_id, error = %e, "failed to remove workspace directory");
                    false
                }
            }
        };

        let ok = containers_ok && images_ok && dir_ok;
        info!(%request_id, ok, "workspace torn down");
        ok
    }

    /// Shutdown purge. `Owned` removes everything still tracked; `All`
    /// removes every container and image on the host.
    pub async fn purge(&self, scope: CleanupScope, tracker: &ResourceTracker) -> bool {
        info!(%scope, "purging container resources");
        match scope {
            CleanupScope::Owned => {
                let containers = tracker.containers();
                let images = tracker.images();
                let containers_ok = self.remove_containers(&containers).await;
                if containers_ok {
                    containers.iter().for_each(|c| tracker.forget_container(c));
                }
                let images_ok = self.remove_images(&images).await;
                if images_ok {
                    images.iter().for_each(|i| tracker.forget_image(i));
                }
                containers_ok && images_ok
            }
            CleanupScope::All => {
                let containers_ok = self.purge_listed(&["ps", "-aq"], true).await;
                let images_ok = self.purge_listed(&["images", "-q"], false).await;
                containers_ok && images_ok
            }
        }
    }

    /// Remove every container and image labelled by appgen, whichever
    /// process created it.
    pub async fn purge_labelled(&self) -> bool {
        let filter = format!("label={}", REQUEST_LABEL);
        let containers_ok = self
            .purge_listed(&["ps", "-aq", "--filter", &filter], true)
            .await;
        let images_ok = self
            .purge_listed(&["images", "-q", "--filter", &filter], false)
            .await;
        containers_ok && images_ok
    }

    async fn purge_listed(&self, list_args: &[&str], containers: bool) -> bool {
        let args: Vec<String> = list_args.iter().map(|a| a.to_string()).collect();
        let listing = match self.docker(args, "docker list").await {
            Ok(stdout) => stdout,
            Err(e) => {
                warn!(error = %e, "failed to list resources for purge");
                return false;
            }
        };
        let ids: Vec<String> = listing
            .split_whitespace()
            .map(String::from)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if containers {
            self.remove_containers(&ids).await
        } else {
            self.remove_images(&ids).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::mock::{MockOutcome, MockProcessRunner};
    use crate::workspace::GenerationRequest;

    fn cleaner(runner: Arc<MockProcessRunner>) -> ResourceCleaner {
        ResourceCleaner::new(runner, Duration::from_secs(5))
    }

    #[test]
    fn test_cleanup_scope_parse_and_display() {
        assert_eq!("owned".parse::<CleanupScope>().unwrap(), CleanupScope::Owned);
        assert_eq!("ALL".parse::<CleanupScope>().unwrap(), CleanupScope::All);
        assert!("everything".parse::<CleanupScope>().is_err());
        assert_eq!(CleanupScope::default().to_string(), "owned");
    }

    #[test]
    fn test_tracker_clones_share_state() {
        let tracker = ResourceTracker::new();
        let clone = tracker.clone();
        clone.track_image("appgen-build:abc");
        clone.track_container("appgen-build-abc");
        assert_eq!(tracker.images(), vec!["appgen-build:abc"]);
        tracker.forget_image("appgen-build:abc");
        tracker.forget_container("appgen-build-abc");
        assert!(clone.is_empty());
    }

    #[tokio::test]
    async fn test_owned_purge_only_touches_tracked_resources() {
        let runner = Arc::new(MockProcessRunner::new());
        let tracker = ResourceTracker::new();
        tracker.track_container("appgen-run-1");
        tracker.track_image("appgen-run:1");

        assert!(cleaner(runner.clone()).purge(CleanupScope::Owned, &tracker).await);
        assert_eq!(
            runner.commands(),
            vec!["docker rm -f appgen-run-1", "docker rmi -f appgen-run:1"]
        );
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_owned_purge_with_nothing_tracked_runs_nothing() {
        let runner = Arc::new(MockProcessRunner::new());
        assert!(
            cleaner(runner.clone())
                .purge(CleanupScope::Owned, &ResourceTracker::new())
                .await
        );
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_all_purge_lists_then_removes_everything() {
        let runner = Arc::new(MockProcessRunner::new());
        runner
            .on(&["docker ps -aq"], MockOutcome::ok("c1\nc2\n"))
            .on(&["docker images -q"], MockOutcome::ok("i1\ni1\ni2\n"));

        assert!(
            cleaner(runner.clone())
                .purge(CleanupScope::All, &ResourceTracker::new())
                .await
        );
        assert_eq!(runner.count_matching(&["docker rm -f c1 c2"]), 1);
        assert_eq!(runner.count_matching(&["docker rmi -f i1 i2"]), 1);
    }

    #[tokio::test]
    async fn test_purge_reports_failure() {
        let runner = Arc::new(MockProcessRunner::new());
        runner.on(&["docker rmi"], MockOutcome::fail(1, "image is in use"));
        let tracker = ResourceTracker::new();
        tracker.track_image("appgen-build:1");
        assert!(!cleaner(runner).purge(CleanupScope::Owned, &tracker).await);
        assert_eq!(tracker.images(), vec!["appgen-build:1"]);
    }

    #[tokio::test]
    async fn test_labelled_purge_filters_by_request_label() {
        let runner = Arc::new(MockProcessRunner::new());
        runner.on(&["docker ps", "label=appgen.request"], MockOutcome::ok("abc\n"));
        assert!(cleaner(runner.clone()).purge_labelled().await);
        assert_eq!(runner.count_matching(&["docker rm -f abc"]), 1);
        assert_eq!(
            runner.count_matching(&["docker images -q --filter label=appgen.request"]),
            1
        );
    }

    #[tokio::test]
    async fn test_teardown_removes_owned_resources_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = BuildWorkspace::new(GenerationRequest::new("x"), dir.path());
        std::fs::create_dir_all(ws.directory().join("android")).unwrap();
        ws.record_container("appgen-build-1");
        ws.record_image("appgen-build:1");

        let runner = Arc::new(MockProcessRunner::new());
        runner.on(
            &["docker rm -f appgen-build-1"],
            MockOutcome::fail(1, "Error: No such container: appgen-build-1"),
        );
        let tracker = ResourceTracker::new();
        tracker.track_container("appgen-build-1");
        tracker.track_image("appgen-build:1");
        tracker.track_image("appgen-build:other");

        assert!(cleaner(runner).teardown(&ws, &tracker, false).await);
        assert!(!ws.directory().exists());
        assert_eq!(tracker.images(), vec!["appgen-build:other"]);
    }

    #[tokio::test]
    async fn test_teardown_fails_when_a_real_error_hides_behind_a_gone_container() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = BuildWorkspace::new(GenerationRequest::new("x"), dir.path());
        ws.record_container("appgen-build-1");
        ws.record_container("appgen-run-1");

        let runner = Arc::new(MockProcessRunner::new());
        runner.on(
            &["docker rm -f appgen-build-1 appgen-run-1"],
            MockOutcome::fail(
                1,
                "Error response from daemon: No such container: appgen-build-1\n\
                 Error response from daemon: cannot remove container \"/appgen-run-1\": \
                 device or resource busy\n",
            ),
        );
        let tracker = ResourceTracker::new();
        tracker.track_container("appgen-build-1");
        tracker.track_container("appgen-run-1");

        assert!(!cleaner(runner).teardown(&ws, &tracker, false).await);
        assert_eq!(tracker.containers(), vec!["appgen-build-1", "appgen-run-1"]);
    }

    #[tokio::test]
    async fn test_every_name_already_gone_counts_as_removed() {
        let runner = Arc::new(MockProcessRunner::new());
        runner.on(
            &["docker rmi -f"],
            MockOutcome::fail(
                1,
                "Error: No such image: appgen-build:1\nError: No such image: appgen-run:1\n",
            ),
        );
        let tags = vec!["appgen-build:1".to_string(), "appgen-run:1".to_string()];
        assert!(cleaner(runner).remove_images(&tags).await);
    }

    #[tokio::test]
    async fn test_failure_without_stderr_is_not_treated_as_gone() {
        let runner = Arc::new(MockProcessRunner::new());
        runner.on(&["docker rm"], MockOutcome::fail(1, ""));
        assert!(!cleaner(runner).remove_containers(&["appgen-run-1".to_string()]).await);
    }

    #[tokio::test]
    async fn test_teardown_can_retain_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ws = BuildWorkspace::new(GenerationRequest::new("x"), dir.path());
        std::fs::create_dir_all(ws.directory()).unwrap();
        let runner = Arc::new(MockProcessRunner::new());
        assert!(
            cleaner(runner.clone())
                .teardown(&ws, &ResourceTracker::new(), true)
                .await
        );
        assert!(ws.directory().exists());
        assert!(runner.commands().is_empty());
    }
}
