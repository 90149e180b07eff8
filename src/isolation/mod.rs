//! Container environments for building and running generated apps.
//!
//! Each request gets two environments: a build image that compiles the
//! project with the workspace bind-mounted, and a run image that boots an
//! emulator and exercises the installed APK. Every image tag and container
//! name is derived from the request id and labelled with it, so concurrent
//! requests never share a tag and cleanup can find what it owns.

pub mod build;
pub mod resources;
pub mod run;

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ImageSettings;
use crate::workspace::RequestId;
pub use build::BuildStage;
pub use resources::{CleanupScope, ResourceCleaner, ResourceTracker};
pub use run::ExecutionStage;

/// Label key carried by every image and container appgen creates.
pub const REQUEST_LABEL: &str = "appgen.request";

pub const BUILD_DESCRIPTOR: &str = "Dockerfile";
pub const RUN_DESCRIPTOR: &str = "Dockerfile.run";

/// File name of the APK inside the run image's working directory.
const RUN_ARTIFACT_NAME: &str = "app-release.apk";

pub fn build_image_tag(id: &RequestId) -> String {
    format!("appgen-build:{}", id)
}

pub fn run_image_tag(id: &RequestId) -> String {
    format!("appgen-run:{}", id)
}

pub fn build_container_name(id: &RequestId) -> String {
    format!("appgen-build-{}", id)
}

pub fn run_container_name(id: &RequestId) -> String {
    format!("appgen-run-{}", id)
}

/// `key=value` form used with `--label`.
pub fn request_label(id: &RequestId) -> String {
    format!("{}={}", REQUEST_LABEL, id)
}

/// One container image, described independently of any Dockerfile syntax.
///
/// Rendering order: base, packages, environment, setup steps, user, working
/// directory, copies, build steps, entry command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolatedEnvironmentSpec {
    pub base_image: String,
    pub installed_packages: BTreeSet<String>,
    pub environment_variables: BTreeMap<String, String>,
    /// Shell commands run as root before switching user.
    pub setup_steps: Vec<String>,
    /// Non-privileged user created and switched to, if any.
    pub user: Option<String>,
    pub working_directory: String,
    /// `(source, destination)` pairs relative to the build context.
    pub copy_steps: Vec<(String, String)>,
    /// Shell commands run after the copies.
    pub build_steps: Vec<String>,
    /// Exec-form startup command.
    pub entry_command: Vec<String>,
}

impl IsolatedEnvironmentSpec {
    pub fn new(base_image: impl Into<String>) -> Self {
        Self {
            base_image: base_image.into(),
            installed_packages: BTreeSet::new(),
            environment_variables: BTreeMap::new(),
            setup_steps: Vec::new(),
            user: None,
            working_directory: "/app".to_string(),
            copy_steps: Vec::new(),
            build_steps: Vec::new(),
            entry_command: Vec::new(),
        }
    }

    pub fn render_dockerfile(&self) -> String {
        let mut lines = vec![format!("FROM {}", self.base_image)];

        if !self.installed_packages.is_empty() {
            let packages: Vec<&str> = self.installed_packages.iter().map(String::as_str).collect();
            lines.push(format!(
                "RUN apt-get update && apt-get install -y {} && rm -rf /var/lib/apt/lists/*",
                packages.join(" ")
            ));
        }
        for (key, value) in &self.environment_variables {
            lines.push(format!("ENV {}={}", key, value));
        }
        for step in &self.setup_steps {
            lines.push(format!("RUN {}", step));
        }
        if let Some(user) = &self.user {
            lines.push(format!("RUN useradd -m {}", user));
            lines.push(format!("USER {}", user));
        }
        lines.push(format!("WORKDIR {}", self.working_directory));
        for (source, destination) in &self.copy_steps {
            lines.push(format!("COPY {} {}", source, destination));
        }
        for step in &self.build_steps {
            lines.push(format!("RUN {}", step));
        }
        if !self.entry_command.is_empty() {
            // JSON array is Dockerfile exec form.
            let exec = serde_json::to_string(&self.entry_command).unwrap_or_default();
            lines.push(format!("CMD {}", exec));
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// Compile environment: React Native Android toolchain with the project
/// copied in and its npm dependencies installed.
pub fn build_environment(images: &ImageSettings) -> IsolatedEnvironmentSpec {
    let mut spec = IsolatedEnvironmentSpec::new(&images.build_base);
    spec.installed_packages = ["nodejs", "npm", "openjdk-11-jdk"]
        .into_iter()
        .map(String::from)
        .collect();
    spec.environment_variables
        .insert("ANDROID_HOME".into(), "/opt/android-sdk".into());
    spec.environment_variables.insert(
        "PATH".into(),
        "$PATH:$ANDROID_HOME/tools:$ANDROID_HOME/platform-tools".into(),
    );
    spec.copy_steps.push((".".into(), ".".into()));
    spec.build_steps.push("npm install".into());
    spec.build_steps.push("chmod +x android/gradlew".into());
    spec
}

/// Runtime environment: emulator and device bridge, an unprivileged user,
/// and the release APK copied from `artifact` (relative to the build
/// context). The startup command boots a headless emulator, installs the
/// APK, and pokes the app with a monkey event.
pub fn run_environment(
    images: &ImageSettings,
    artifact: &str,
    app_identifier: &str,
) -> IsolatedEnvironmentSpec {
    let mut spec = IsolatedEnvironmentSpec::new(&images.run_base);
    spec.installed_packages = [
        "android-tools-adb",
        "qemu-kvm",
        "libvirt-daemon-system",
        "libvirt-clients",
        "bridge-utils",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    spec.environment_variables
        .insert("ANDROID_HOME".into(), "/opt/android-sdk".into());
    spec.setup_steps
        .push("mkdir -p $ANDROID_HOME/emulator".into());
    spec.user = Some("appuser".into());
    spec.copy_steps
        .push((artifact.into(), RUN_ARTIFACT_NAME.into()));
    spec.entry_command = vec![
        "bash".into(),
        "-c".into(),
        format!(
            "emulator @test -no-window -no-audio & adb wait-for-device && adb install {} && adb shell monkey -p {} 1",
            RUN_ARTIFACT_NAME, app_identifier
        ),
    ];
    spec
}
