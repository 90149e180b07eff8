//! Configuration for appgen.
//!
//! Settings are layered: built-in defaults → `appgen.toml` → environment
//! (`APPGEN_HOST`, `APPGEN_PORT`, `APPGEN_APPS_ROOT`) → CLI flags. Every
//! field has a default, so an empty file is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//!
//! [workspace]
//! apps_root = "generated-apps"
//! retain_workspaces = false
//!
//! [generation]
//! model = "claude-3-opus-20240229"
//! api_key_env = "ANTHROPIC_API_KEY"
//! retries = 0
//!
//! [pipeline]
//! max_fix_attempts = 2
//! cleanup = "owned"
//!
//! [timeouts]
//! image_build_secs = 1800
//!
//! [[dependencies]]
//! name = "Docker"
//! command = ["docker", "--version"]
//! min_version = "20.0.0"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gate::DependencyRequirement;
use crate::isolation::CleanupScope;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "appgen.toml";

/// Upper bound on fix-and-retry cycles, whatever the file says.
pub const MAX_FIX_ATTEMPTS_CAP: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    /// Parent directory of every per-request workspace.
    #[serde(default = "default_apps_root")]
    pub apps_root: PathBuf,
    /// Keep workspace directories after teardown (for diagnosis).
    #[serde(default)]
    pub retain_workspaces: bool,
}

fn default_apps_root() -> PathBuf {
    PathBuf::from("generated-apps")
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            apps_root: default_apps_root(),
            retain_workspaces: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_security_max_tokens")]
    pub security_max_tokens: u32,
    /// Name of the environment variable holding the credential.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Extra attempts for retryable generation failures (rate limit, service).
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_model() -> String {
    "claude-3-opus-20240229".to_string()
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_temperature() -> f32 {
    0.2
}

fn default_security_max_tokens() -> u32 {
    1000
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            security_max_tokens: default_security_max_tokens(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
            retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Fix-and-retry cycles after a compilation failure (capped at 3).
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,
    /// Which containers/images the shutdown purge removes.
    #[serde(default)]
    pub cleanup: CleanupScope,
}

fn default_max_fix_attempts() -> u32 {
    2
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_fix_attempts: default_max_fix_attempts(),
            cleanup: CleanupScope::default(),
        }
    }
}

/// Wall-clock budget per external step, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    #[serde(default = "default_image_build_secs")]
    pub image_build_secs: u64,
    #[serde(default = "default_compile_secs")]
    pub compile_secs: u64,
    #[serde(default = "default_run_secs")]
    pub run_secs: u64,
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_secs: u64,
}

fn default_probe_secs() -> u64 {
    30
}

fn default_image_build_secs() -> u64 {
    1800
}

fn default_compile_secs() -> u64 {
    1800
}

fn default_run_secs() -> u64 {
    900
}

fn default_cleanup_secs() -> u64 {
    120
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            probe_secs: default_probe_secs(),
            image_build_secs: default_image_build_secs(),
            compile_secs: default_compile_secs(),
            run_secs: default_run_secs(),
            cleanup_secs: default_cleanup_secs(),
        }
    }
}

impl TimeoutSettings {
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn image_build(&self) -> Duration {
        Duration::from_secs(self.image_build_secs)
    }

    pub fn compile(&self) -> Duration {
        Duration::from_secs(self.compile_secs)
    }

    pub fn run(&self) -> Duration {
        Duration::from_secs(self.run_secs)
    }

    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSettings {
    #[serde(default = "default_build_base")]
    pub build_base: String,
    #[serde(default = "default_run_base")]
    pub run_base: String,
}

fn default_build_base() -> String {
    "reactnative/android:latest".to_string()
}

fn default_run_base() -> String {
    "ubuntu:latest".to_string()
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            build_base: default_build_base(),
            run_base: default_run_base(),
        }
    }
}

/// Complete appgen configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub workspace: WorkspaceSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub images: ImageSettings,
    #[serde(default = "crate::gate::default_requirements")]
    pub dependencies: Vec<DependencyRequirement>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            workspace: WorkspaceSettings::default(),
            generation: GenerationSettings::default(),
            pipeline: PipelineSettings::default(),
            timeouts: TimeoutSettings::default(),
            images: ImageSettings::default(),
            dependencies: crate::gate::default_requirements(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid appgen configuration")
    }

    /// Load an explicit config file, or `appgen.toml` from the working
    /// directory when present, or defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::load(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply `APPGEN_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("APPGEN_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("APPGEN_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("APPGEN_PORT is not a valid port: '{}'", port))?;
        }
        if let Some(root) = lookup("APPGEN_APPS_ROOT") {
            self.workspace.apps_root = PathBuf::from(root);
        }
        Ok(())
    }

    /// Fix-and-retry cycles actually allowed.
    pub fn effective_max_fix_attempts(&self) -> u32 {
        self.pipeline.max_fix_attempts.min(MAX_FIX_ATTEMPTS_CAP)
    }

    /// Read the generation-service credential from the configured variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.generation.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Human-readable warnings about suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.pipeline.max_fix_attempts > MAX_FIX_ATTEMPTS_CAP {
            warnings.push(format!(
                "pipeline.max_fix_attempts = {} exceeds the cap; {} will be used",
                self.pipeline.max_fix_attempts, MAX_FIX_ATTEMPTS_CAP
            ));
        }
        if !(0.0..=1.0).contains(&self.generation.temperature) {
            warnings.push(format!(
                "generation.temperature = {} is outside 0.0-1.0",
                self.generation.temperature
            ));
        }
        if self.dependencies.is_empty() {
            warnings.push("No [[dependencies]] configured; the version gate always passes".into());
        }
        for dep in &self.dependencies {
            if dep.version_probe_command.is_empty() {
                warnings.push(format!("Dependency '{}' has an empty probe command", dep.name));
            }
        }
        let timeouts = [
            ("probe_secs", self.timeouts.probe_secs),
            ("image_build_secs", self.timeouts.image_build_secs),
            ("compile_secs", self.timeouts.compile_secs),
            ("run_secs", self.timeouts.run_secs),
            ("cleanup_secs", self.timeouts.cleanup_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                warnings.push(format!("timeouts.{} is 0; every such step will time out", name));
            }
        }
        if self.pipeline.cleanup == CleanupScope::All {
            warnings.push(
                "pipeline.cleanup = \"all\" removes every container and image on the host at shutdown"
                    .into(),
            );
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.workspace.apps_root, PathBuf::from("generated-apps"));
        assert_eq!(config.generation.max_tokens, 4000);
        assert_eq!(config.pipeline.max_fix_attempts, 2);
        assert_eq!(config.pipeline.cleanup, CleanupScope::Owned);
        assert_eq!(config.dependencies.len(), 6);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_sections() {
        let config = Config::parse(
            r#"
[server]
port = 8080

[pipeline]
cleanup = "all"

[[dependencies]]
name = "Docker"
command = ["docker", "--version"]
min_version = "20.0.0"
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.pipeline.cleanup, CleanupScope::All);
        assert_eq!(config.dependencies.len(), 1);
        assert_eq!(config.dependencies[0].minimum_version, "20.0.0");
        assert_eq!(
            config.dependencies[0].version_probe_command,
            vec!["docker".to_string(), "--version".to_string()]
        );
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(Config::parse("not valid toml {{{{").is_err());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(&dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appgen.toml");
        std::fs::write(&path, "[workspace]\nretain_workspaces = true\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert!(config.workspace.retain_workspaces);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("APPGEN_HOST", "0.0.0.0"),
            ("APPGEN_PORT", "4000"),
            ("APPGEN_APPS_ROOT", "/srv/apps"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.workspace.apps_root, PathBuf::from("/srv/apps"));
    }

    #[test]
    fn test_env_override_invalid_port() {
        let mut config = Config::default();
        let result = config.apply_env_from(|k| (k == "APPGEN_PORT").then(|| "http".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_fix_attempts_capped() {
        let mut config = Config::default();
        config.pipeline.max_fix_attempts = 10;
        assert_eq!(config.effective_max_fix_attempts(), MAX_FIX_ATTEMPTS_CAP);
        assert!(config.validate().iter().any(|w| w.contains("max_fix_attempts")));
    }

    #[test]
    fn test_validate_flags_zero_timeouts_and_broad_cleanup() {
        let mut config = Config::default();
        config.timeouts.compile_secs = 0;
        config.pipeline.cleanup = CleanupScope::All;
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("compile_secs")));
        assert!(warnings.iter().any(|w| w.contains("every container")));
    }

    #[test]
    fn test_to_toml_round_trips_key_fields() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[server]"));
        let reparsed = Config::parse(&rendered).unwrap();
        assert_eq!(reparsed.server.port, config.server.port);
        assert_eq!(reparsed.dependencies.len(), config.dependencies.len());
    }
}
