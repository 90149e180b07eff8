//! Host toolchain pre-flight check.
//!
//! Every configured [`DependencyRequirement`] is probed before any pipeline
//! work starts. The gate always evaluates the full list so a failure names
//! every missing and outdated tool at once.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{DependencyError, OutdatedDependency};
use crate::process::{ProcessRunner, ProcessSpec};

static VERSION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v?\d+(?:\.\d+)*(?:[_\-][0-9A-Za-z]+)?").unwrap());

/// A tool the host must provide, and how to ask it for its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRequirement {
    pub name: String,
    /// argv of the probe, e.g. `["node", "--version"]`.
    #[serde(rename = "command")]
    pub version_probe_command: Vec<String>,
    #[serde(rename = "min_version")]
    pub minimum_version: String,
}

impl DependencyRequirement {
    pub fn new(name: &str, command: &[&str], minimum_version: &str) -> Self {
        Self {
            name: name.to_string(),
            version_probe_command: command.iter().map(|s| s.to_string()).collect(),
            minimum_version: minimum_version.to_string(),
        }
    }
}

/// The toolchains an Android build host needs.
pub fn default_requirements() -> Vec<DependencyRequirement> {
    vec![
        DependencyRequirement::new("Node.js", &["node", "--version"], "v14.0.0"),
        DependencyRequirement::new("npm", &["npm", "--version"], "6.0.0"),
        DependencyRequirement::new("React Native CLI", &["react-native", "--version"], "0.63.0"),
        DependencyRequirement::new("Android SDK", &["sdkmanager", "--version"], "26.0.0"),
        DependencyRequirement::new("Java Development Kit", &["java", "-version"], "1.8.0"),
        DependencyRequirement::new("Docker", &["docker", "--version"], "20.0.0"),
    ]
}

/// Numeric components of a version string. Non-digits are stripped from
/// each dot-separated component; an empty component counts as 0.
fn version_components(version: &str) -> Vec<u64> {
    version
        .trim()
        .split('.')
        .map(|part| {
            let digits: String = part.chars().filter(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}

/// True when `current` is at least `minimum`.
///
/// Components are compared left to right; absent trailing components are 0.
pub fn check_version(current: &str, minimum: &str) -> bool {
    let current = version_components(current);
    let minimum = version_components(minimum);
    let len = current.len().max(minimum.len());

    for i in 0..len {
        let c = current.get(i).copied().unwrap_or(0);
        let m = minimum.get(i).copied().unwrap_or(0);
        if c != m {
            return c > m;
        }
    }
    true
}

/// Pull the first version-looking token out of probe output such as
/// `Docker version 20.10.7, build f0df350` or `java version "1.8.0_202"`.
pub fn extract_version(output: &str) -> Option<&str> {
    VERSION_TOKEN.find(output).map(|m| m.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyStatus {
    Ok { version: String },
    Missing { reason: String },
    Outdated { current: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCheck {
    pub name: String,
    pub required: String,
    pub status: DependencyStatus,
}

/// Per-dependency results of one gate run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
    pub checks: Vec<DependencyCheck>,
}

impl DependencyReport {
    pub fn passed(&self) -> bool {
        self.checks
            .iter()
            .all(|c| matches!(c.status, DependencyStatus::Ok { .. }))
    }

    /// The aggregated failure, or `None` when every dependency passed.
    pub fn to_error(&self) -> Option<DependencyError> {
        let mut err = DependencyError::default();
        for check in &self.checks {
            match &check.status {
                DependencyStatus::Ok { .. } => {}
                DependencyStatus::Missing { .. } => err.missing.push(check.name.clone()),
                DependencyStatus::Outdated { current } => err.outdated.push(OutdatedDependency {
                    name: check.name.clone(),
                    current: current.clone(),
                    required: check.required.clone(),
                }),
            }
        }
        (!err.is_empty()).then_some(err)
    }
}

/// Probes host toolchains through a [`ProcessRunner`].
pub struct VersionGate {
    runner: Arc<dyn ProcessRunner>,
    requirements: Vec<DependencyRequirement>,
    probe_timeout: Duration,
}

impl VersionGate {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        requirements: Vec<DependencyRequirement>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            requirements,
            probe_timeout,
        }
    }

    /// Probe every requirement and report each outcome.
    pub async fn report(&self) -> DependencyReport {
        let mut report = DependencyReport::default();
        for requirement in &self.requirements {
            let status = self.probe(requirement).await;
            match &status {
                DependencyStatus::Ok { version } => {
                    debug!(dependency = %requirement.name, %version, "dependency ok")
                }
                DependencyStatus::Missing { reason } => {
                    warn!(dependency = %requirement.name, %reason, "dependency missing")
                }
                DependencyStatus::Outdated { current } => warn!(
                    dependency = %requirement.name,
                    %current,
                    required = %requirement.minimum_version,
                    "dependency outdated"
                ),
            }
            report.checks.push(DependencyCheck {
                name: requirement.name.clone(),
                required: requirement.minimum_version.clone(),
                status,
            });
        }
        report
    }

    /// Fail with every missing and outdated dependency, or succeed with no
    /// side effects.
    pub async fn check_dependencies(&self) -> Result<(), DependencyError> {
        let report = self.report().await;
        match report.to_error() {
            Some(err) => Err(err),
            None => {
                info!(count = report.checks.len(), "all dependencies satisfied");
                Ok(())
            }
        }
    }

    async fn probe(&self, requirement: &DependencyRequirement) -> DependencyStatus {
        let Some((program, args)) = requirement.version_probe_command.split_first() else {
            return DependencyStatus::Missing {
                reason: "empty probe command".to_string(),
            };
        };
        let spec = ProcessSpec::new(program.clone(), args.iter().cloned())
            .timeout(self.probe_timeout)
            .label(format!("probe {}", requirement.name));

        let output = match self.runner.run(spec).await {
            Ok(output) => output,
            Err(e) => {
                return DependencyStatus::Missing {
                    reason: e.to_string(),
                };
            }
        };
        if !output.success() {
            return DependencyStatus::Missing {
                reason: format!("probe exited with {:?}", output.exit_code),
            };
        }

        let current = extract_version(&output.stdout)
            .or_else(|| extract_version(&output.stderr))
            .map(str::to_string)
            .unwrap_or_else(|| output.stdout.trim().to_string());

        if check_version(&current, &requirement.minimum_version) {
            DependencyStatus::Ok { version: current }
        } else {
            DependencyStatus::Outdated { current }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::mock::{MockOutcome, MockProcessRunner};

    #[test]
    fn test_check_version_examples() {
        assert!(check_version("v14.2.0", "14.0.0"));
        assert!(!check_version("13.9.9", "14.0.0"));
        assert!(check_version("v1.8.0_202", "1.8.0"));
    }

    #[test]
    fn test_check_version_equal_and_trailing_components() {
        assert!(check_version("6.0.0", "6.0.0"));
        assert!(check_version("6", "6.0.0"));
        assert!(!check_version("6", "6.0.1"));
        assert!(check_version("20.10", "20.0.0"));
    }

    #[test]
    fn test_check_version_short_circuits_on_first_difference() {
        assert!(check_version("2.0.0", "1.99.99"));
        assert!(!check_version("0.62.9", "0.63.0"));
    }

    #[test]
    fn test_extract_version_from_tool_output() {
        assert_eq!(
            extract_version("Docker version 20.10.7, build f0df350"),
            Some("20.10.7")
        );
        assert_eq!(
            extract_version("java version \"1.8.0_202\"\nJava(TM) SE Runtime"),
            Some("1.8.0_202")
        );
        assert_eq!(extract_version("v16.13.0\n"), Some("v16.13.0"));
        assert_eq!(extract_version("no digits here"), None);
    }

    #[test]
    fn test_default_requirements_cover_host_toolchain() {
        let names: Vec<String> = default_requirements().into_iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "Node.js",
                "npm",
                "React Native CLI",
                "Android SDK",
                "Java Development Kit",
                "Docker"
            ]
        );
    }

    fn gate(runner: MockProcessRunner, reqs: Vec<DependencyRequirement>) -> VersionGate {
        VersionGate::new(Arc::new(runner), reqs, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_gate_aggregates_missing_and_outdated() {
        let runner = MockProcessRunner::new();
        runner
            .on(&["node --version"], MockOutcome::ok("v12.22.1\n"))
            .on(&["npm --version"], MockOutcome::ok("8.1.0\n"))
            .on(&["react-native"], MockOutcome::SpawnFailure)
            .on(&["sdkmanager"], MockOutcome::fail(127, "command not found"))
            .on(&["java -version"], MockOutcome::ok_stderr("java version \"1.8.0_202\""))
            .on(&["docker --version"], MockOutcome::ok("Docker version 24.0.5, build ced0996"));

        let err = gate(runner, default_requirements())
            .check_dependencies()
            .await
            .unwrap_err();

        assert_eq!(err.missing, vec!["React Native CLI", "Android SDK"]);
        assert_eq!(err.outdated.len(), 1);
        assert_eq!(err.outdated[0].name, "Node.js");
        assert_eq!(err.outdated[0].current, "v12.22.1");
        assert_eq!(err.outdated[0].required, "v14.0.0");
        assert_eq!(err.len(), 3);
    }

    #[tokio::test]
    async fn test_gate_probes_every_requirement_even_after_failures() {
        let runner = Arc::new(MockProcessRunner::new().with_default(MockOutcome::SpawnFailure));
        let gate = VersionGate::new(runner.clone(), default_requirements(), Duration::from_secs(5));
        let err = gate.check_dependencies().await.unwrap_err();
        assert_eq!(err.missing.len(), 6);
        assert_eq!(runner.calls().len(), 6);
        assert!(runner.calls().iter().all(|c| c.timeout == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_gate_passes_when_all_satisfied() {
        let runner = MockProcessRunner::new().with_default(MockOutcome::ok("99.0.0"));
        let gate = gate(runner, default_requirements());
        assert!(gate.check_dependencies().await.is_ok());
        let report = gate.report().await;
        assert!(report.passed());
        assert!(report.to_error().is_none());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_missing() {
        let runner = MockProcessRunner::new().with_default(MockOutcome::Timeout);
        let reqs = vec![DependencyRequirement::new("Docker", &["docker", "--version"], "20.0.0")];
        let err = gate(runner, reqs).check_dependencies().await.unwrap_err();
        assert_eq!(err.missing, vec!["Docker"]);
    }

    #[tokio::test]
    async fn test_empty_probe_command_is_missing() {
        let reqs = vec![DependencyRequirement::new("Ghost", &[], "1.0.0")];
        let report = gate(MockProcessRunner::new(), reqs).report().await;
        assert!(matches!(
            report.checks[0].status,
            DependencyStatus::Missing { .. }
        ));
    }
}
