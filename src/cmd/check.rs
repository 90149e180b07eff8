//! Host toolchain check (`appgen check`).

use std::sync::Arc;

use anyhow::Result;

use appgen::config::Config;
use appgen::gate::{DependencyStatus, VersionGate};
use appgen::process::TokioProcessRunner;

pub async fn cmd_check(config: &Config) -> Result<bool> {
    let gate = VersionGate::new(
        Arc::new(TokioProcessRunner),
        config.dependencies.clone(),
        config.timeouts.probe(),
    );
    let report = gate.report().await;

    println!();
    println!("Host dependencies");
    println!("=================");
    println!();
    for check in &report.checks {
        match &check.status {
            DependencyStatus::Ok { version } => {
                println!("  [ok]       {} {} (>= {})", check.name, version, check.required)
            }
            DependencyStatus::Missing { reason } => {
                println!("  [missing]  {} ({})", check.name, reason)
            }
            DependencyStatus::Outdated { current } => println!(
                "  [outdated] {} {} (>= {} required)",
                check.name, current, check.required
            ),
        }
    }
    println!();

    match report.to_error() {
        None => {
            println!("All dependencies satisfied.");
            Ok(true)
        }
        Some(err) => {
            println!("{}", err);
            Ok(false)
        }
    }
}
