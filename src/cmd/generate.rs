//! One-shot pipeline run (`appgen generate`).

use anyhow::{Context, Result};

use appgen::config::Config;
use appgen::pipeline::status::StatusPublisher;

pub async fn cmd_generate(config: Config, prompt: &str) -> Result<bool> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        anyhow::bail!("Prompt must not be empty");
    }

    let orchestrator = super::build_orchestrator(config, StatusPublisher::detached())?;
    let report = orchestrator.run(prompt).await;
    // Per-attempt teardown already ran; this catches anything it left.
    let purged = orchestrator.purge().await;

    let envelope = serde_json::to_string_pretty(&report.envelope())
        .context("Failed to serialize pipeline result")?;
    println!("{}", envelope);
    if !purged {
        eprintln!("Warning: some container resources could not be removed.");
    }
    Ok(report.is_success())
}
