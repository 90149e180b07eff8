//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `serve`    | `Serve`          |
//! | `check`    | `Check`          |
//! | `generate` | `Generate`       |
//! | `cleanup`  | `Cleanup`        |
//! | `config`   | `Config`         |
//!
//! Commands return whether they succeeded; `main` turns that into the exit
//! code.

pub mod check;
pub mod cleanup;
pub mod config;
pub mod generate;
pub mod serve;

use std::sync::Arc;

use anyhow::{Context, Result};

use appgen::config::Config;
use appgen::generation::AnthropicBackend;
use appgen::pipeline::Orchestrator;
use appgen::pipeline::status::StatusPublisher;
use appgen::process::TokioProcessRunner;

pub use check::cmd_check;
pub use cleanup::cmd_cleanup;
pub use config::cmd_config;
pub use generate::cmd_generate;
pub use serve::cmd_serve;

/// Wire the real generation backend and process runner into an orchestrator.
pub(crate) fn build_orchestrator(config: Config, events: StatusPublisher) -> Result<Orchestrator> {
    let api_key = config.api_key().unwrap_or_default();
    let backend = AnthropicBackend::from_settings(&config.generation, api_key).with_context(|| {
        format!(
            "Set {} (environment or .env) to reach the generation service",
            config.generation.api_key_env
        )
    })?;
    Ok(Orchestrator::new(
        config,
        Arc::new(backend),
        Arc::new(TokioProcessRunner),
        events,
    ))
}
