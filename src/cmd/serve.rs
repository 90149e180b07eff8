//! HTTP service command (`appgen serve`).

use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::warn;

use appgen::config::Config;
use appgen::pipeline::status::StatusPublisher;
use appgen::server::{ServerConfig, start_server};

/// Status events buffered per `/ws` subscriber before it starts lagging.
const STATUS_CHANNEL_CAPACITY: usize = 256;

pub async fn cmd_serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
    apps_root: Option<PathBuf>,
    dev: bool,
) -> Result<bool> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(apps_root) = apps_root {
        config.workspace.apps_root = apps_root;
    }
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let mut server = ServerConfig::from(&config.server);
    server.dev_mode = dev;

    let (tx, _rx) = broadcast::channel::<String>(STATUS_CHANNEL_CAPACITY);
    let orchestrator = super::build_orchestrator(config, StatusPublisher::new(tx))?;

    let purged = start_server(server, orchestrator).await?;
    if purged {
        println!("Server shut down; container resources removed.");
    } else {
        eprintln!("Server shut down; some container resources could not be removed.");
    }
    Ok(purged)
}
