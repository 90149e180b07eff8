//! Explicit container purge (`appgen cleanup`).

use std::sync::Arc;

use anyhow::Result;

use appgen::config::Config;
use appgen::isolation::{CleanupScope, ResourceCleaner, ResourceTracker};
use appgen::process::TokioProcessRunner;

pub async fn cmd_cleanup(config: &Config, all: bool) -> Result<bool> {
    let cleaner = ResourceCleaner::new(Arc::new(TokioProcessRunner), config.timeouts.cleanup());

    // A fresh process tracks nothing, so owned resources are found by label.
    let ok = if all {
        println!("Removing every container and image on this host...");
        cleaner
            .purge(CleanupScope::All, &ResourceTracker::new())
            .await
    } else {
        println!("Removing appgen-labelled containers and images...");
        cleaner.purge_labelled().await
    };

    if ok {
        println!("Cleanup complete.");
    } else {
        eprintln!("Cleanup incomplete; see log output for details.");
    }
    Ok(ok)
}
