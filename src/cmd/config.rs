//! Configuration view and validation commands (`appgen config`).

use std::path::Path;

use anyhow::Result;

use super::super::ConfigCommands;
use appgen::config::Config;

pub fn cmd_config(config: &Config, source: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("appgen configuration");
            println!("====================");
            println!();
            match source {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("No config file found; using defaults."),
            }
            println!("Effective values (with env overrides):");
            println!();
            println!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }
    Ok(())
}
