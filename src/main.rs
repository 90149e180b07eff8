use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use appgen::config::{Config, DEFAULT_CONFIG_FILE};
use appgen::logging::{LoggingConfig, init_logging};

mod cmd;

#[derive(Parser)]
#[command(name = "appgen")]
#[command(version, about = "Generate, build and run mobile apps from a prompt in isolated containers")]
pub struct Cli {
    /// Path to the configuration file (defaults to ./appgen.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory holding per-request workspaces (overrides config)
        #[arg(long)]
        apps_root: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a local UI)
        #[arg(long)]
        dev: bool,
    },
    /// Check host toolchain versions
    Check,
    /// Run one pipeline from the command line and print the result
    Generate {
        /// Description of the app to build
        #[arg(short, long)]
        prompt: String,
    },
    /// Remove containers and images left by appgen
    Cleanup {
        /// Remove every container and image on the host
        #[arg(long)]
        all: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

/// The file `Config::load_or_default` will read, if any.
fn config_source(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let local = PathBuf::from(DEFAULT_CONFIG_FILE);
            local.exists().then_some(local)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    init_logging(LoggingConfig::resolve(
        cli.log_level.as_deref(),
        cli.verbose,
        cli.log_json,
    ));

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    config.apply_env()?;

    let ok = match cli.command {
        Commands::Serve {
            host,
            port,
            apps_root,
            dev,
        } => cmd::cmd_serve(config, host, port, apps_root, dev).await?,
        Commands::Check => cmd::cmd_check(&config).await?,
        Commands::Generate { prompt } => cmd::cmd_generate(config, &prompt).await?,
        Commands::Cleanup { all } => cmd::cmd_cleanup(&config, all).await?,
        Commands::Config { command } => {
            let source = config_source(cli.config.as_deref());
            cmd::cmd_config(&config, source.as_deref(), command)?;
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
