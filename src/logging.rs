//! Structured logging setup.
//!
//! Initialises a `tracing` subscriber once per process. Level resolution:
//! explicit level → `--verbose` → `APPGEN_LOG_LEVEL` → `info`. `RUST_LOG`,
//! when set, replaces the crate-level directive entirely.

use std::env;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub use_json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
        }
    }
}

impl LoggingConfig {
    /// Resolve the logging configuration from CLI flags and the environment.
    pub fn resolve(level: Option<&str>, verbose: bool, use_json: bool) -> Self {
        let level = match level {
            Some(level) => parse_level(level),
            None if verbose => Level::DEBUG,
            None => env::var("APPGEN_LOG_LEVEL")
                .map(|l| parse_level(&l))
                .unwrap_or(Level::INFO),
        };
        let use_json = use_json
            || env::var("APPGEN_LOG_JSON")
                .ok()
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(false);
        Self { level, use_json }
    }
}

/// Parse a log level, falling back to INFO for unknown values.
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn build_filter(level: Level) -> EnvFilter {
    if env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    let directives = [
        format!("appgen={}", level),
        "hyper=warn".to_string(),
        "reqwest=warn".to_string(),
        "tower_http=warn".to_string(),
    ];
    directives
        .iter()
        .filter_map(|d| d.parse::<Directive>().ok())
        .fold(EnvFilter::new("warn"), |filter, directive| {
            filter.add_directive(directive)
        })
}

/// Install the global subscriber. Subsequent calls are no-ops.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);
        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .init();
        }
    });
}
