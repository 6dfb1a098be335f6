//! Logging setup for the `hintlens` binary.
//!
//! Logs go to stderr so stdout stays clean for JSON output.
//!
//! # Environment Variables
//!
//! - `HINTLENS_LOG`: filter directive (e.g. "debug", "hintlens=debug"),
//!   falling back to `RUST_LOG`, then to [`LogConfig::default_level`]
//! - `HINTLENS_LOG_FORMAT`: "json" for JSON lines, "text" for compact text;
//!   other values leave [`LogConfig::json_format`] in charge

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter when no environment override is set (default: "warn")
    pub default_level: String,
    /// Emit JSON lines instead of compact text (default: false)
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "warn".to_string(),
            json_format: false,
        }
    }
}

impl LogConfig {
    /// `verbose` raises the default level: 1 = info, 2 = debug, 3+ = trace.
    pub fn with_verbosity(verbose: u8) -> Self {
        let default_level = match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        Self {
            default_level: default_level.to_string(),
            ..Self::default()
        }
    }
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_env("HINTLENS_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level))
}

fn use_json(config: &LogConfig) -> bool {
    json_from_format(std::env::var("HINTLENS_LOG_FORMAT").ok().as_deref())
        .unwrap_or(config.json_format)
}

/// `None` for unset or unrecognized formats.
fn json_from_format(raw: Option<&str>) -> Option<bool> {
    match raw?.trim().to_ascii_lowercase().as_str() {
        "json" => Some(true),
        "text" | "compact" | "pretty" => Some(false),
        _ => None,
    }
}

/// Installs the global subscriber. Calling it twice is harmless; the second
/// call keeps the first subscriber.
pub fn init_logging(config: &LogConfig) {
    let subscriber = tracing_subscriber::registry().with(env_filter(config));
    let result = if use_json(config) {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("logging already initialized");
    }
}
