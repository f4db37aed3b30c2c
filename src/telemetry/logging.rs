//! Logging setup.
//!
//! Everything in swsim logs through `tracing`. The filter is taken from
//! RUST_LOG when the variable is set, falling back to the level configured
//! in config.toml, and to `info` with no configuration at all.

use tracing_subscriber::EnvFilter;

/// Logging section of the configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Map a configured level onto a known directive; anything unrecognized
/// falls back to `info`.
fn normalize_level(level: &str) -> &'static str {
    let lower = level.to_ascii_lowercase();
    LEVELS
        .iter()
        .find(|known| **known == lower)
        .copied()
        .unwrap_or("info")
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init_logging(config: Option<&LogConfig>) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::new(config.map(|c| normalize_level(&c.level)).unwrap_or("info")),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
