//! Helpers shared by the `kvdb-server`, `kvdb-client` and `kvdb-tester`
//! binaries.

use std::path::Path;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::{self, Config};

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
#[must_use]
pub fn log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr so they never interleave with REPL output on stdout.
pub fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the configuration, printing a diagnostic on failure.
///
/// Returns `None` after reporting the error, so callers can exit.
#[must_use]
pub fn load_config_or_report(path: Option<&Path>) -> Option<Config> {
    match config::load_config(path) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nExpected config at: {}", default_path.display());
                    eprintln!("Create one based on config/example-config.json");
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_wins() {
        assert_eq!(log_level(3, true, "trace"), Level::ERROR);
    }

    #[test]
    fn verbosity_overrides_config() {
        assert_eq!(log_level(1, false, "error"), Level::INFO);
        assert_eq!(log_level(2, false, "error"), Level::DEBUG);
        assert_eq!(log_level(5, false, "error"), Level::TRACE);
    }

    #[test]
    fn config_level_is_case_insensitive() {
        assert_eq!(log_level(0, false, "DEBUG"), Level::DEBUG);
        assert_eq!(log_level(0, false, "bogus"), Level::WARN);
    }
}
