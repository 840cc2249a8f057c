//! Logging setup.
//!
//! One `tracing-subscriber` registry (EnvFilter + fmt layer), initialised
//! once at startup. The agent's `--log-level` flag is a numeric verbosity
//! in the 0–100 range; [`numeric_level`] maps it onto tracing's levels.
//! `RUST_LOG` still wins when set, so operators can scope filtering per
//! module without touching the flag.

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Maps the numeric `--log-level` verbosity onto a tracing level.
///
/// 10 is debug, 20 info, 30 warn and anything from 40 up errors only;
/// single digits turn on trace output.
pub fn numeric_level(level: u8) -> Level {
    match level {
        0..=9 => Level::TRACE,
        10..=19 => Level::DEBUG,
        20..=29 => Level::INFO,
        30..=39 => Level::WARN,
        _ => Level::ERROR,
    }
}

/// A builder for the agent's logging configuration.
///
/// ```rust,ignore
/// LoggingBuilder::new()
///     .with_numeric_level(config.log_level())
///     .directive("entityd_framework=trace")
///     .init();
/// ```
#[derive(Default)]
pub struct LoggingBuilder {
    level: Option<Level>,
    directives: Vec<String>,
}

impl LoggingBuilder {
    /// Creates a builder with default settings (info level).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base level from the numeric verbosity flag.
    pub fn with_numeric_level(mut self, level: u8) -> Self {
        self.level = Some(numeric_level(level));
        self
    }

    /// Adds a filter directive, e.g. `"entityd_framework=trace"`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let base = self
            .level
            .map(|level| level.to_string().to_lowercase())
            .unwrap_or_else(|| "info".to_string());
        let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
        for directive in &self.directives {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }
        filter
    }

    /// Initialises the global subscriber.
    ///
    /// # Panics
    ///
    /// Panics if a subscriber is already installed.
    pub fn init(self) {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(self.build_filter())
            .init();
    }

    /// Initialises the global subscriber, tolerating one already installed.
    pub fn try_init(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(self.build_filter())
            .try_init()
            .map_err(|err| Box::new(err) as Box<dyn std::error::Error + Send + Sync>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_levels_map_to_tracing_levels() {
        assert_eq!(numeric_level(0), Level::TRACE);
        assert_eq!(numeric_level(10), Level::DEBUG);
        assert_eq!(numeric_level(19), Level::DEBUG);
        assert_eq!(numeric_level(20), Level::INFO);
        assert_eq!(numeric_level(30), Level::WARN);
        assert_eq!(numeric_level(40), Level::ERROR);
        assert_eq!(numeric_level(100), Level::ERROR);
    }
}
