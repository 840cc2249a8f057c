//! Agent configuration.
//!
//! Configuration is command-line only: plugins contribute their flags
//! through the `entityd_addoption` hook and the core plugin parses the
//! assembled command. [`Config`] wraps the parsed matches with typed
//! accessors for the canonical flags plus the registry of entity types and
//! the plugins providing them.
//!
//! Accessors tolerate flags whose providing plugin was disabled at startup
//! (`--disable`): an absent argument id simply yields its default.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::ArgMatches;
use parking_lot::RwLock;

use crate::error::ConfigError;

/// Default sender destination.
pub const DEFAULT_DEST: &str = "tcp://127.0.0.1:25010";

/// Default directory holding the curve key material.
pub const DEFAULT_KEYDIR: &str = "/etc/entityd/keys";

/// How foreign (cross-cycle) UEID references are rendered in DOT output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DotForeign {
    /// Render foreign nodes like any other node.
    #[default]
    Default,
    /// Render foreign nodes labelled with their full UEID.
    Ueid,
    /// Render foreign nodes labelled with a shortened UEID.
    UeidShort,
    /// Omit foreign nodes entirely.
    Exclude,
}

/// The main configuration instance.
pub struct Config {
    matches: ArgMatches,
    entities: RwLock<HashMap<String, String>>,
}

impl Config {
    /// Wraps parsed command-line matches.
    pub fn new(matches: ArgMatches) -> Self {
        Config {
            matches,
            entities: RwLock::new(HashMap::new()),
        }
    }

    /// The raw parsed matches, for plugin-specific flags.
    pub fn matches(&self) -> &ArgMatches {
        &self.matches
    }

    // ─── Entity registry ─────────────────────────────────────────────────────

    /// Registers `plugin` as the provider of entity type `name`.
    pub fn addentity(
        &self,
        name: impl Into<String>,
        plugin: impl Into<String>,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        let mut entities = self.entities.write();
        if entities.contains_key(&name) {
            return Err(ConfigError::DuplicateEntity { name });
        }
        entities.insert(name, plugin.into());
        Ok(())
    }

    /// Deregisters an entity type.
    pub fn removeentity(&self, name: &str) -> Result<(), ConfigError> {
        self.entities
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ConfigError::UnknownEntity {
                name: name.to_string(),
            })
    }

    /// The registered entity type names.
    pub fn entities(&self) -> Vec<String> {
        self.entities.read().keys().cloned().collect()
    }

    /// The plugin providing entity type `name`.
    pub fn provider(&self, name: &str) -> Option<String> {
        self.entities.read().get(name).cloned()
    }

    // ─── Canonical flags ─────────────────────────────────────────────────────

    /// Numeric log verbosity (0–100), defaulting to 20 (info).
    pub fn log_level(&self) -> u8 {
        self.value("log-level").unwrap_or(20)
    }

    /// Whether plugin-manager tracing was requested.
    pub fn trace_enabled(&self) -> bool {
        self.flag("trace")
    }

    /// The sender destination address.
    pub fn dest(&self) -> String {
        self.value("dest").unwrap_or_else(|| DEFAULT_DEST.to_string())
    }

    /// The directory holding the curve key material.
    pub fn keydir(&self) -> PathBuf {
        self.value("keydir")
            .unwrap_or_else(|| PathBuf::from(DEFAULT_KEYDIR))
    }

    /// The key-value store location, if one was given.
    pub fn database(&self) -> Option<PathBuf> {
        self.value("database")
    }

    /// Where declarative-entity files live.
    pub fn declentity_dir(&self) -> Option<PathBuf> {
        self.value("declentity-dir")
    }

    /// Where to write a DOT graph of each cycle.
    pub fn dot(&self) -> Option<PathBuf> {
        self.value("dot")
    }

    /// How cross-cycle references are rendered in DOT output.
    pub fn dot_foreign(&self) -> DotForeign {
        match self.value::<String>("dot-foreign").as_deref() {
            Some("ueid") => DotForeign::Ueid,
            Some("ueid-short") => DotForeign::UeidShort,
            Some("exclude") => DotForeign::Exclude,
            _ => DotForeign::Default,
        }
    }

    /// Whether DOT output should be indented.
    pub fn dot_pretty(&self) -> bool {
        self.flag("dot-pretty")
    }

    /// Whether attribute delta optimisation is enabled.
    pub fn stream_optimise(&self) -> bool {
        self.flag("stream-optimise")
    }

    /// Cycles between full attribute refreshes, at least 1.
    pub fn stream_optimise_frequency(&self) -> u32 {
        self.value("stream-optimise-frequency").unwrap_or(5).max(1)
    }

    /// The `--disable` plugin patterns.
    pub fn disabled_plugins(&self) -> Vec<String> {
        match self.matches.try_get_many::<String>("disable") {
            Ok(Some(values)) => values.cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn value<T: Clone + Send + Sync + 'static>(&self, id: &str) -> Option<T> {
        match self.matches.try_get_one::<T>(id) {
            Ok(value) => value.cloned(),
            Err(_) => None,
        }
    }

    fn flag(&self, id: &str) -> bool {
        matches!(self.matches.try_get_one::<bool>(id), Ok(Some(true)))
    }
}

#[cfg(test)]
mod tests {
    use clap::{Arg, ArgAction, Command, value_parser};

    use super::*;

    fn parse(argv: &[&str]) -> Config {
        let cmd = Command::new("entityd")
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_parser(value_parser!(u8).range(0..=100)),
            )
            .arg(Arg::new("dest").long("dest"))
            .arg(
                Arg::new("stream-optimise")
                    .long("stream-optimise")
                    .action(ArgAction::SetTrue),
            );
        let mut args = vec!["entityd"];
        args.extend_from_slice(argv);
        Config::new(cmd.get_matches_from(args))
    }

    #[test]
    fn accessors_fall_back_to_defaults() {
        let config = parse(&[]);
        assert_eq!(config.log_level(), 20);
        assert_eq!(config.dest(), DEFAULT_DEST);
        assert_eq!(config.keydir(), PathBuf::from(DEFAULT_KEYDIR));
        assert!(!config.stream_optimise());
        assert_eq!(config.stream_optimise_frequency(), 5);
        assert!(config.disabled_plugins().is_empty());
    }

    #[test]
    fn accessors_read_parsed_values() {
        let config = parse(&["-l", "10", "--dest", "tcp://modeld:9000", "--stream-optimise"]);
        assert_eq!(config.log_level(), 10);
        assert_eq!(config.dest(), "tcp://modeld:9000");
        assert!(config.stream_optimise());
    }

    #[test]
    fn entity_registry_rejects_duplicates() {
        let config = parse(&[]);
        config.addentity("Host", "entityd.host").unwrap();
        let err = config.addentity("Host", "entityd.other").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateEntity { .. }));
        assert_eq!(config.provider("Host").as_deref(), Some("entityd.host"));

        config.removeentity("Host").unwrap();
        assert!(config.entities().is_empty());
        assert!(config.removeentity("Host").is_err());
    }
}
