//! Framework error types.

use thiserror::Error;

/// Errors raised while registering or unregistering plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A plugin with the same name is already registered.
    #[error("plugin already registered: {plugin}")]
    AlreadyRegistered {
        /// The conflicting plugin name.
        plugin: String,
    },

    /// No plugin with that name is registered.
    #[error("plugin not registered: {plugin}")]
    NotRegistered {
        /// The missing plugin name.
        plugin: String,
    },

    /// The plugin supplied two implementations for the same hook.
    #[error("plugin {plugin} already implements hook {hook}")]
    DuplicateImplementation {
        /// The offending plugin.
        plugin: String,
        /// The hook name.
        hook: &'static str,
    },

    /// A before/after constraint names the plugin itself.
    #[error("hook {hook} of plugin {plugin} orders itself against its own plugin")]
    SelfReference {
        /// The offending plugin.
        plugin: String,
        /// The hook name.
        hook: &'static str,
    },

    /// The same plugin appears in both the before and the after set.
    #[error("hook {hook} of plugin {plugin} is both before and after {other}")]
    ContradictoryConstraints {
        /// The offending plugin.
        plugin: String,
        /// The hook name.
        hook: &'static str,
        /// The plugin named on both sides.
        other: String,
    },

    /// No implementation order satisfies every before/after constraint.
    #[error("unsatisfiable ordering constraints for hook {hook} among plugins: {plugins:?}")]
    UnsatisfiableOrdering {
        /// The hook name.
        hook: &'static str,
        /// The plugins competing for an order.
        plugins: Vec<String>,
    },
}

/// Errors raised by the entity-type registry on [`Config`](crate::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The entity type is already provided by another plugin.
    #[error("entity type already registered: {name}")]
    DuplicateEntity {
        /// The entity type name.
        name: String,
    },

    /// The entity type was never registered.
    #[error("entity type not registered: {name}")]
    UnknownEntity {
        /// The entity type name.
        name: String,
    },
}

/// Errors raised by the [`Session`](crate::Session) service registry.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A service with the same name already exists.
    #[error("service already registered: {name}")]
    DuplicateService {
        /// The service name.
        name: String,
    },
}

/// An error escaping a hook implementation.
///
/// Hooks from different plugins fail in unrelated ways; this type erases
/// them to a message so dispatch can stay uniform. Callers decide whether a
/// failure is fatal (session start) or merely logged (a producer mid-cycle).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    /// Wraps any displayable error.
    pub fn new(err: impl std::fmt::Display) -> Self {
        HookError(err.to_string())
    }
}

/// Result type for hook implementations.
pub type HookResult<T> = Result<T, HookError>;
