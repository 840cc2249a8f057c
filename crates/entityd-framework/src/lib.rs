//! # entityd-framework
//!
//! The extensibility engine of the entityd agent: a hook-dispatch runtime
//! binding independent collector modules to a fixed set of named hook
//! points, with cooperative ordering constraints and first-result
//! semantics, plus the session plumbing those hooks run inside.
//!
//! ## Pieces
//!
//! - [`hookspec`] — one typed trait per hook, the [`Plugin`] container
//!   trait, and [`HookBinding`] for attaching ordering constraints.
//! - [`HookCaller`] — per-hook ordered dispatch; constraint satisfaction is
//!   recomputed on every registration.
//! - [`PluginManager`] — plugin registry, binding installation with
//!   rollback, registration callback, and the [`HookRelay`] dispatch
//!   surface.
//! - [`Config`] — parsed command line plus the entity-type registry.
//! - [`Session`] — one run of the agent: shutdown signal and the service
//!   registry shared by core plugins.
//!
//! ## Registering a plugin
//!
//! ```rust,ignore
//! struct HostCollector;
//!
//! #[async_trait]
//! impl FindEntityHook for HostCollector { /* … */ }
//!
//! impl Plugin for HostCollector {
//!     fn name(&self) -> &str {
//!         "entityd.host"
//!     }
//!
//!     fn hooks(self: Arc<Self>) -> Vec<HookBinding> {
//!         vec![HookBinding::new(HookPoint::FindEntity(self.clone()))]
//!     }
//! }
//!
//! pm.register(Arc::new(HostCollector)).await?;
//! ```

mod caller;
mod config;
mod error;
pub mod hookspec;
mod manager;
mod session;

pub use caller::HookCaller;
pub use config::{Config, DEFAULT_DEST, DEFAULT_KEYDIR, DotForeign};
pub use error::{ConfigError, HookError, HookResult, PluginError, SessionError};
pub use hookspec::{
    AttrFilter, CmdlineParseHook, ConfigureHook, EmitEntitiesHook, FindEntityHook, HookBinding,
    HookDef, HookPoint, MainLoopHook, OptionsHook, Plugin, PluginRegisteredHook, SendEntityHook,
    SessionFinishHook, SessionStartHook,
};
pub use manager::{HookRelay, PluginInfo, PluginManager, RegisterCallback};
pub use session::Session;
