//! Hook definitions.
//!
//! Each extension point of the agent is a named hook with a typed call
//! signature, declared here as one trait per hook. A plugin implements the
//! traits for the hooks it wants and hands the manager an [`Arc`] per
//! implementation, wrapped in a [`HookBinding`] that may carry before/after
//! ordering constraints against other plugins.
//!
//! The hook names (`entityd_*`) are the stable, externally visible
//! identifiers used in trace output; the traits are their compile-time
//! shape. Typed signatures make the original runtime checks — unknown
//! implementation parameters, unexpected dispatch arguments — structurally
//! impossible.
//!
//! Two dispatch disciplines exist:
//!
//! - ordinary hooks run every implementation in order and collect the
//!   non-null results;
//! - **first-result** hooks stop at the first implementation returning
//!   `Some` and yield that value alone.
//!
//! [`HookDef::first_result`] records which discipline a hook uses.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Command;
use entityd_core::{AttrValue, EntityUpdate};

use crate::config::Config;
use crate::error::HookResult;
use crate::manager::PluginManager;
use crate::session::Session;

/// Static description of one hook: its wire name and dispatch discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookDef {
    /// The stable hook name.
    pub name: &'static str,
    /// Whether dispatch stops at the first non-null result.
    pub first_result: bool,
}

/// Attribute filter for [`FindEntityHook::find_entity`] lookups.
///
/// Maps attribute names to the exact values they must carry. The monitor
/// itself never filters; on-demand callers may.
pub type AttrFilter = BTreeMap<String, AttrValue>;

// ─── Hook traits ─────────────────────────────────────────────────────────────

/// `entityd_plugin_registered` — a plugin has just been registered.
///
/// Runs for every registration, including the registering plugin's own.
#[async_trait]
pub trait PluginRegisteredHook: Send + Sync {
    async fn plugin_registered(&self, pm: &PluginManager, name: &str) -> HookResult<()>;
}

/// `entityd_cmdline_parse` — parse the command line into a [`Config`].
///
/// First-result: the first implementation returning a config wins. The
/// canonical implementation builds the clap command, folds
/// [`OptionsHook::add_options`] across all plugins, and parses.
#[async_trait]
pub trait CmdlineParseHook: Send + Sync {
    async fn cmdline_parse(
        &self,
        pm: &PluginManager,
        argv: &[String],
    ) -> HookResult<Option<Config>>;
}

/// `entityd_addoption` — contribute command-line options.
///
/// Dispatch folds the [`Command`] through every implementation in order.
#[async_trait]
pub trait OptionsHook: Send + Sync {
    async fn add_options(&self, cmd: Command) -> HookResult<Command>;
}

/// `entityd_configure` — the command line is parsed; plugins may inspect
/// the config and register the entity types they provide.
#[async_trait]
pub trait ConfigureHook: Send + Sync {
    async fn configure(&self, config: &Arc<Config>) -> HookResult<()>;
}

/// `entityd_sessionstart` — a monitoring session is starting.
///
/// Failures here are fatal for the whole agent.
#[async_trait]
pub trait SessionStartHook: Send + Sync {
    async fn session_start(&self, session: &Arc<Session>) -> HookResult<()>;
}

/// `entityd_mainloop` — drive the collection loop until shutdown.
///
/// First-result.
#[async_trait]
pub trait MainLoopHook: Send + Sync {
    async fn main_loop(&self, session: &Arc<Session>) -> HookResult<Option<()>>;
}

/// `entityd_sessionfinish` — the session is draining; persist state and
/// release resources. Failures are logged, not fatal.
#[async_trait]
pub trait SessionFinishHook: Send + Sync {
    async fn session_finish(&self, session: &Arc<Session>) -> HookResult<()>;
}

/// `entityd_find_entity` — produce the updates for one entity type.
///
/// Returns `None` when the implementation does not provide `name`.
/// `include_ondemand` additionally pulls in related entities the collector
/// would not normally report (for example `File` entities backing a
/// service's configuration).
#[async_trait]
pub trait FindEntityHook: Send + Sync {
    async fn find_entity(
        &self,
        name: &str,
        attrs: Option<&AttrFilter>,
        include_ondemand: bool,
    ) -> HookResult<Option<Vec<EntityUpdate>>>;
}

/// `entityd_emit_entities` — produce updates not tied to a requested type.
///
/// Called once per collection cycle, after the per-type
/// [`FindEntityHook`] sweep.
#[async_trait]
pub trait EmitEntitiesHook: Send + Sync {
    async fn emit_entities(&self) -> HookResult<Vec<EntityUpdate>>;
}

/// `entityd_send_entity` — forward one update to the model builder.
#[async_trait]
pub trait SendEntityHook: Send + Sync {
    async fn send_entity(&self, session: &Arc<Session>, entity: &EntityUpdate) -> HookResult<()>;
}

// ─── Bindings ────────────────────────────────────────────────────────────────

/// One hook implementation, as handed to the manager.
pub enum HookPoint {
    PluginRegistered(Arc<dyn PluginRegisteredHook>),
    CmdlineParse(Arc<dyn CmdlineParseHook>),
    AddOptions(Arc<dyn OptionsHook>),
    Configure(Arc<dyn ConfigureHook>),
    SessionStart(Arc<dyn SessionStartHook>),
    MainLoop(Arc<dyn MainLoopHook>),
    SessionFinish(Arc<dyn SessionFinishHook>),
    FindEntity(Arc<dyn FindEntityHook>),
    EmitEntities(Arc<dyn EmitEntitiesHook>),
    SendEntity(Arc<dyn SendEntityHook>),
}

impl HookPoint {
    /// The wire name of the hook this implementation belongs to.
    pub fn hook_name(&self) -> &'static str {
        match self {
            HookPoint::PluginRegistered(_) => "entityd_plugin_registered",
            HookPoint::CmdlineParse(_) => "entityd_cmdline_parse",
            HookPoint::AddOptions(_) => "entityd_addoption",
            HookPoint::Configure(_) => "entityd_configure",
            HookPoint::SessionStart(_) => "entityd_sessionstart",
            HookPoint::MainLoop(_) => "entityd_mainloop",
            HookPoint::SessionFinish(_) => "entityd_sessionfinish",
            HookPoint::FindEntity(_) => "entityd_find_entity",
            HookPoint::EmitEntities(_) => "entityd_emit_entities",
            HookPoint::SendEntity(_) => "entityd_send_entity",
        }
    }
}

/// A hook implementation plus its ordering constraints.
///
/// Ordering metadata travels with the registration, not the implementation:
///
/// ```rust,ignore
/// HookBinding::new(HookPoint::SessionStart(self.clone())).after("entityd.kvstore")
/// ```
pub struct HookBinding {
    pub(crate) point: HookPoint,
    pub(crate) before: Vec<String>,
    pub(crate) after: Vec<String>,
}

impl HookBinding {
    /// Wraps an implementation with no ordering constraints.
    pub fn new(point: HookPoint) -> Self {
        HookBinding {
            point,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Requires this implementation to run before the named plugin's.
    pub fn before(mut self, plugin: impl Into<String>) -> Self {
        self.before.push(plugin.into());
        self
    }

    /// Requires this implementation to run after the named plugin's.
    pub fn after(mut self, plugin: impl Into<String>) -> Self {
        self.after.push(plugin.into());
        self
    }
}

/// A named container of hook implementations.
///
/// `name()` is the dotted plugin name used in ordering constraints,
/// `--disable` patterns and log output; `hooks()` yields one binding per
/// implemented hook.
pub trait Plugin: Send + Sync + 'static {
    /// The dotted plugin name, e.g. `entityd.monitor`.
    fn name(&self) -> &str;

    /// The hook implementations this plugin provides.
    fn hooks(self: Arc<Self>) -> Vec<HookBinding>;
}
