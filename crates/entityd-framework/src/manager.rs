//! Plugin registration and the hook relay.
//!
//! [`PluginManager`] is the central owner of all registered plugins. It:
//!
//! - Accepts [`Plugin`]s and assigns each a monotonically increasing index,
//!   the stable tiebreak between implementations with no explicit ordering
//!   constraints.
//! - Installs every [`HookBinding`] a plugin provides into the matching
//!   [`HookCaller`] on the [`HookRelay`]; a binding that fails to install
//!   (duplicate, self-referential, contradictory or unsatisfiable ordering)
//!   rolls back the whole registration, leaving earlier plugins untouched.
//! - Fires a registration callback after each successful registration; the
//!   runtime wires this to the `entityd_plugin_registered` hook.
//!
//! Dispatch goes through [`PluginManager::hooks`]:
//!
//! ```rust,ignore
//! let configs = pm.hooks().find_entity
//!     .call_all(|hook| async move { hook.find_entity("Host", None, false).await })
//!     .await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::trace;

use crate::caller::HookCaller;
use crate::error::PluginError;
use crate::hookspec::{
    CmdlineParseHook, ConfigureHook, EmitEntitiesHook, FindEntityHook, HookBinding, HookDef,
    HookPoint, MainLoopHook, OptionsHook, Plugin, PluginRegisteredHook, SendEntityHook,
    SessionFinishHook, SessionStartHook,
};

// ─── HookRelay ───────────────────────────────────────────────────────────────

/// One [`HookCaller`] per hook the agent defines.
///
/// The set of hooks is the compile-time hookspec; each caller carries the
/// hook's wire name and dispatch discipline in its [`HookDef`].
pub struct HookRelay {
    pub plugin_registered: HookCaller<dyn PluginRegisteredHook>,
    pub cmdline_parse: HookCaller<dyn CmdlineParseHook>,
    pub add_options: HookCaller<dyn OptionsHook>,
    pub configure: HookCaller<dyn ConfigureHook>,
    pub session_start: HookCaller<dyn SessionStartHook>,
    pub main_loop: HookCaller<dyn MainLoopHook>,
    pub session_finish: HookCaller<dyn SessionFinishHook>,
    pub find_entity: HookCaller<dyn FindEntityHook>,
    pub emit_entities: HookCaller<dyn EmitEntitiesHook>,
    pub send_entity: HookCaller<dyn SendEntityHook>,
}

impl HookRelay {
    fn new() -> Self {
        HookRelay {
            plugin_registered: HookCaller::new(HookDef {
                name: "entityd_plugin_registered",
                first_result: false,
            }),
            cmdline_parse: HookCaller::new(HookDef {
                name: "entityd_cmdline_parse",
                first_result: true,
            }),
            add_options: HookCaller::new(HookDef {
                name: "entityd_addoption",
                first_result: false,
            }),
            configure: HookCaller::new(HookDef {
                name: "entityd_configure",
                first_result: false,
            }),
            session_start: HookCaller::new(HookDef {
                name: "entityd_sessionstart",
                first_result: false,
            }),
            main_loop: HookCaller::new(HookDef {
                name: "entityd_mainloop",
                first_result: true,
            }),
            session_finish: HookCaller::new(HookDef {
                name: "entityd_sessionfinish",
                first_result: false,
            }),
            find_entity: HookCaller::new(HookDef {
                name: "entityd_find_entity",
                first_result: false,
            }),
            emit_entities: HookCaller::new(HookDef {
                name: "entityd_emit_entities",
                first_result: false,
            }),
            send_entity: HookCaller::new(HookDef {
                name: "entityd_send_entity",
                first_result: false,
            }),
        }
    }

    /// Every hook definition, in declaration order.
    pub fn definitions(&self) -> Vec<HookDef> {
        vec![
            self.plugin_registered.def(),
            self.cmdline_parse.def(),
            self.add_options.def(),
            self.configure.def(),
            self.session_start.def(),
            self.main_loop.def(),
            self.session_finish.def(),
            self.find_entity.def(),
            self.emit_entities.def(),
            self.send_entity.def(),
        ]
    }

    fn install(
        &self,
        plugin: &str,
        index: usize,
        binding: HookBinding,
    ) -> Result<(), PluginError> {
        let HookBinding {
            point,
            before,
            after,
        } = binding;
        match point {
            HookPoint::PluginRegistered(hook) => {
                self.plugin_registered.add(plugin, index, &before, &after, hook)
            }
            HookPoint::CmdlineParse(hook) => {
                self.cmdline_parse.add(plugin, index, &before, &after, hook)
            }
            HookPoint::AddOptions(hook) => {
                self.add_options.add(plugin, index, &before, &after, hook)
            }
            HookPoint::Configure(hook) => self.configure.add(plugin, index, &before, &after, hook),
            HookPoint::SessionStart(hook) => {
                self.session_start.add(plugin, index, &before, &after, hook)
            }
            HookPoint::MainLoop(hook) => self.main_loop.add(plugin, index, &before, &after, hook),
            HookPoint::SessionFinish(hook) => {
                self.session_finish.add(plugin, index, &before, &after, hook)
            }
            HookPoint::FindEntity(hook) => {
                self.find_entity.add(plugin, index, &before, &after, hook)
            }
            HookPoint::EmitEntities(hook) => {
                self.emit_entities.add(plugin, index, &before, &after, hook)
            }
            HookPoint::SendEntity(hook) => {
                self.send_entity.add(plugin, index, &before, &after, hook)
            }
        }
    }

    fn remove_plugin(&self, plugin: &str) {
        self.plugin_registered.remove_plugin(plugin);
        self.cmdline_parse.remove_plugin(plugin);
        self.add_options.remove_plugin(plugin);
        self.configure.remove_plugin(plugin);
        self.session_start.remove_plugin(plugin);
        self.main_loop.remove_plugin(plugin);
        self.session_finish.remove_plugin(plugin);
        self.find_entity.remove_plugin(plugin);
        self.emit_entities.remove_plugin(plugin);
        self.send_entity.remove_plugin(plugin);
    }
}

// ─── PluginManager ───────────────────────────────────────────────────────────

/// Record of one registered plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    /// The dotted plugin name.
    pub name: String,
    /// The registration index, the default ordering tiebreak.
    pub index: usize,
}

/// Callback fired after every successful registration.
pub type RegisterCallback =
    Arc<dyn for<'a> Fn(&'a PluginManager, &'a str) -> BoxFuture<'a, ()> + Send + Sync>;

/// The plugin manager.
pub struct PluginManager {
    hooks: HookRelay,
    plugins: RwLock<HashMap<String, PluginInfo>>,
    next_index: AtomicUsize,
    register_cb: RwLock<Option<RegisterCallback>>,
}

impl PluginManager {
    /// Creates a manager with the compile-time hookspec installed.
    pub fn new() -> Self {
        PluginManager {
            hooks: HookRelay::new(),
            plugins: RwLock::new(HashMap::new()),
            next_index: AtomicUsize::new(0),
            register_cb: RwLock::new(None),
        }
    }

    /// The hook relay used for dispatch.
    pub fn hooks(&self) -> &HookRelay {
        &self.hooks
    }

    /// Sets the callback fired after each successful registration.
    pub fn set_register_callback(&self, cb: RegisterCallback) {
        *self.register_cb.write() = Some(cb);
    }

    /// Registers a plugin and installs all its hook implementations.
    ///
    /// Fails without side effects if the name is taken or any binding is
    /// rejected (duplicate implementation, self-referential, contradictory
    /// or unsatisfiable ordering constraints).
    pub async fn register<P: Plugin>(&self, plugin: Arc<P>) -> Result<PluginInfo, PluginError> {
        let name = plugin.name().to_string();
        {
            let plugins = self.plugins.read();
            if plugins.contains_key(&name) {
                return Err(PluginError::AlreadyRegistered { plugin: name });
            }
        }
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        trace!(plugin = %name, index, "registering plugin");

        for binding in plugin.clone().hooks() {
            if let Err(err) = self.hooks.install(&name, index, binding) {
                self.hooks.remove_plugin(&name);
                return Err(err);
            }
        }

        let info = PluginInfo {
            name: name.clone(),
            index,
        };
        self.plugins.write().insert(name.clone(), info.clone());

        let cb = self.register_cb.read().clone();
        if let Some(cb) = cb {
            cb(self, &name).await;
        }
        Ok(info)
    }

    /// Removes a plugin and all its hook implementations.
    pub fn unregister(&self, name: &str) -> Result<PluginInfo, PluginError> {
        let info = self
            .plugins
            .write()
            .remove(name)
            .ok_or_else(|| PluginError::NotRegistered {
                plugin: name.to_string(),
            })?;
        self.hooks.remove_plugin(name);
        trace!(plugin = %name, "plugin unregistered");
        Ok(info)
    }

    /// Whether a plugin with the given name is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.plugins.read().contains_key(name)
    }

    /// Looks up a registered plugin by name.
    pub fn plugin(&self, name: &str) -> Option<PluginInfo> {
        self.plugins.read().get(name).cloned()
    }

    /// Names of all registered plugins, in registration order.
    pub fn plugin_names(&self) -> Vec<String> {
        let mut infos: Vec<PluginInfo> = self.plugins.read().values().cloned().collect();
        infos.sort_by_key(|info| info.index);
        infos.into_iter().map(|info| info.name).collect()
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::HookResult;
    use entityd_core::EntityUpdate;

    struct Producer {
        name: &'static str,
        batch: Vec<&'static str>,
        before: Vec<String>,
    }

    #[async_trait]
    impl FindEntityHook for Producer {
        async fn find_entity(
            &self,
            name: &str,
            _attrs: Option<&crate::hookspec::AttrFilter>,
            _include_ondemand: bool,
        ) -> HookResult<Option<Vec<EntityUpdate>>> {
            if name != "Thing" {
                return Ok(None);
            }
            Ok(Some(self.batch.iter().map(|s| EntityUpdate::new(*s)).collect()))
        }
    }

    impl Plugin for Producer {
        fn name(&self) -> &str {
            self.name
        }

        fn hooks(self: Arc<Self>) -> Vec<HookBinding> {
            let mut binding = HookBinding::new(HookPoint::FindEntity(self.clone()));
            for other in &self.before {
                binding = binding.before(other.clone());
            }
            vec![binding]
        }
    }

    fn producer(name: &'static str, batch: Vec<&'static str>) -> Arc<Producer> {
        Arc::new(Producer {
            name,
            batch,
            before: Vec::new(),
        })
    }

    #[test]
    fn hook_definitions_are_unique() {
        let pm = PluginManager::new();
        let defs = pm.hooks().definitions();
        let names: HashSet<&str> = defs.iter().map(|def| def.name).collect();
        assert_eq!(names.len(), defs.len());
    }

    #[tokio::test]
    async fn duplicate_plugin_name_is_rejected() {
        let pm = PluginManager::new();
        pm.register(producer("entityd.a", vec![])).await.unwrap();
        let err = pm.register(producer("entityd.a", vec![])).await.unwrap_err();
        assert!(matches!(err, PluginError::AlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn unregister_removes_implementations() {
        let pm = PluginManager::new();
        pm.register(producer("entityd.a", vec!["x"])).await.unwrap();
        assert_eq!(pm.hooks().find_entity.len(), 1);

        pm.unregister("entityd.a").unwrap();
        assert!(!pm.is_registered("entityd.a"));
        assert!(pm.hooks().find_entity.is_empty());

        let err = pm.unregister("entityd.a").unwrap_err();
        assert!(matches!(err, PluginError::NotRegistered { .. }));
    }

    #[tokio::test]
    async fn failed_registration_rolls_back_cleanly() {
        let pm = PluginManager::new();
        pm.register(Arc::new(Producer {
            name: "entityd.a",
            batch: vec![],
            before: vec!["entityd.b".to_string()],
        }))
        .await
        .unwrap();

        let err = pm
            .register(Arc::new(Producer {
                name: "entityd.b",
                batch: vec![],
                before: vec!["entityd.a".to_string()],
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::UnsatisfiableOrdering { .. }));
        assert!(!pm.is_registered("entityd.b"));
        assert_eq!(pm.hooks().find_entity.ordered_plugins(), ["entityd.a"]);
    }

    #[tokio::test]
    async fn before_constraint_orders_dispatch() {
        // Register B first, then A with before=B; A must run first.
        let pm = PluginManager::new();
        pm.register(producer("entityd.b", vec!["from-b"])).await.unwrap();
        pm.register(Arc::new(Producer {
            name: "entityd.a",
            batch: vec!["from-a"],
            before: vec!["entityd.b".to_string()],
        }))
        .await
        .unwrap();

        let batches = pm
            .hooks()
            .find_entity
            .call_all(|hook| async move { hook.find_entity("Thing", None, false).await })
            .await
            .unwrap();
        let order: Vec<&str> = batches
            .iter()
            .flat_map(|batch| batch.iter().map(EntityUpdate::etype))
            .collect();
        assert_eq!(order, ["from-a", "from-b"]);
    }

    #[tokio::test]
    async fn registration_callback_fires_per_plugin() {
        let pm = PluginManager::new();
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        pm.set_register_callback(Arc::new(|_pm, _name| {
            Box::pin(async {
                SEEN.fetch_add(1, Ordering::SeqCst);
            })
        }));
        pm.register(producer("entityd.a", vec![])).await.unwrap();
        pm.register(producer("entityd.b", vec![])).await.unwrap();
        assert_eq!(SEEN.load(Ordering::SeqCst), 2);
    }
}
