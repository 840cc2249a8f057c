//! Monitoring sessions.
//!
//! A [`Session`] is created once per run, after the command line is parsed
//! and plugins are configured. It carries everything the collection cycle
//! needs: the plugin manager, the config, the shutdown signal and the
//! service registry through which core plugins publish shared objects
//! (`kvstore`, `monitor`) to each other.
//!
//! Shutdown is cooperative: [`Session::shutdown`] (or
//! [`Session::interrupt`], from the signal handler) cancels the session
//! token; the main loop finishes its in-flight cycle and drains.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::SessionError;
use crate::manager::{HookRelay, PluginManager};

/// A monitoring session.
pub struct Session {
    pluginmanager: Arc<PluginManager>,
    config: Arc<Config>,
    shutdown: CancellationToken,
    interrupted: AtomicBool,
    services: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl Session {
    /// Creates a session over a configured plugin manager.
    pub fn new(pluginmanager: Arc<PluginManager>, config: Arc<Config>) -> Arc<Self> {
        Arc::new(Session {
            pluginmanager,
            config,
            shutdown: CancellationToken::new(),
            interrupted: AtomicBool::new(false),
            services: RwLock::new(HashMap::new()),
        })
    }

    /// The plugin manager driving this session.
    pub fn pluginmanager(&self) -> &Arc<PluginManager> {
        &self.pluginmanager
    }

    /// Shorthand for the plugin manager's hook relay.
    pub fn hooks(&self) -> &HookRelay {
        self.pluginmanager.hooks()
    }

    /// The session configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    // ─── Services ────────────────────────────────────────────────────────────

    /// Publishes a service under a name. Duplicate names fail.
    pub fn add_service<T: Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        service: Arc<T>,
    ) -> Result<(), SessionError> {
        let name = name.into();
        let mut services = self.services.write();
        if services.contains_key(&name) {
            return Err(SessionError::DuplicateService { name });
        }
        services.insert(name, service);
        Ok(())
    }

    /// Looks up a service by name, downcasting to its concrete type.
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let service = self.services.read().get(name).cloned()?;
        service.downcast::<T>().ok()
    }

    // ─── Shutdown ────────────────────────────────────────────────────────────

    /// Requests an orderly shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Marks the session as interrupted and requests shutdown.
    ///
    /// Used by the signal handler; an interrupted run exits with code 130.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    /// A clone of the shutdown token, for `select!`-style waits.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Whether shutdown came from an interrupt signal.
    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use clap::Command;

    use super::*;

    fn session() -> Arc<Session> {
        let config = Arc::new(Config::new(
            Command::new("entityd").get_matches_from(["entityd"]),
        ));
        Session::new(Arc::new(PluginManager::new()), config)
    }

    struct FakeStore(u32);

    #[test]
    fn services_register_and_downcast() {
        let session = session();
        session.add_service("kvstore", Arc::new(FakeStore(7))).unwrap();

        let store: Arc<FakeStore> = session.service("kvstore").unwrap();
        assert_eq!(store.0, 7);

        // Wrong type or unknown name both miss.
        assert!(session.service::<String>("kvstore").is_none());
        assert!(session.service::<FakeStore>("missing").is_none());
    }

    #[test]
    fn duplicate_service_names_fail() {
        let session = session();
        session.add_service("monitor", Arc::new(FakeStore(1))).unwrap();
        let err = session
            .add_service("monitor", Arc::new(FakeStore(2)))
            .unwrap_err();
        assert!(matches!(err, SessionError::DuplicateService { .. }));
    }

    #[test]
    fn interrupt_sets_both_signals() {
        let session = session();
        assert!(!session.is_shutdown());
        session.interrupt();
        assert!(session.is_shutdown());
        assert!(session.was_interrupted());

        let session = self::session();
        session.shutdown();
        assert!(session.is_shutdown());
        assert!(!session.was_interrupted());
    }
}
