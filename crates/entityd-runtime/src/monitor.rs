//! The collection cycle.
//!
//! [`Monitor`] owns one cycle of the agent's life: fan the
//! `entityd_find_entity` hook out across collectors for every polled
//! entity type, sweep `entityd_emit_entities` once, merge duplicate UEIDs,
//! synthesise tombstones for entities that were seen last cycle but not
//! this one, and hand everything to `entityd_send_entity`.
//!
//! Liveness is tracked per type in `last_batch`, persisted through the
//! `kvstore` service across restarts: the `metypes` key lists the types
//! seen last run and `ueids/<type>/<hex>` entries hold their UEID sets.
//! The monitor's session hooks are ordered around the store's — loading
//! after `entityd.kvstore` opens it and persisting before it closes.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use entityd_core::{EntityUpdate, Ueid};
use entityd_framework::{
    HookBinding, HookError, HookPoint, HookResult, Plugin, Session, SessionFinishHook,
    SessionStartHook,
};

use crate::kvstore::KvStore;

const METYPES_KEY: &str = "metypes";

fn ueid_prefix(etype: &str) -> String {
    format!("ueids/{etype}/")
}

/// The collection driver, published as the `monitor` service.
pub struct Monitor {
    last_batch: Mutex<HashMap<String, HashSet<Ueid>>>,
}

impl Monitor {
    pub fn new() -> Self {
        Monitor {
            last_batch: Mutex::new(HashMap::new()),
        }
    }

    /// The UEIDs emitted for a type in the previous cycle.
    pub fn last_batch(&self, etype: &str) -> HashSet<Ueid> {
        self.last_batch.lock().get(etype).cloned().unwrap_or_default()
    }

    /// Runs one collection cycle.
    pub async fn collect_entities(&self, session: &Arc<Session>) {
        let hooks = session.hooks();

        // Poll the configured types plus everything still owed a tombstone.
        let mut types: BTreeSet<String> = session.config().entities().into_iter().collect();
        types.extend(self.last_batch.lock().keys().cloned());

        // Gather updates, merging intra-cycle duplicates by UEID as they
        // arrive: later duplicates overlay earlier ones. A failing producer
        // loses its contribution for this cycle only.
        let mut order: Vec<Ueid> = Vec::new();
        let mut merged: HashMap<Ueid, EntityUpdate> = HashMap::new();
        for etype in &types {
            for (plugin, hook) in hooks.find_entity.snapshot() {
                match hook.find_entity(etype, None, false).await {
                    Ok(Some(batch)) => {
                        for update in batch {
                            absorb(&mut order, &mut merged, update);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(plugin = %plugin, etype = %etype, error = %err, "entity producer failed");
                    }
                }
            }
        }
        for (plugin, hook) in hooks.emit_entities.snapshot() {
            match hook.emit_entities().await {
                Ok(batch) => {
                    for update in batch {
                        absorb(&mut order, &mut merged, update);
                    }
                }
                Err(err) => {
                    warn!(plugin = %plugin, error = %err, "entity producer failed");
                }
            }
        }

        // Updates of polled types feed the liveness sets; anything else is
        // on-demand and gets sent without being tracked.
        let mut seen: HashMap<String, HashSet<Ueid>> = HashMap::new();
        for ueid in &order {
            let etype = merged[ueid].etype();
            if types.contains(etype) {
                seen.entry(etype.to_string()).or_default().insert(*ueid);
            }
        }

        let mut outgoing: Vec<EntityUpdate> = order
            .iter()
            .filter_map(|ueid| merged.remove(ueid))
            .collect();

        // Entities present last cycle but absent now have gone away.
        {
            let last = self.last_batch.lock();
            let none = HashSet::new();
            for etype in &types {
                let Some(previous) = last.get(etype) else {
                    continue;
                };
                let current = seen.get(etype).unwrap_or(&none);
                for ueid in previous.difference(current) {
                    let mut tombstone = EntityUpdate::with_ueid(etype.clone(), *ueid);
                    tombstone.delete();
                    outgoing.push(tombstone);
                }
            }
        }

        let mut sent = 0usize;
        for update in &outgoing {
            for (plugin, hook) in hooks.send_entity.snapshot() {
                match hook.send_entity(session, update).await {
                    Ok(()) => sent += 1,
                    Err(err) => {
                        warn!(plugin = %plugin, ueid = %update.ueid(), error = %err, "failed to send update");
                    }
                }
            }
        }

        let mut last = self.last_batch.lock();
        for etype in &types {
            match seen.remove(etype) {
                Some(current) if !current.is_empty() => {
                    last.insert(etype.clone(), current);
                }
                _ => {
                    last.remove(etype);
                }
            }
        }
        debug!(updates = outgoing.len(), sent, "collection cycle complete");
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

fn absorb(order: &mut Vec<Ueid>, merged: &mut HashMap<Ueid, EntityUpdate>, update: EntityUpdate) {
    let ueid = update.ueid();
    match merged.get_mut(&ueid) {
        Some(existing) => existing.merge(update),
        None => {
            order.push(ueid);
            merged.insert(ueid, update);
        }
    }
}

impl Monitor {
    /// Reloads the per-type UEID sets remembered by the last run.
    async fn restore(&self, session: &Arc<Session>) -> HookResult<()> {
        let Some(store) = session.service::<KvStore>("kvstore") else {
            warn!("kvstore service unavailable; deletions will not survive restarts");
            return Ok(());
        };

        let mut types: HashSet<String> = session.config().entities().into_iter().collect();
        if let Some(bytes) = store.get(METYPES_KEY).map_err(HookError::new)? {
            match rmp_serde::from_slice::<Vec<String>>(&bytes) {
                Ok(stored) => types.extend(stored),
                Err(err) => warn!(error = %err, "discarding unreadable metypes entry"),
            }
        }

        let mut last = HashMap::new();
        for etype in types {
            let entries = store.getmany(&ueid_prefix(&etype)).map_err(HookError::new)?;
            let ueids: HashSet<Ueid> = entries
                .values()
                .filter_map(|value| std::str::from_utf8(value).ok()?.parse().ok())
                .collect();
            if !ueids.is_empty() {
                last.insert(etype, ueids);
            }
        }
        debug!(types = last.len(), "previous batch state loaded");
        *self.last_batch.lock() = last;
        Ok(())
    }

    /// Persists the per-type UEID sets for the next run.
    ///
    /// Store failures at shutdown cost only the next run's tombstones, so
    /// they are logged rather than raised.
    async fn persist(&self, session: &Arc<Session>) -> HookResult<()> {
        let Some(store) = session.service::<KvStore>("kvstore") else {
            return Ok(());
        };

        let last = self.last_batch.lock();
        let types: Vec<String> = last.keys().cloned().collect();
        let encoded = match rmp_serde::to_vec(&types) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "cannot encode metypes; skipping persistence");
                return Ok(());
            }
        };

        let mut result = store.add(METYPES_KEY, &encoded);
        for (etype, ueids) in last.iter() {
            let prefix = ueid_prefix(etype);
            result = result.and(store.deletemany(&prefix));
            result = result.and(store.addmany(ueids.iter().map(|ueid| {
                let hex = ueid.to_string();
                (format!("{prefix}{hex}"), hex.into_bytes())
            })));
        }
        if let Err(err) = result {
            warn!(error = %err, "failed to persist batch state at shutdown");
        }
        Ok(())
    }
}

// ─── Plugin ──────────────────────────────────────────────────────────────────

/// The `entityd.monitor` plugin: publishes the [`Monitor`] as the
/// `monitor` service and ties its persistence to the session lifecycle,
/// ordered around the key-value store's own hooks.
pub struct MonitorPlugin {
    monitor: Arc<Monitor>,
}

impl MonitorPlugin {
    pub fn new() -> Self {
        MonitorPlugin {
            monitor: Arc::new(Monitor::new()),
        }
    }

    /// The monitor this plugin drives.
    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }
}

impl Default for MonitorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStartHook for MonitorPlugin {
    async fn session_start(&self, session: &Arc<Session>) -> HookResult<()> {
        session
            .add_service("monitor", self.monitor.clone())
            .map_err(HookError::new)?;
        self.monitor.restore(session).await
    }
}

#[async_trait]
impl SessionFinishHook for MonitorPlugin {
    async fn session_finish(&self, session: &Arc<Session>) -> HookResult<()> {
        self.monitor.persist(session).await
    }
}

impl Plugin for MonitorPlugin {
    fn name(&self) -> &str {
        "entityd.monitor"
    }

    fn hooks(self: Arc<Self>) -> Vec<HookBinding> {
        vec![
            HookBinding::new(HookPoint::SessionStart(self.clone())).after("entityd.kvstore"),
            HookBinding::new(HookPoint::SessionFinish(self.clone())).before("entityd.kvstore"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use clap::Command;
    use entityd_core::traits;
    use entityd_framework::{
        Config, FindEntityHook, PluginManager, SendEntityHook, hookspec::AttrFilter,
    };

    use super::*;

    /// Scripted producer: one batch per cycle, popped front to back.
    struct ScriptedProducer {
        name: &'static str,
        batches: Mutex<Vec<Vec<EntityUpdate>>>,
    }

    #[async_trait]
    impl FindEntityHook for ScriptedProducer {
        async fn find_entity(
            &self,
            name: &str,
            _attrs: Option<&AttrFilter>,
            _include_ondemand: bool,
        ) -> HookResult<Option<Vec<EntityUpdate>>> {
            if name != "Foo" {
                return Ok(None);
            }
            let mut batches = self.batches.lock();
            if batches.is_empty() {
                return Ok(Some(Vec::new()));
            }
            Ok(Some(batches.remove(0)))
        }
    }

    impl Plugin for ScriptedProducer {
        fn name(&self) -> &str {
            self.name
        }

        fn hooks(self: Arc<Self>) -> Vec<HookBinding> {
            vec![HookBinding::new(HookPoint::FindEntity(self.clone()))]
        }
    }

    /// Sink recording everything sent.
    struct RecordingSender {
        sent: Mutex<Vec<EntityUpdate>>,
    }

    #[async_trait]
    impl SendEntityHook for RecordingSender {
        async fn send_entity(
            &self,
            _session: &Arc<Session>,
            entity: &EntityUpdate,
        ) -> HookResult<()> {
            self.sent.lock().push(entity.clone());
            Ok(())
        }
    }

    impl Plugin for RecordingSender {
        fn name(&self) -> &str {
            "test.sender"
        }

        fn hooks(self: Arc<Self>) -> Vec<HookBinding> {
            vec![HookBinding::new(HookPoint::SendEntity(self.clone()))]
        }
    }

    fn foo(id: &str) -> EntityUpdate {
        let mut update = EntityUpdate::new("Foo");
        update.attrs.set("name", id, &[traits::ENTITY_ID]);
        update
    }

    async fn harness(
        batches: Vec<Vec<EntityUpdate>>,
    ) -> (Arc<Monitor>, Arc<Session>, Arc<RecordingSender>) {
        let pm = Arc::new(PluginManager::new());
        let monitor = Arc::new(Monitor::new());
        let sender = Arc::new(RecordingSender {
            sent: Mutex::new(Vec::new()),
        });
        pm.register(Arc::new(ScriptedProducer {
            name: "test.producer",
            batches: Mutex::new(batches),
        }))
        .await
        .unwrap();
        pm.register(sender.clone()).await.unwrap();

        let config = Config::new(Command::new("entityd").get_matches_from(["entityd"]));
        config.addentity("Foo", "test.producer").unwrap();
        let session = Session::new(pm, Arc::new(config));
        (monitor, session, sender)
    }

    fn sent_of(sender: &RecordingSender) -> Vec<EntityUpdate> {
        sender.sent.lock().clone()
    }

    #[tokio::test]
    async fn vanished_entities_become_tombstones() {
        let (monitor, session, sender) = harness(vec![vec![foo("x")], vec![]]).await;
        let ueid = foo("x").ueid();

        monitor.collect_entities(&session).await;
        let first: Vec<_> = sent_of(&sender);
        assert_eq!(first.len(), 1);
        assert!(first[0].exists());
        assert_eq!(monitor.last_batch("Foo").len(), 1);

        sender.sent.lock().clear();
        monitor.collect_entities(&session).await;
        let second: Vec<_> = sent_of(&sender);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].etype(), "Foo");
        assert_eq!(second[0].ueid(), ueid);
        assert!(!second[0].exists());
        assert!(monitor.last_batch("Foo").is_empty());

        // Nothing left to report or delete.
        sender.sent.lock().clear();
        monitor.collect_entities(&session).await;
        assert!(sent_of(&sender).is_empty());
    }

    #[tokio::test]
    async fn duplicate_ueids_collapse_into_one_send() {
        let mut a = foo("x");
        a.attrs.set("state", "up", &[]);
        let mut b = foo("x");
        b.attrs.set("state", "down", &[]);
        b.attrs.set("extra", 1, &[]);

        let (monitor, session, sender) = harness(vec![vec![a, b]]).await;
        monitor.collect_entities(&session).await;

        let sent = sent_of(&sender);
        assert_eq!(sent.len(), 1);
        let update = &sent[0];
        assert_eq!(
            update.attrs.get("state").unwrap().value(),
            &entityd_core::AttrValue::from("down")
        );
        assert!(update.attrs.get("extra").is_some());
    }

    #[tokio::test]
    async fn ondemand_types_are_sent_but_not_tracked() {
        let mut file = EntityUpdate::new("File");
        file.attrs.set("path", "/etc/hosts", &[traits::ENTITY_ID]);

        let (monitor, session, sender) = harness(vec![vec![foo("x"), file], vec![foo("x")]]).await;

        monitor.collect_entities(&session).await;
        assert_eq!(sent_of(&sender).len(), 2);
        assert!(monitor.last_batch("File").is_empty());

        // The File entity vanishing produces no tombstone.
        sender.sent.lock().clear();
        monitor.collect_entities(&session).await;
        let second = sent_of(&sender);
        assert_eq!(second.len(), 1);
        assert!(second[0].exists());
    }

    #[tokio::test]
    async fn batch_state_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(KvStore::open(&dir.path().join("entityd.db")).unwrap());

        let (monitor, session, _sender) = harness(vec![vec![foo("x"), foo("y")]]).await;
        session.add_service("kvstore", store.clone()).unwrap();
        monitor.collect_entities(&session).await;
        monitor.persist(&session).await.unwrap();

        // A fresh monitor in a fresh session reloads the same state.
        let (restarted, new_session, _sender) = harness(vec![]).await;
        new_session.add_service("kvstore", store).unwrap();
        restarted.restore(&new_session).await.unwrap();
        assert_eq!(restarted.last_batch("Foo").len(), 2);
    }

    #[tokio::test]
    async fn remembered_types_are_polled_without_config() {
        // "Foo" is remembered from a previous run but no longer configured:
        // its stale UEID must still be tombstoned.
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(KvStore::open(&dir.path().join("entityd.db")).unwrap());

        let (monitor, session, _s) = harness(vec![vec![foo("x")]]).await;
        session.add_service("kvstore", store.clone()).unwrap();
        monitor.collect_entities(&session).await;
        monitor.persist(&session).await.unwrap();

        let pm = Arc::new(PluginManager::new());
        let restarted = Arc::new(Monitor::new());
        let sender = Arc::new(RecordingSender {
            sent: Mutex::new(Vec::new()),
        });
        pm.register(sender.clone()).await.unwrap();
        let config = Config::new(Command::new("entityd").get_matches_from(["entityd"]));
        let session = Session::new(pm, Arc::new(config));
        session.add_service("kvstore", store).unwrap();

        restarted.restore(&session).await.unwrap();
        restarted.collect_entities(&session).await;

        let sent = sent_of(&sender);
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].exists());
        assert_eq!(sent[0].etype(), "Foo");
    }
}
