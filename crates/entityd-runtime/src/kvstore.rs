//! The key-value store and its plugin.
//!
//! A single-writer persistent map from string keys to opaque byte values,
//! backed by sled. The agent uses it to remember last-seen UEIDs and
//! per-type state across restarts; plugins namespace their own keys with
//! their dotted name and a colon.
//!
//! The `entityd.kvstore` plugin opens the store at session start (fatal if
//! the location is unwritable) and publishes it as the `kvstore` service.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Arg, Command, value_parser};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use entityd_framework::{
    HookBinding, HookError, HookPoint, HookResult, OptionsHook, Plugin, Session,
    SessionFinishHook, SessionStartHook,
};

/// Errors from the key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The datastore location cannot be opened for writing.
    ///
    /// Fatal at session start; tolerated (logged) at session finish.
    #[error("cannot open datastore at {path}: {source}")]
    Unwritable {
        /// The datastore location.
        path: PathBuf,
        /// The underlying sled failure.
        source: sled::Error,
    },

    /// A store operation failed after open.
    #[error("datastore operation failed: {0}")]
    Op(#[from] sled::Error),
}

/// A durable map of string keys to opaque byte values.
#[derive(Debug)]
pub struct KvStore {
    db: sled::Db,
}

impl KvStore {
    /// Opens (creating if needed) the store at `path`.
    ///
    /// An existing directory gets an `entityd.db` datastore inside it; any
    /// other path is used as the datastore location itself.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let location = if path.is_dir() {
            path.join("entityd.db")
        } else {
            path.to_path_buf()
        };
        let db = sled::open(&location).map_err(|source| StoreError::Unwritable {
            path: location.clone(),
            source,
        })?;
        debug!(path = %location.display(), "datastore open");
        Ok(KvStore { db })
    }

    /// Fetches the value for `key`, if present.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?.map(|value| value.to_vec()))
    }

    /// Fetches every entry whose key starts with `prefix`.
    pub fn getmany(&self, prefix: &str) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        let mut entries = BTreeMap::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, value) = item?;
            if let Ok(key) = String::from_utf8(key.to_vec()) {
                entries.insert(key, value.to_vec());
            }
        }
        Ok(entries)
    }

    /// Inserts or replaces one entry.
    pub fn add(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    /// Inserts or replaces a batch of entries.
    pub fn addmany(
        &self,
        entries: impl IntoIterator<Item = (String, Vec<u8>)>,
    ) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.db.insert(key.as_bytes(), value)?;
        }
        Ok(())
    }

    /// Removes one entry; absent keys are fine.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.db.remove(key)?;
        Ok(())
    }

    /// Removes every entry whose key starts with `prefix`.
    pub fn deletemany(&self, prefix: &str) -> Result<(), StoreError> {
        let keys: Vec<_> = self
            .db
            .scan_prefix(prefix)
            .filter_map(|item| item.ok().map(|(key, _)| key))
            .collect();
        for key in keys {
            self.db.remove(key)?;
        }
        Ok(())
    }

    /// Flushes committed entries to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

// ─── Plugin ──────────────────────────────────────────────────────────────────

/// The `entityd.kvstore` plugin.
pub struct KvStorePlugin {
    store: Mutex<Option<Arc<KvStore>>>,
}

impl KvStorePlugin {
    pub fn new() -> Self {
        KvStorePlugin {
            store: Mutex::new(None),
        }
    }
}

impl Default for KvStorePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OptionsHook for KvStorePlugin {
    async fn add_options(&self, cmd: Command) -> HookResult<Command> {
        Ok(cmd.arg(
            Arg::new("database")
                .long("database")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Datastore location (a file path, or a directory to hold entityd.db)"),
        ))
    }
}

#[async_trait]
impl SessionStartHook for KvStorePlugin {
    async fn session_start(&self, session: &Arc<Session>) -> HookResult<()> {
        let location = session
            .config()
            .database()
            .unwrap_or_else(|| crate::state_dir().join("entityd.db"));
        if let Some(parent) = location.parent()
            && let Err(err) = std::fs::create_dir_all(parent)
        {
            warn!(path = %location.display(), error = %err, "cannot create datastore parent");
        }

        let store = Arc::new(KvStore::open(&location).map_err(HookError::new)?);
        session
            .add_service("kvstore", store.clone())
            .map_err(HookError::new)?;
        *self.store.lock() = Some(store);
        info!(path = %location.display(), "persistence enabled");
        Ok(())
    }
}

#[async_trait]
impl SessionFinishHook for KvStorePlugin {
    async fn session_finish(&self, _session: &Arc<Session>) -> HookResult<()> {
        if let Some(store) = self.store.lock().take()
            && let Err(err) = store.flush()
        {
            warn!(error = %err, "datastore flush failed at shutdown");
        }
        Ok(())
    }
}

impl Plugin for KvStorePlugin {
    fn name(&self) -> &str {
        "entityd.kvstore"
    }

    fn hooks(self: Arc<Self>) -> Vec<HookBinding> {
        vec![
            HookBinding::new(HookPoint::AddOptions(self.clone())),
            HookBinding::new(HookPoint::SessionStart(self.clone())),
            HookBinding::new(HookPoint::SessionFinish(self.clone())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, KvStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(&dir.path().join("entityd.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn round_trips_opaque_values() {
        let (_dir, store) = store();
        assert_eq!(store.get("missing").unwrap(), None);

        store.add("metypes", b"\x91\xa4Host").unwrap();
        assert_eq!(store.get("metypes").unwrap().as_deref(), Some(&b"\x91\xa4Host"[..]));

        store.add("metypes", b"replaced").unwrap();
        assert_eq!(store.get("metypes").unwrap().as_deref(), Some(&b"replaced"[..]));

        store.delete("metypes").unwrap();
        assert_eq!(store.get("metypes").unwrap(), None);
        store.delete("metypes").unwrap();
    }

    #[test]
    fn prefix_operations() {
        let (_dir, store) = store();
        store
            .addmany([
                ("ueids/Host/aa".to_string(), b"aa".to_vec()),
                ("ueids/Host/bb".to_string(), b"bb".to_vec()),
                ("ueids/Process/cc".to_string(), b"cc".to_vec()),
            ])
            .unwrap();

        let hosts = store.getmany("ueids/Host/").unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts["ueids/Host/aa"], b"aa");

        store.deletemany("ueids/Host/").unwrap();
        assert!(store.getmany("ueids/Host/").unwrap().is_empty());
        assert_eq!(store.getmany("ueids/Process/").unwrap().len(), 1);
    }

    #[test]
    fn reopening_a_directory_reuses_the_datastore() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = KvStore::open(&dir.path().join("entityd.db")).unwrap();
            store.add("key", b"value").unwrap();
            store.flush().unwrap();
        }
        // Opening the directory itself lands on the entityd.db inside it.
        let store = KvStore::open(dir.path()).unwrap();
        assert_eq!(store.get("key").unwrap().as_deref(), Some(&b"value"[..]));
    }

    #[test]
    fn unwritable_location_is_a_distinguished_error() {
        let err = KvStore::open(Path::new("/proc/entityd-test/entityd.db")).unwrap_err();
        assert!(matches!(err, StoreError::Unwritable { .. }));
    }
}
