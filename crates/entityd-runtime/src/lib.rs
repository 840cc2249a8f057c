//! # entityd-runtime
//!
//! Runtime orchestration for the entityd agent: the builtin plugins and
//! the process bootstrap that wires them together.
//!
//! - [`bootstrap::run`] — the process entry point: logging, builtin
//!   registration (with `--disable` filtering), the hook phases and the
//!   exit code.
//! - [`CorePlugin`] — command-line assembly/parsing and the 60-second
//!   collection loop.
//! - [`KvStore`] / [`KvStorePlugin`] — durable key-value persistence,
//!   published as the `kvstore` service.
//! - [`Monitor`] / [`MonitorPlugin`] — the collection cycle, liveness
//!   tracking and tombstone synthesis, published as the `monitor` service.
//! - [`Health`] — the liveness marker file consumed by `entityd-health`.

use std::path::PathBuf;

pub mod bootstrap;
mod core;
mod health;
mod kvstore;
mod logging;
mod monitor;

pub use self::core::{CYCLE_PERIOD, CorePlugin};
pub use health::Health;
pub use kvstore::{KvStore, KvStorePlugin, StoreError};
pub use logging::{LoggingBuilder, numeric_level};
pub use monitor::{Monitor, MonitorPlugin};

/// The agent's state directory: platform state dir (falling back to local
/// data), plus an `entityd` segment.
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("entityd")
}
