//! Liveness marker.
//!
//! The agent proves it is alive by touching a marker file once per
//! completed collection cycle. An external check consumes the marker:
//! [`Health::check`] reports whether it existed and removes it, so a check
//! that is not followed by a fresh heartbeat fails the next time round.
//! Only the agent writes the marker; checks only remove it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

/// The marker file, bound to a state directory.
#[derive(Debug, Clone)]
pub struct Health {
    path: PathBuf,
}

impl Health {
    /// Places the marker under the given state directory.
    pub fn new(statedir: &Path) -> Self {
        Health {
            path: statedir.join("healthy"),
        }
    }

    /// Places the marker under the platform state directory.
    pub fn from_platform_dirs() -> Self {
        Health::new(&crate::state_dir())
    }

    /// The marker path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks the agent as healthy. Safe to call repeatedly.
    pub fn heartbeat(&self) {
        if let Some(parent) = self.path.parent()
            && let Err(err) = fs::create_dir_all(parent)
        {
            warn!(path = %self.path.display(), error = %err, "cannot create state directory");
            return;
        }
        if let Err(err) = fs::write(&self.path, b"") {
            warn!(path = %self.path.display(), error = %err, "cannot write health marker");
        }
    }

    /// Marks the agent as dead. A missing marker is fine.
    pub fn die(&self) {
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %err, "cannot remove health marker");
        }
    }

    /// Consumes the marker: true if the agent was healthy.
    ///
    /// The marker is removed either way, so a check without an intervening
    /// heartbeat reports dead.
    pub fn check(&self) -> bool {
        let healthy = self.path.is_file();
        self.die();
        healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_consumes_the_marker() {
        let dir = tempfile::tempdir().unwrap();
        let health = Health::new(dir.path());

        assert!(!health.check());

        health.heartbeat();
        health.heartbeat();
        assert!(health.check());
        // No heartbeat since the last check.
        assert!(!health.check());
    }

    #[test]
    fn die_tolerates_a_missing_marker() {
        let dir = tempfile::tempdir().unwrap();
        let health = Health::new(dir.path());
        health.die();
        health.heartbeat();
        health.die();
        assert!(!health.check());
    }
}
