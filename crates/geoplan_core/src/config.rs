//! Store configuration supplied by the bootstrap layer.
//!
//! # Responsibility
//! - Name the storage target and startup synchronization behavior.
//! - Carry integrity tuning (hierarchy traversal bound).
//!
//! # Invariants
//! - `max_hierarchy_depth` is always at least 1 once validated.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_HIERARCHY_DEPTH: u32 = 1000;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Physical storage target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    /// SQLite database file, created when missing.
    File(PathBuf),
    /// Private in-memory database, discarded on close.
    Memory,
}

/// Options consumed by `Store::connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub target: DatabaseTarget,
    /// Apply additive DDL on connect. When disabled, connect fails on drift.
    pub sync_on_startup: bool,
    /// Also rebuild foreign keys whose `ON DELETE` action differs.
    pub alter_existing: bool,
    /// Upper bound on ancestor-chain walks.
    pub max_hierarchy_depth: u32,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::with_target(DatabaseTarget::File(path.into()))
    }

    pub fn in_memory() -> Self {
        Self::with_target(DatabaseTarget::Memory)
    }

    fn with_target(target: DatabaseTarget) -> Self {
        Self {
            target,
            sync_on_startup: true,
            alter_existing: false,
            max_hierarchy_depth: DEFAULT_MAX_HIERARCHY_DEPTH,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_sync_on_startup(mut self, enabled: bool) -> Self {
        self.sync_on_startup = enabled;
        self
    }

    pub fn with_alter_existing(mut self, enabled: bool) -> Self {
        self.alter_existing = enabled;
        self
    }

    pub fn with_max_hierarchy_depth(mut self, depth: u32) -> Self {
        self.max_hierarchy_depth = depth;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// - Returns a human-readable message for out-of-range values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_hierarchy_depth == 0 {
            return Err("max_hierarchy_depth must be at least 1".to_string());
        }
        if let DatabaseTarget::File(path) = &self.target {
            if path.as_os_str().is_empty() {
                return Err("database path cannot be empty".to_string());
            }
        }
        Ok(())
    }

    /// Short label for log lines.
    pub(crate) fn mode(&self) -> &'static str {
        match self.target {
            DatabaseTarget::File(_) => "file",
            DatabaseTarget::Memory => "memory",
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}
