//! Persistent domain model for the GeoPlan collaborative GIS and project
//! platform.
//! This crate is the single source of truth for the schema, its storage
//! synchronization and the integrity rules enforced on every write.

pub mod config;
pub mod db;
pub mod integrity;
pub mod logging;
pub mod repo;
pub mod schema;

pub use config::{DatabaseTarget, StoreConfig};
pub use db::sync::{SyncOptions, SyncPlan, SyncReport, SyncStep};
pub use db::{DbError, DbResult, Store, SyncError};
pub use integrity::ValidationError;
pub use logging::{default_log_level, init_logging, logging_status};
pub use repo::{
    attrs, Attrs, Conflict, EntityRepository, FieldValue, LinkRecord, LinkRepository, Record,
    RepoError, RepoResult, RowId, SqliteEntityRepository, SqliteLinkRepository,
};
pub use schema::{platform_schema, CascadePolicy, SchemaError, SchemaGraph};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
