//! Storage handle lifecycle.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections with required pragmas.
//! - Reconcile storage with the declared schema before handing out a `Store`.
//! - Hand out entity and link repositories bound to the store's connection.
//!
//! # Invariants
//! - Returned stores run with `foreign_keys=ON`.
//! - Returned stores have an empty sync plan against their schema graph.
//! - A `Store` owns exactly one connection; share the schema graph, not the
//!   store, across threads.
//!
//! # See also
//! - `db::sync` for the planning and apply rules.

use super::sync::{apply, sync_with, LiveSchema, SyncOptions, SyncPlan, SyncReport};
use super::{DbError, DbResult};
use crate::config::{DatabaseTarget, StoreConfig};
use crate::repo::{RepoResult, SqliteEntityRepository, SqliteLinkRepository};
use crate::schema::catalog::platform_schema;
use crate::schema::graph::SchemaGraph;
use log::{error, info};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Instant;

/// Opens a connection for `config` and applies connection pragmas only.
///
/// No schema work happens here; see `Store::connect`.
pub fn open_connection(config: &StoreConfig) -> DbResult<Connection> {
    config.validate().map_err(DbError::InvalidConfig)?;

    let conn = match &config.target {
        DatabaseTarget::File(path) => Connection::open(path)?,
        DatabaseTarget::Memory => Connection::open_in_memory()?,
    };
    conn.busy_timeout(config.busy_timeout)?;
    if matches!(config.target, DatabaseTarget::File(_)) {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Open, schema-reconciled storage handle.
pub struct Store {
    conn: Connection,
    graph: Arc<SchemaGraph>,
    max_hierarchy_depth: u32,
    mode: &'static str,
}

impl Store {
    /// Connects with the platform schema.
    ///
    /// # Side effects
    /// - Applies additive DDL when `sync_on_startup` is set.
    /// - Emits `store_connect` logging events with duration and status.
    ///
    /// # Errors
    /// - `SchemaDrift` when sync is disabled and storage is behind.
    /// - `Sync` when applying the plan fails; nothing is committed.
    pub fn connect(config: &StoreConfig) -> DbResult<Self> {
        Self::connect_with_schema(config, platform_schema()?)
    }

    /// Connects with a caller-declared schema graph.
    pub fn connect_with_schema(config: &StoreConfig, graph: SchemaGraph) -> DbResult<Self> {
        Self::connect_shared(config, Arc::new(graph))
    }

    /// Connects reusing a graph already shared with other stores.
    pub fn connect_shared(config: &StoreConfig, graph: Arc<SchemaGraph>) -> DbResult<Self> {
        let started_at = Instant::now();
        let mode = config.mode();
        info!("event=store_connect module=db status=start mode={mode}");

        match Self::bootstrap(config, graph) {
            Ok((store, report)) => {
                info!(
                    "event=store_connect module=db status=ok mode={} applied={} skipped={} duration_ms={}",
                    mode,
                    report.applied,
                    report.skipped,
                    started_at.elapsed().as_millis()
                );
                Ok(store)
            }
            Err(err) => {
                error!(
                    "event=store_connect module=db status=error mode={} duration_ms={} error_code={} error={}",
                    mode,
                    started_at.elapsed().as_millis(),
                    connect_error_code(&err),
                    err
                );
                Err(err)
            }
        }
    }

    /// Private in-memory store with the platform schema.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::connect(&StoreConfig::in_memory())
    }

    fn bootstrap(config: &StoreConfig, graph: Arc<SchemaGraph>) -> DbResult<(Self, SyncReport)> {
        let mut conn = open_connection(config)?;
        let plan = plan_for(&conn, &graph, config.alter_existing)?;

        let report = if plan.is_empty() {
            SyncReport::default()
        } else if config.sync_on_startup {
            apply(&mut conn, &graph, &plan)?
        } else {
            return Err(DbError::SchemaDrift {
                pending_steps: plan.len(),
                first_step: plan.steps()[0].to_string(),
            });
        };

        let store = Self {
            conn,
            graph,
            max_hierarchy_depth: config.max_hierarchy_depth,
            mode: config.mode(),
        };
        Ok((store, report))
    }

    pub fn schema(&self) -> &SchemaGraph {
        &self.graph
    }

    pub fn shared_schema(&self) -> Arc<SchemaGraph> {
        Arc::clone(&self.graph)
    }

    /// Raw connection for read-only diagnostics.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Plans the steps still needed to match the schema graph.
    pub fn pending_plan(&self, alter_existing: bool) -> DbResult<SyncPlan> {
        plan_for(&self.conn, &self.graph, alter_existing)
    }

    /// Repository over the generated-id entity `name`.
    pub fn entity(&self, name: &str) -> RepoResult<SqliteEntityRepository<'_>> {
        SqliteEntityRepository::new(&self.conn, &self.graph, name, self.max_hierarchy_depth)
    }

    /// Repository over the associative entity `name`.
    pub fn links(&self, name: &str) -> RepoResult<SqliteLinkRepository<'_>> {
        SqliteLinkRepository::new(&self.conn, &self.graph, name)
    }

    /// Closes the connection, reporting close failures.
    pub fn close(self) -> DbResult<()> {
        let mode = self.mode;
        match self.conn.close() {
            Ok(()) => {
                info!("event=store_close module=db status=ok mode={mode}");
                Ok(())
            }
            Err((_conn, err)) => {
                error!(
                    "event=store_close module=db status=error mode={} error_code=db_close_failed error={}",
                    mode, err
                );
                Err(err.into())
            }
        }
    }
}

fn plan_for(conn: &Connection, graph: &SchemaGraph, alter_existing: bool) -> DbResult<SyncPlan> {
    let live = LiveSchema::introspect(conn).map_err(super::sync::SyncError::Introspect)?;
    Ok(sync_with(graph, &live, SyncOptions { alter_existing }))
}

fn connect_error_code(err: &DbError) -> &'static str {
    match err {
        DbError::Sqlite(_) => "db_open_failed",
        DbError::InvalidConfig(_) => "invalid_config",
        DbError::Schema(_) => "invalid_schema",
        DbError::Sync(_) => "schema_sync_failed",
        DbError::SchemaDrift { .. } => "schema_drift",
    }
}

#[cfg(test)]
mod tests {
    use super::{open_connection, Store};
    use crate::config::StoreConfig;

    #[test]
    fn open_connection_enables_foreign_keys() {
        let conn = open_connection(&StoreConfig::in_memory()).unwrap();
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn in_memory_store_is_fully_synchronized() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.pending_plan(true).unwrap().is_empty());
        store.close().unwrap();
    }
}
