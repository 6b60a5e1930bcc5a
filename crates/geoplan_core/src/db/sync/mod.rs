//! Schema synchronizer: live introspection, additive planning and
//! transactional application.
//!
//! # Responsibility
//! - Reconcile physical storage with the declared `SchemaGraph` without
//!   hand-written migration scripts.
//!
//! # Invariants
//! - Synchronization is additive: no table or column is ever dropped.
//! - Running `sync` against freshly synchronized storage yields an empty plan.

mod apply;
mod ddl;
pub mod live;
mod plan;

pub use apply::{apply, SyncReport};
pub use live::{LiveColumn, LiveForeignKey, LiveSchema, LiveTable};
pub use plan::{sync, sync_with, SyncOptions, SyncPlan, SyncStep};

pub(crate) use ddl::quote_ident;

use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SyncResult<T> = Result<T, SyncError>;

/// DDL introspection or application failure. Fatal during startup.
#[derive(Debug)]
pub enum SyncError {
    /// Reading the live schema failed.
    Introspect(rusqlite::Error),
    /// Plan names a table the graph does not declare.
    UnknownEntity(String),
    /// Step `index` failed; the whole plan was rolled back.
    PartialApply {
        index: usize,
        step: SyncStep,
        source: rusqlite::Error,
    },
    /// Rows reference missing parents after rebuilding tables.
    ForeignKeyViolation {
        table: String,
        parent: String,
        rows: usize,
    },
    /// Opening, committing or restoring connection state failed.
    Transaction(rusqlite::Error),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Introspect(err) => write!(f, "schema introspection failed: {err}"),
            Self::UnknownEntity(table) => write!(f, "sync plan names undeclared table `{table}`"),
            Self::PartialApply {
                index,
                step,
                source,
            } => write!(f, "sync step {index} ({step}) failed: {source}"),
            Self::ForeignKeyViolation {
                table,
                parent,
                rows,
            } => write!(
                f,
                "{rows} row(s) violate foreign keys after sync (first: {table} -> {parent})"
            ),
            Self::Transaction(err) => write!(f, "sync transaction failed: {err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Introspect(err) | Self::Transaction(err) => Some(err),
            Self::PartialApply { source, .. } => Some(source),
            Self::UnknownEntity(_) | Self::ForeignKeyViolation { .. } => None,
        }
    }
}
