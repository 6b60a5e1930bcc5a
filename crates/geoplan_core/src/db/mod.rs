//! SQLite storage handle and schema synchronization entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections.
//! - Reconcile storage with the declared schema before any data access.
//!
//! # Invariants
//! - Every connection runs with `foreign_keys=ON` outside of sync.
//! - A `Store` is never handed out while its storage shape drifts from the
//!   declared schema.

use crate::schema::SchemaError;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;
pub mod sync;

pub use open::{open_connection, Store};
pub use sync::SyncError;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    InvalidConfig(String),
    Schema(SchemaError),
    Sync(SyncError),
    /// Synchronization is disabled and storage lacks declared structure.
    SchemaDrift {
        pending_steps: usize,
        first_step: String,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::InvalidConfig(message) => write!(f, "invalid store config: {message}"),
            Self::Schema(err) => write!(f, "invalid schema declaration: {err}"),
            Self::Sync(err) => write!(f, "{err}"),
            Self::SchemaDrift {
                pending_steps,
                first_step,
            } => write!(
                f,
                "storage is missing {pending_steps} declared schema change(s) and sync is disabled (first: {first_step})"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Schema(err) => Some(err),
            Self::Sync(err) => Some(err),
            Self::InvalidConfig(_) | Self::SchemaDrift { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<SchemaError> for DbError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<SyncError> for DbError {
    fn from(value: SyncError) -> Self {
        Self::Sync(value)
    }
}
