//! Repository error model.
//!
//! # Invariants
//! - Constraint failures reported by SQLite are mapped to `Conflict` so
//!   callers never branch on engine message text.

use super::value::RowId;
use crate::db::DbError;
use crate::integrity::ValidationError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Write rejected because of existing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Delete blocked by a `Restrict` edge.
    Restricted {
        entity: String,
        id: RowId,
        dependent: String,
        column: String,
        rows: usize,
    },
    /// Value already taken in a unique column.
    Unique { entity: String, column: String },
    /// SQLite rejected a write on a foreign-key constraint.
    ForeignKey { entity: String },
}

impl Display for Conflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restricted {
                entity,
                id,
                dependent,
                column,
                rows,
            } => write!(
                f,
                "{entity} {id} is still referenced by {rows} {dependent} row(s) through `{column}`"
            ),
            Self::Unique { entity, column } => {
                write!(f, "{entity}.{column} must be unique")
            }
            Self::ForeignKey { entity } => {
                write!(f, "foreign key constraint failed on {entity}")
            }
        }
    }
}

#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Conflict(Conflict),
    NotFound { entity: String, key: String },
    UnknownEntity(String),
    /// Generated-id repository requested for an associative entity or
    /// the other way round.
    WrongShape {
        entity: String,
        expected: &'static str,
    },
    /// Column is not a declared relation of the entity.
    UnknownRelation { entity: String, column: String },
    /// Entity has no self-referential parent edge.
    NotHierarchical(String),
    Db(DbError),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Conflict(conflict) => write!(f, "conflict: {conflict}"),
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::UnknownEntity(name) => write!(f, "unknown entity `{name}`"),
            Self::WrongShape { entity, expected } => {
                write!(f, "entity `{entity}` is not {expected}")
            }
            Self::UnknownRelation { entity, column } => {
                write!(f, "`{entity}.{column}` is not a declared relation")
            }
            Self::NotHierarchical(entity) => write!(f, "entity `{entity}` has no parent edge"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Conflict(_)
            | Self::NotFound { .. }
            | Self::UnknownEntity(_)
            | Self::WrongShape { .. }
            | Self::UnknownRelation { .. }
            | Self::NotHierarchical(_)
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<Conflict> for RepoError {
    fn from(value: Conflict) -> Self {
        Self::Conflict(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Maps SQLite constraint failures raised while writing `entity`.
pub(crate) fn map_write_error(entity: &str, err: rusqlite::Error) -> RepoError {
    let rusqlite::Error::SqliteFailure(failure, message) = &err else {
        return err.into();
    };
    match failure.extended_code {
        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
            let column = message
                .as_deref()
                .and_then(unique_column_from_message)
                .unwrap_or_default();
            RepoError::Conflict(Conflict::Unique {
                entity: entity.to_string(),
                column,
            })
        }
        rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => RepoError::Conflict(Conflict::ForeignKey {
            entity: entity.to_string(),
        }),
        _ => err.into(),
    }
}

/// `UNIQUE constraint failed: person.email` -> `email`.
fn unique_column_from_message(message: &str) -> Option<String> {
    let (_, columns) = message.split_once("failed: ")?;
    let first = columns.split(',').next()?.trim();
    let (_, column) = first.split_once('.')?;
    Some(column.to_string())
}
