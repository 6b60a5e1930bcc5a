//! Attribute validation against declared column constraints.
//!
//! # Responsibility
//! - Check caller attributes against column declarations before SQL runs.
//! - Verify referenced rows exist for every supplied foreign-key value.
//!
//! # Invariants
//! - Managed columns are never writable by callers.
//! - A nil identifier in a foreign-key column is a missing reference.
//! - Validation never mutates storage.

use crate::db::sync::quote_ident;
use crate::repo::value::{Attrs, FieldValue, RowId};
use crate::schema::entity::{ColumnDef, ColumnType, EntityDef, ID_COLUMN};
use crate::schema::graph::SchemaGraph;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Caller data violates a declared constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    UnknownColumn {
        entity: String,
        column: String,
    },
    /// Managed or key column supplied as a writable attribute.
    ReadOnlyColumn {
        entity: String,
        column: String,
    },
    MissingRequired {
        entity: String,
        column: String,
    },
    TypeMismatch {
        entity: String,
        column: String,
        expected: &'static str,
    },
    TooLong {
        entity: String,
        column: String,
        max: u32,
        actual: usize,
    },
    MalformedJson {
        entity: String,
        column: String,
        message: String,
    },
    MissingReference {
        entity: String,
        column: String,
        id: Option<RowId>,
    },
    CyclicHierarchy {
        entity: String,
        id: RowId,
        parent: RowId,
    },
    HierarchyTooDeep {
        entity: String,
        id: RowId,
        max_depth: u32,
    },
    /// Parent and child disagree on the hierarchy scope column.
    ScopeMismatch {
        entity: String,
        column: String,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownColumn { entity, column } => {
                write!(f, "unknown column `{column}` on {entity}")
            }
            Self::ReadOnlyColumn { entity, column } => {
                write!(f, "column `{entity}.{column}` is read-only")
            }
            Self::MissingRequired { entity, column } => {
                write!(f, "column `{entity}.{column}` is required")
            }
            Self::TypeMismatch {
                entity,
                column,
                expected,
            } => write!(f, "column `{entity}.{column}` expects a {expected} value"),
            Self::TooLong {
                entity,
                column,
                max,
                actual,
            } => write!(
                f,
                "column `{entity}.{column}` allows {max} characters, got {actual}"
            ),
            Self::MalformedJson {
                entity,
                column,
                message,
            } => write!(f, "column `{entity}.{column}` holds malformed JSON: {message}"),
            Self::MissingReference { entity, column, id } => match id {
                Some(id) => write!(f, "`{entity}.{column}` references missing row {id}"),
                None => write!(f, "`{entity}.{column}` references a missing row"),
            },
            Self::CyclicHierarchy { entity, id, parent } => write!(
                f,
                "making {parent} the parent of {entity} {id} would create a cycle"
            ),
            Self::HierarchyTooDeep {
                entity,
                id,
                max_depth,
            } => write!(
                f,
                "{entity} {id} would exceed the hierarchy depth limit of {max_depth}"
            ),
            Self::ScopeMismatch { entity, column } => write!(
                f,
                "{entity} parent and child rows must share `{column}`"
            ),
        }
    }
}

impl Error for ValidationError {}

/// Which columns a write may or must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// Full row: every required column must be present.
    Create,
    /// Partial row: absent columns keep their stored value.
    Patch,
    /// Associative payload: key columns come from the call itself.
    Payload,
}

/// Validates and normalizes caller attributes for `entity`.
///
/// Returns one `(column, value)` pair per supplied attribute, in column
/// declaration order, with values coerced to their stored representation.
/// A required foreign key that is absent or null is a missing reference.
pub(crate) fn normalize_attrs<'e>(
    graph: &SchemaGraph,
    entity: &'e EntityDef,
    attrs: &Attrs,
    mode: WriteMode,
) -> Result<Vec<(&'e ColumnDef, FieldValue)>, ValidationError> {
    let keys = entity.key_columns();
    for name in attrs.keys() {
        let column = entity
            .find_column(name)
            .ok_or_else(|| ValidationError::UnknownColumn {
                entity: entity.name.clone(),
                column: name.clone(),
            })?;
        let is_key = mode == WriteMode::Payload && keys.contains(&column.name.as_str());
        if column.managed || is_key {
            return Err(ValidationError::ReadOnlyColumn {
                entity: entity.name.clone(),
                column: name.clone(),
            });
        }
    }

    let mut normalized = Vec::with_capacity(attrs.len());
    for column in entity.writable_columns() {
        if mode == WriteMode::Payload && keys.contains(&column.name.as_str()) {
            continue;
        }
        match attrs.get(&column.name) {
            Some(value) if value.is_null() && !column.nullable => {
                return Err(missing_value(graph, entity, column));
            }
            Some(value) => {
                let value = check_value(&entity.name, column, value)?;
                normalized.push((column, value));
            }
            None if mode != WriteMode::Patch && !column.nullable => {
                return Err(missing_value(graph, entity, column));
            }
            None => {}
        }
    }
    Ok(normalized)
}

fn missing_value(graph: &SchemaGraph, entity: &EntityDef, column: &ColumnDef) -> ValidationError {
    if graph.foreign_key(&entity.name, &column.name).is_some() {
        ValidationError::MissingReference {
            entity: entity.name.clone(),
            column: column.name.clone(),
            id: None,
        }
    } else {
        ValidationError::MissingRequired {
            entity: entity.name.clone(),
            column: column.name.clone(),
        }
    }
}

/// Checks one value against its column declaration.
pub(crate) fn check_value(
    entity: &str,
    column: &ColumnDef,
    value: &FieldValue,
) -> Result<FieldValue, ValidationError> {
    let mismatch = || ValidationError::TypeMismatch {
        entity: entity.to_string(),
        column: column.name.clone(),
        expected: column.ty.label(),
    };

    if value.is_null() {
        if column.nullable {
            return Ok(FieldValue::Null);
        }
        return Err(ValidationError::MissingRequired {
            entity: entity.to_string(),
            column: column.name.clone(),
        });
    }

    match (column.ty, value) {
        (ColumnType::Id, FieldValue::Id(id)) => Ok(FieldValue::Id(*id)),
        (ColumnType::Id, FieldValue::Text(text)) => Uuid::parse_str(text)
            .map(FieldValue::Id)
            .map_err(|_| mismatch()),
        (ColumnType::Text { max_len }, FieldValue::Text(text)) => {
            if let Some(max) = max_len {
                let actual = text.chars().count();
                if actual > max as usize {
                    return Err(ValidationError::TooLong {
                        entity: entity.to_string(),
                        column: column.name.clone(),
                        max,
                        actual,
                    });
                }
            }
            Ok(value.clone())
        }
        (ColumnType::Integer | ColumnType::Timestamp, FieldValue::Integer(_)) => Ok(value.clone()),
        (ColumnType::Real, FieldValue::Real(_)) => Ok(value.clone()),
        (ColumnType::Real, FieldValue::Integer(number)) => Ok(FieldValue::Real(*number as f64)),
        (ColumnType::Boolean, FieldValue::Bool(_)) => Ok(value.clone()),
        (ColumnType::Json, FieldValue::Json(text)) => {
            serde_json::from_str::<serde_json::Value>(text).map_err(|err| {
                ValidationError::MalformedJson {
                    entity: entity.to_string(),
                    column: column.name.clone(),
                    message: err.to_string(),
                }
            })?;
            Ok(value.clone())
        }
        _ => Err(mismatch()),
    }
}

/// Fails with `MissingReference` unless every non-null foreign-key value in
/// `values` points at an existing row.
pub(crate) fn ensure_references(
    conn: &Connection,
    graph: &SchemaGraph,
    entity: &EntityDef,
    values: &[(&ColumnDef, FieldValue)],
) -> crate::repo::RepoResult<()> {
    for (column, value) in values {
        let Some(edge) = graph.foreign_key(&entity.name, &column.name) else {
            continue;
        };
        let FieldValue::Id(id) = value else {
            continue;
        };
        ensure_row_exists(conn, &entity.name, &column.name, &edge.target, *id)?;
    }
    Ok(())
}

/// Fails with `MissingReference` unless `target` holds a row with `id`.
pub(crate) fn ensure_row_exists(
    conn: &Connection,
    entity: &str,
    column: &str,
    target: &str,
    id: RowId,
) -> crate::repo::RepoResult<()> {
    let missing = || ValidationError::MissingReference {
        entity: entity.to_string(),
        column: column.to_string(),
        id: Some(id),
    };
    if id.is_nil() {
        return Err(missing().into());
    }
    if !row_exists(conn, target, id)? {
        return Err(missing().into());
    }
    Ok(())
}

pub(crate) fn row_exists(conn: &Connection, table: &str, id: RowId) -> rusqlite::Result<bool> {
    let exists: i64 = conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1);",
            quote_ident(table),
            quote_ident(ID_COLUMN)
        ),
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
