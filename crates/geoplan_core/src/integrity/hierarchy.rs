//! Self-referential hierarchy checks.
//!
//! # Responsibility
//! - Reject parent assignments that would close a cycle.
//! - Bound every ancestor walk by the configured depth limit.
//! - Keep parent and child rows inside one scope when the edge declares one.
//!
//! # Invariants
//! - Walks terminate even when storage already holds a cycle.

use super::validate::ValidationError;
use crate::db::sync::quote_ident;
use crate::repo::value::RowId;
use crate::repo::{RepoError, RepoResult};
use crate::schema::entity::ID_COLUMN;
use crate::schema::relation::EdgeDef;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashSet;
use uuid::Uuid;

/// Fails unless `parent` may become the parent of `id`.
///
/// `id` need not exist yet (row creation).
pub(crate) fn ensure_acyclic(
    conn: &Connection,
    edge: &EdgeDef,
    id: RowId,
    parent: RowId,
    max_depth: u32,
) -> RepoResult<()> {
    let cyclic = || ValidationError::CyclicHierarchy {
        entity: edge.source.clone(),
        id,
        parent,
    };

    let mut seen = HashSet::new();
    let mut current = Some(parent);
    let mut depth = 0_u32;
    while let Some(node) = current {
        if node == id || !seen.insert(node) {
            return Err(cyclic().into());
        }
        depth += 1;
        if depth > max_depth {
            return Err(ValidationError::HierarchyTooDeep {
                entity: edge.source.clone(),
                id,
                max_depth,
            }
            .into());
        }
        current = parent_of(conn, edge, node)?;
    }
    Ok(())
}

/// Ancestor ids of `id`, nearest first.
///
/// A stored cycle fails with `CyclicHierarchy` naming the revisited row.
pub(crate) fn ancestor_ids(
    conn: &Connection,
    edge: &EdgeDef,
    id: RowId,
    max_depth: u32,
) -> RepoResult<Vec<RowId>> {
    let mut ancestors = Vec::new();
    let mut seen = HashSet::from([id]);
    let mut current = parent_of(conn, edge, id)?;
    while let Some(node) = current {
        if !seen.insert(node) {
            return Err(ValidationError::CyclicHierarchy {
                entity: edge.source.clone(),
                id,
                parent: node,
            }
            .into());
        }
        if ancestors.len() as u32 >= max_depth {
            return Err(ValidationError::HierarchyTooDeep {
                entity: edge.source.clone(),
                id,
                max_depth,
            }
            .into());
        }
        ancestors.push(node);
        current = parent_of(conn, edge, node)?;
    }
    Ok(ancestors)
}

/// Fails with `ScopeMismatch` unless `parent` carries `scope_value` in the
/// edge's scope column.
pub(crate) fn ensure_same_scope(
    conn: &Connection,
    edge: &EdgeDef,
    parent: RowId,
    scope_value: &Value,
) -> RepoResult<()> {
    let Some(scope) = edge.scope.as_deref() else {
        return Ok(());
    };
    let parent_scope: Option<Value> = conn
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE {} = ?1;",
                quote_ident(scope),
                quote_ident(&edge.source),
                quote_ident(ID_COLUMN)
            ),
            [parent.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    match parent_scope {
        Some(value) if &value == scope_value => Ok(()),
        _ => Err(ValidationError::ScopeMismatch {
            entity: edge.source.clone(),
            column: scope.to_string(),
        }
        .into()),
    }
}

/// Number of direct children of `id`.
pub(crate) fn child_count(conn: &Connection, edge: &EdgeDef, id: RowId) -> RepoResult<usize> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?1;",
            quote_ident(&edge.source),
            quote_ident(&edge.column)
        ),
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn parent_of(conn: &Connection, edge: &EdgeDef, id: RowId) -> RepoResult<Option<RowId>> {
    let parent: Option<Option<String>> = conn
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE {} = ?1;",
                quote_ident(&edge.column),
                quote_ident(&edge.source),
                quote_ident(ID_COLUMN)
            ),
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    match parent.flatten() {
        None => Ok(None),
        Some(text) => Uuid::parse_str(&text).map(Some).map_err(|_| {
            RepoError::InvalidData(format!(
                "{}.{} holds a non-uuid value",
                edge.source, edge.column
            ))
        }),
    }
}
