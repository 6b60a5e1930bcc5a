//! Delete propagation along declared cascade policies.
//!
//! # Responsibility
//! - Compute the full effect of deleting one row before touching storage.
//! - Apply `Cascade`, `SetNull` and `Restrict` exactly as declared per edge,
//!   independent of the `ON DELETE` actions present in storage.
//!
//! # Invariants
//! - Runs inside the caller's transaction; a `Restrict` conflict leaves
//!   storage untouched.
//! - Rows are deleted dependents-first, so engine-level foreign keys never
//!   observe a dangling reference. This holds across cascade paths: a
//!   planned row goes before every planned row it references.

use crate::db::sync::quote_ident;
use crate::repo::error::Conflict;
use crate::repo::value::RowId;
use crate::repo::{RepoError, RepoResult};
use crate::schema::entity::{ID_COLUMN, UPDATED_AT_COLUMN};
use crate::schema::graph::SchemaGraph;
use crate::schema::relation::{CascadePolicy, EdgeDef};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Row counts touched by one delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DeleteSummary {
    pub rows: usize,
    pub links: usize,
    pub nulled: usize,
}

#[derive(Default)]
struct DeletePlan<'g> {
    /// Post-order: dependents before the rows they reference.
    rows: Vec<(&'g str, RowId)>,
    visited: HashSet<(&'g str, RowId)>,
    links: Vec<(&'g EdgeDef, RowId)>,
    nulls: Vec<(&'g EdgeDef, RowId)>,
    restricted: Vec<(&'g EdgeDef, RowId)>,
}

/// Deletes `entity` row `id` and everything its cascade edges reach.
///
/// # Errors
/// - `Conflict::Restricted` when a `Restrict` edge still has dependents
///   outside the delete set.
pub(crate) fn delete_cascading(
    conn: &Connection,
    graph: &SchemaGraph,
    entity: &str,
    id: RowId,
    now_ms: i64,
) -> RepoResult<DeleteSummary> {
    let Some(def) = graph.entity(entity) else {
        return Err(RepoError::UnknownEntity(entity.to_string()));
    };
    let mut plan = DeletePlan::default();
    collect(conn, graph, &def.name, id, &mut plan)?;
    ensure_unrestricted(conn, graph, &plan)?;
    let rows = deletion_order(conn, graph, &plan.rows)?;

    let mut summary = DeleteSummary::default();
    for (edge, target) in &plan.nulls {
        let owner_is_generated = graph
            .entity(&edge.source)
            .is_some_and(|owner| !owner.is_associative());
        let table = quote_ident(&edge.source);
        let column = quote_ident(&edge.column);
        summary.nulled += if owner_is_generated {
            conn.execute(
                &format!(
                    "UPDATE {table} SET {column} = NULL, {} = ?2 WHERE {column} = ?1;",
                    quote_ident(UPDATED_AT_COLUMN)
                ),
                rusqlite::params![target.to_string(), now_ms],
            )?
        } else {
            conn.execute(
                &format!("UPDATE {table} SET {column} = NULL WHERE {column} = ?1;"),
                [target.to_string()],
            )?
        };
    }
    for (edge, target) in &plan.links {
        summary.links += conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1;",
                quote_ident(&edge.source),
                quote_ident(&edge.column)
            ),
            [target.to_string()],
        )?;
    }
    for (table, row) in &rows {
        summary.rows += conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1;",
                quote_ident(table),
                quote_ident(ID_COLUMN)
            ),
            [row.to_string()],
        )?;
    }
    Ok(summary)
}

fn collect<'g>(
    conn: &Connection,
    graph: &'g SchemaGraph,
    entity: &'g str,
    id: RowId,
    plan: &mut DeletePlan<'g>,
) -> RepoResult<()> {
    if !plan.visited.insert((entity, id)) {
        return Ok(());
    }

    for edge in graph.dependents(entity) {
        match edge.on_delete {
            CascadePolicy::Restrict => plan.restricted.push((edge, id)),
            CascadePolicy::SetNull => plan.nulls.push((edge, id)),
            CascadePolicy::Cascade => {
                let owner_is_associative = graph
                    .entity(&edge.source)
                    .is_some_and(|owner| owner.is_associative());
                if owner_is_associative {
                    plan.links.push((edge, id));
                    continue;
                }
                for child in referencing_ids(conn, edge, id)? {
                    collect(conn, graph, &edge.source, child, plan)?;
                }
            }
        }
    }

    plan.rows.push((entity, id));
    Ok(())
}

fn ensure_unrestricted(conn: &Connection, graph: &SchemaGraph, plan: &DeletePlan<'_>) -> RepoResult<()> {
    for (edge, target) in &plan.restricted {
        let owner_is_associative = graph
            .entity(&edge.source)
            .is_some_and(|owner| owner.is_associative());
        let blocking = if owner_is_associative {
            count_links(conn, edge, *target)?
        } else {
            referencing_ids(conn, edge, *target)?
                .into_iter()
                .filter(|row| !plan.visited.contains(&(edge.source.as_str(), *row)))
                .count()
        };
        if blocking > 0 {
            return Err(Conflict::Restricted {
                entity: edge.target.clone(),
                id: *target,
                dependent: edge.source.clone(),
                column: edge.column.clone(),
                rows: blocking,
            }
            .into());
        }
    }
    Ok(())
}

/// Orders `rows` so each row precedes the planned rows it references.
///
/// Keeps the collected post-order wherever references allow it.
fn deletion_order<'g>(
    conn: &Connection,
    graph: &'g SchemaGraph,
    rows: &[(&'g str, RowId)],
) -> RepoResult<Vec<(&'g str, RowId)>> {
    let position: HashMap<(&str, RowId), usize> = rows
        .iter()
        .enumerate()
        .map(|(index, row)| (*row, index))
        .collect();
    let mut referrers = vec![Vec::new(); rows.len()];
    for (index, &(entity, id)) in rows.iter().enumerate() {
        for edge in graph.foreign_keys(entity) {
            let Some(target) = reference_of(conn, edge, id)? else {
                continue;
            };
            match position.get(&(edge.target.as_str(), target)) {
                Some(&referenced) if referenced != index => referrers[referenced].push(index),
                _ => {}
            }
        }
    }

    let mut done = vec![false; rows.len()];
    let mut ordered = Vec::with_capacity(rows.len());
    for index in 0..rows.len() {
        place(index, &referrers, &mut done, rows, &mut ordered);
    }
    Ok(ordered)
}

fn place<'g>(
    index: usize,
    referrers: &[Vec<usize>],
    done: &mut [bool],
    rows: &[(&'g str, RowId)],
    ordered: &mut Vec<(&'g str, RowId)>,
) {
    if done[index] {
        return;
    }
    // Marked on entry; a stored reference cycle stops here.
    done[index] = true;
    for &referrer in &referrers[index] {
        place(referrer, referrers, done, rows, ordered);
    }
    ordered.push(rows[index]);
}

fn referencing_ids(conn: &Connection, edge: &EdgeDef, target: RowId) -> RepoResult<Vec<RowId>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} WHERE {} = ?1;",
        quote_ident(ID_COLUMN),
        quote_ident(&edge.source),
        quote_ident(&edge.column)
    ))?;
    let raw = stmt
        .query_map([target.to_string()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    raw.into_iter()
        .map(|text| {
            Uuid::parse_str(&text).map_err(|_| {
                RepoError::InvalidData(format!("{}.id holds a non-uuid value", edge.source))
            })
        })
        .collect()
}

fn reference_of(conn: &Connection, edge: &EdgeDef, id: RowId) -> RepoResult<Option<RowId>> {
    let raw: Option<String> = conn.query_row(
        &format!(
            "SELECT {} FROM {} WHERE {} = ?1;",
            quote_ident(&edge.column),
            quote_ident(&edge.source),
            quote_ident(ID_COLUMN)
        ),
        [id.to_string()],
        |row| row.get(0),
    )?;
    raw.map(|text| {
        Uuid::parse_str(&text).map_err(|_| {
            RepoError::InvalidData(format!("{}.{} holds a non-uuid value", edge.source, edge.column))
        })
    })
    .transpose()
}

fn count_links(conn: &Connection, edge: &EdgeDef, target: RowId) -> RepoResult<usize> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?1;",
            quote_ident(&edge.source),
            quote_ident(&edge.column)
        ),
        [target.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::delete_cascading;
    use crate::config::StoreConfig;
    use crate::db::Store;
    use crate::repo::error::Conflict;
    use crate::repo::value::attrs;
    use crate::repo::{EntityRepository, RepoError};
    use crate::schema::entity::{ColumnDef, ColumnType, EntityDef};
    use crate::schema::graph::SchemaGraph;
    use crate::schema::relation::{belongs_to, CascadePolicy};

    /// `c` reaches `a` directly and through `b`, which guards `c` with `Restrict`.
    fn diamond() -> SchemaGraph {
        let entities = vec![
            EntityDef::generated("a").column(ColumnDef::required("name", ColumnType::text(20))),
            EntityDef::generated("b").column(ColumnDef::required("a_id", ColumnType::Id)),
            EntityDef::generated("c")
                .column(ColumnDef::required("a_id", ColumnType::Id))
                .column(ColumnDef::required("b_id", ColumnType::Id)),
        ];
        let edges = [
            belongs_to("b", "a_id", "a", CascadePolicy::Cascade),
            belongs_to("c", "a_id", "a", CascadePolicy::Cascade),
            belongs_to("c", "b_id", "b", CascadePolicy::Restrict),
        ]
        .into_iter()
        .flatten()
        .collect();
        SchemaGraph::build(entities, edges).expect("graph should build")
    }

    fn count(store: &Store, table: &str) -> i64 {
        store
            .connection()
            .query_row(&format!("SELECT COUNT(*) FROM \"{table}\";"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn rows_reached_on_several_paths_are_deleted_referrers_first() {
        let store = Store::connect_with_schema(&StoreConfig::in_memory(), diamond()).unwrap();
        let a = store.entity("a").unwrap().create(&attrs([("name", "root")])).unwrap();
        let b = store.entity("b").unwrap().create(&attrs([("a_id", a)])).unwrap();
        store
            .entity("c")
            .unwrap()
            .create(&attrs([("a_id", a), ("b_id", b)]))
            .unwrap();

        let summary = delete_cascading(store.connection(), store.schema(), "a", a, 0).unwrap();
        assert_eq!(summary.rows, 3);
        for table in ["a", "b", "c"] {
            assert_eq!(count(&store, table), 0, "{table} should be empty");
        }
    }

    #[test]
    fn restrict_still_guards_rows_outside_the_delete_set() {
        let store = Store::connect_with_schema(&StoreConfig::in_memory(), diamond()).unwrap();
        let first = store.entity("a").unwrap().create(&attrs([("name", "one")])).unwrap();
        let second = store.entity("a").unwrap().create(&attrs([("name", "two")])).unwrap();
        let b = store.entity("b").unwrap().create(&attrs([("a_id", first)])).unwrap();
        store
            .entity("c")
            .unwrap()
            .create(&attrs([("a_id", second), ("b_id", b)]))
            .unwrap();

        let err = store.entity("a").unwrap().delete(first).unwrap_err();
        assert!(matches!(
            err,
            RepoError::Conflict(Conflict::Restricted { ref dependent, rows: 1, .. }) if dependent == "c"
        ));
        assert_eq!(count(&store, "b"), 1);
    }
}
