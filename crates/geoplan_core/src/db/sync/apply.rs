//! Transactional execution of a sync plan.
//!
//! # Responsibility
//! - Execute every step of a plan inside one SQLite transaction.
//! - Treat steps whose target shape already exists as successful no-ops.
//! - Rebuild tables whose foreign keys SQLite cannot alter in place.
//!
//! # Invariants
//! - Either every step commits or none does.
//! - `foreign_keys` is disabled only for the duration of the transaction and
//!   `foreign_key_check` must pass before commit.
//! - Not safe to run concurrently from several processes on one database.

use super::ddl::{add_column_sql, create_table_sql, quote_ident, unique_index_sql};
use super::live::introspect_table;
use super::plan::{SyncPlan, SyncStep};
use super::{SyncError, SyncResult};
use crate::schema::entity::EntityDef;
use crate::schema::graph::{SchemaGraph, RESERVED_PREFIX};
use crate::schema::relation::CascadePolicy;
use log::{debug, error, info};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Instant;

/// Counts of executed and no-op steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Applied,
    Skipped,
}

/// Applies `plan` as a single transaction.
///
/// # Errors
/// - `UnknownEntity` when a step names a table the graph does not declare.
/// - `PartialApply` naming the first failing step; nothing is committed.
/// - `ForeignKeyViolation` when rebuilt tables hold dangling references.
pub fn apply(conn: &mut Connection, graph: &SchemaGraph, plan: &SyncPlan) -> SyncResult<SyncReport> {
    if plan.is_empty() {
        return Ok(SyncReport::default());
    }

    let mut resolved = Vec::with_capacity(plan.len());
    for step in plan.steps() {
        let entity = graph
            .entity(step.table())
            .ok_or_else(|| SyncError::UnknownEntity(step.table().to_string()))?;
        resolved.push((step, entity));
    }

    let started_at = Instant::now();
    info!(
        "event=schema_sync_apply module=db status=start steps={}",
        plan.len()
    );

    conn.execute_batch("PRAGMA foreign_keys = OFF;")
        .map_err(SyncError::Transaction)?;
    let result = apply_in_transaction(conn, graph, &resolved);
    let restored = conn.execute_batch("PRAGMA foreign_keys = ON;");

    match (&result, &restored) {
        (Ok(report), Ok(())) => info!(
            "event=schema_sync_apply module=db status=ok applied={} skipped={} duration_ms={}",
            report.applied,
            report.skipped,
            started_at.elapsed().as_millis()
        ),
        (Err(err), _) => error!(
            "event=schema_sync_apply module=db status=error duration_ms={} error_code=sync_apply_failed error={}",
            started_at.elapsed().as_millis(),
            err
        ),
        (Ok(_), Err(err)) => error!(
            "event=schema_sync_apply module=db status=error duration_ms={} error_code=foreign_keys_restore_failed error={}",
            started_at.elapsed().as_millis(),
            err
        ),
    }

    let report = result?;
    restored.map_err(SyncError::Transaction)?;
    Ok(report)
}

fn apply_in_transaction(
    conn: &mut Connection,
    graph: &SchemaGraph,
    steps: &[(&SyncStep, &EntityDef)],
) -> SyncResult<SyncReport> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(SyncError::Transaction)?;

    let mut report = SyncReport::default();
    for (index, (step, entity)) in steps.iter().enumerate() {
        match apply_step(&tx, graph, step, entity) {
            Ok(StepOutcome::Applied) => {
                report.applied += 1;
                debug!(
                    "event=schema_sync_step module=db status=ok index={} kind={} table={}",
                    index,
                    step.kind(),
                    step.table()
                );
            }
            Ok(StepOutcome::Skipped) => {
                report.skipped += 1;
                debug!(
                    "event=schema_sync_step module=db status=skipped index={} kind={} table={}",
                    index,
                    step.kind(),
                    step.table()
                );
            }
            Err(source) => {
                error!(
                    "event=schema_sync_step module=db status=error index={} kind={} table={} error={}",
                    index,
                    step.kind(),
                    step.table(),
                    source
                );
                return Err(SyncError::PartialApply {
                    index,
                    step: (*step).clone(),
                    source,
                });
            }
        }
    }

    ensure_foreign_keys_hold(&tx)?;
    tx.commit().map_err(SyncError::Transaction)?;
    Ok(report)
}

fn apply_step(
    tx: &Transaction<'_>,
    graph: &SchemaGraph,
    step: &SyncStep,
    entity: &EntityDef,
) -> rusqlite::Result<StepOutcome> {
    match step {
        SyncStep::CreateTable { table } => {
            if table_exists(tx, table)? {
                return Ok(StepOutcome::Skipped);
            }
            tx.execute_batch(&create_table_sql(graph, entity, table, None))?;
            Ok(StepOutcome::Applied)
        }
        SyncStep::AddColumn { table, column } => {
            if introspect_table(tx, table)?.has_column(column) {
                return Ok(StepOutcome::Skipped);
            }
            let Some(def) = entity.find_column(column) else {
                return Err(rusqlite::Error::InvalidColumnName(column.clone()));
            };
            match tx.execute_batch(&add_column_sql(graph, entity, def)) {
                Ok(()) => Ok(StepOutcome::Applied),
                Err(err) if is_duplicate_column(&err) => Ok(StepOutcome::Skipped),
                Err(err) => Err(err),
            }
        }
        SyncStep::AddForeignKey {
            table,
            column,
            target,
            on_delete,
        }
        | SyncStep::AlterForeignKey {
            table,
            column,
            target,
            on_delete,
            ..
        } => {
            let live = introspect_table(tx, table)?;
            let matches = live
                .foreign_key(column, target)
                .and_then(|fk| CascadePolicy::from_sql_action(&fk.on_delete))
                == Some(*on_delete);
            if matches {
                return Ok(StepOutcome::Skipped);
            }
            rebuild_table(tx, graph, entity)?;
            Ok(StepOutcome::Applied)
        }
        SyncStep::AddUniqueIndex { table, column } => {
            if introspect_table(tx, table)?.unique_columns.contains(column) {
                return Ok(StepOutcome::Skipped);
            }
            tx.execute_batch(&unique_index_sql(table, column))?;
            Ok(StepOutcome::Applied)
        }
    }
}

/// Recreates `entity`'s table with its declared definition, keeping data,
/// undeclared columns and explicit indexes.
fn rebuild_table(
    tx: &Transaction<'_>,
    graph: &SchemaGraph,
    entity: &EntityDef,
) -> rusqlite::Result<()> {
    let table = entity.name.as_str();
    let temp = format!("{RESERVED_PREFIX}{table}");
    let live = introspect_table(tx, table)?;

    let shared: Vec<String> = live
        .columns
        .iter()
        .map(|column| quote_ident(&column.name))
        .collect();

    let mut stmt = tx.prepare(
        "SELECT sql
         FROM sqlite_master
         WHERE type = 'index'
           AND tbl_name = ?1
           AND sql IS NOT NULL;",
    )?;
    let index_sql = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_ident(&temp)))?;
    tx.execute_batch(&create_table_sql(graph, entity, &temp, Some(&live)))?;
    tx.execute_batch(&format!(
        "INSERT INTO {temp_q} ({columns}) SELECT {columns} FROM {table_q};
         DROP TABLE {table_q};
         ALTER TABLE {temp_q} RENAME TO {table_q};",
        temp_q = quote_ident(&temp),
        table_q = quote_ident(table),
        columns = shared.join(", "),
    ))?;
    for sql in index_sql {
        tx.execute_batch(&sql)?;
    }
    Ok(())
}

fn ensure_foreign_keys_hold(tx: &Transaction<'_>) -> SyncResult<()> {
    let mut stmt = tx
        .prepare("SELECT \"table\", parent FROM pragma_foreign_key_check();")
        .map_err(SyncError::Transaction)?;
    let violations = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(SyncError::Transaction)?;

    if let Some((table, parent)) = violations.first() {
        return Err(SyncError::ForeignKeyViolation {
            table: table.clone(),
            parent: parent.clone(),
            rows: violations.len(),
        });
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(_, Some(message)) if message.contains("duplicate column name"))
}

#[cfg(test)]
mod tests {
    use super::{apply, SyncReport};
    use crate::db::sync::live::LiveSchema;
    use crate::db::sync::plan::{sync, SyncPlan, SyncStep};
    use crate::db::sync::SyncError;
    use crate::schema::catalog::platform_schema;
    use rusqlite::Connection;

    #[test]
    fn create_table_on_existing_table_is_a_skipped_no_op() {
        let graph = platform_schema().unwrap();
        let mut conn = Connection::open_in_memory().unwrap();
        let plan = sync(&graph, &LiveSchema::introspect(&conn).unwrap());
        apply(&mut conn, &graph, &plan).unwrap();

        let replay = SyncPlan::from_steps(vec![SyncStep::CreateTable {
            table: "layer".to_string(),
        }]);
        let report = apply(&mut conn, &graph, &replay).unwrap();
        assert_eq!(report, SyncReport { applied: 0, skipped: 1 });
    }

    #[test]
    fn unknown_table_in_plan_is_rejected_before_any_ddl() {
        let graph = platform_schema().unwrap();
        let mut conn = Connection::open_in_memory().unwrap();
        let plan = SyncPlan::from_steps(vec![SyncStep::CreateTable {
            table: "nope".to_string(),
        }]);

        let err = apply(&mut conn, &graph, &plan).unwrap_err();
        assert!(matches!(err, SyncError::UnknownEntity(name) if name == "nope"));
    }
}
