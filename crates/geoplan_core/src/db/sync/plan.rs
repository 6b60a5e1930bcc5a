//! Additive sync planning.
//!
//! # Responsibility
//! - Diff the declared graph against a live schema snapshot.
//! - Emit the ordered steps that bring storage up to the declared shape.
//!
//! # Invariants
//! - Planning never emits drops; undeclared tables and columns are ignored.
//! - Planning against an already-synchronized snapshot yields an empty plan.
//! - Steps for one table appear in the order create/add column/foreign key/
//!   unique index.

use super::live::LiveSchema;
use crate::schema::entity::EntityDef;
use crate::schema::graph::SchemaGraph;
use crate::schema::relation::CascadePolicy;
use log::warn;
use std::fmt::{Display, Formatter};

/// One DDL step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStep {
    CreateTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: String,
    },
    AddForeignKey {
        table: String,
        column: String,
        target: String,
        on_delete: CascadePolicy,
    },
    /// Only planned with `SyncOptions::alter_existing`.
    AlterForeignKey {
        table: String,
        column: String,
        target: String,
        current: String,
        on_delete: CascadePolicy,
    },
    AddUniqueIndex {
        table: String,
        column: String,
    },
}

impl SyncStep {
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { table }
            | Self::AddColumn { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::AlterForeignKey { table, .. }
            | Self::AddUniqueIndex { table, .. } => table,
        }
    }

    /// Stable step name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTable { .. } => "create_table",
            Self::AddColumn { .. } => "add_column",
            Self::AddForeignKey { .. } => "add_foreign_key",
            Self::AlterForeignKey { .. } => "alter_foreign_key",
            Self::AddUniqueIndex { .. } => "add_unique_index",
        }
    }
}

impl Display for SyncStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateTable { table } => write!(f, "create table {table}"),
            Self::AddColumn { table, column } => write!(f, "add column {table}.{column}"),
            Self::AddForeignKey {
                table,
                column,
                target,
                on_delete,
            } => write!(
                f,
                "add foreign key {table}.{column} -> {target} on delete {on_delete}"
            ),
            Self::AlterForeignKey {
                table,
                column,
                target,
                current,
                on_delete,
            } => write!(
                f,
                "alter foreign key {table}.{column} -> {target} on delete {current} => {on_delete}"
            ),
            Self::AddUniqueIndex { table, column } => {
                write!(f, "add unique index {table}.{column}")
            }
        }
    }
}

/// Planning switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Plan `AlterForeignKey` for keys whose `ON DELETE` action differs.
    pub alter_existing: bool,
}

/// Ordered list of steps produced by `sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    steps: Vec<SyncStep>,
}

impl SyncPlan {
    pub fn from_steps(steps: Vec<SyncStep>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn steps(&self) -> &[SyncStep] {
        &self.steps
    }
}

impl Display for SyncPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "schema is up to date");
        }
        for (index, step) in self.steps.iter().enumerate() {
            writeln!(f, "{:>3}. {step}", index + 1)?;
        }
        Ok(())
    }
}

/// Plans additive DDL with default options.
pub fn sync(graph: &SchemaGraph, live: &LiveSchema) -> SyncPlan {
    sync_with(graph, live, SyncOptions::default())
}

/// Plans additive DDL bringing `live` to the shape declared by `graph`.
pub fn sync_with(graph: &SchemaGraph, live: &LiveSchema, options: SyncOptions) -> SyncPlan {
    let mut steps = Vec::new();
    for entity in graph.entities() {
        plan_entity(graph, live, entity, options, &mut steps);
    }
    SyncPlan { steps }
}

fn plan_entity(
    graph: &SchemaGraph,
    live: &LiveSchema,
    entity: &EntityDef,
    options: SyncOptions,
    steps: &mut Vec<SyncStep>,
) {
    let Some(table) = live.table(&entity.name) else {
        steps.push(SyncStep::CreateTable {
            table: entity.name.clone(),
        });
        return;
    };

    for column in &entity.columns {
        if !table.has_column(&column.name) {
            steps.push(SyncStep::AddColumn {
                table: entity.name.clone(),
                column: column.name.clone(),
            });
        }
    }

    for edge in graph.foreign_keys(&entity.name) {
        // Columns added above carry their reference inline.
        if !table.has_column(&edge.column) {
            continue;
        }
        match table.foreign_key(&edge.column, &edge.target) {
            None => steps.push(SyncStep::AddForeignKey {
                table: entity.name.clone(),
                column: edge.column.clone(),
                target: edge.target.clone(),
                on_delete: edge.on_delete,
            }),
            Some(live_fk) => {
                if CascadePolicy::from_sql_action(&live_fk.on_delete) == Some(edge.on_delete) {
                    continue;
                }
                if options.alter_existing {
                    steps.push(SyncStep::AlterForeignKey {
                        table: entity.name.clone(),
                        column: edge.column.clone(),
                        target: edge.target.clone(),
                        current: live_fk.on_delete.clone(),
                        on_delete: edge.on_delete,
                    });
                } else {
                    warn!(
                        "event=schema_sync_plan module=db status=skipped reason=on_delete_mismatch table={} column={} live={} declared={}",
                        entity.name, edge.column, live_fk.on_delete, edge.on_delete
                    );
                }
            }
        }
    }

    for column in entity.columns.iter().filter(|column| column.unique) {
        if !table.unique_columns.contains(&column.name) {
            steps.push(SyncStep::AddUniqueIndex {
                table: entity.name.clone(),
                column: column.name.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{sync, sync_with, SyncOptions, SyncStep};
    use crate::db::sync::live::LiveSchema;
    use crate::schema::entity::{ColumnDef, ColumnType, EntityDef};
    use crate::schema::graph::SchemaGraph;
    use crate::schema::relation::{belongs_to, CascadePolicy};
    use rusqlite::Connection;

    fn graph() -> SchemaGraph {
        SchemaGraph::build(
            vec![
                EntityDef::generated("project")
                    .column(ColumnDef::required("name", ColumnType::text(100)).unique()),
                EntityDef::generated("task")
                    .column(ColumnDef::required("project_id", ColumnType::Id))
                    .column(ColumnDef::optional("title", ColumnType::text(100))),
            ],
            belongs_to("task", "project_id", "project", CascadePolicy::Cascade).to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn empty_storage_plans_create_table_per_entity() {
        let plan = sync(&graph(), &LiveSchema::default());
        assert_eq!(
            plan.steps(),
            &[
                SyncStep::CreateTable {
                    table: "project".to_string()
                },
                SyncStep::CreateTable {
                    table: "task".to_string()
                },
            ]
        );
    }

    #[test]
    fn existing_tables_get_missing_columns_keys_and_indexes_only() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE project (id TEXT PRIMARY KEY, created_at INTEGER, updated_at INTEGER, name TEXT, legacy TEXT);
             CREATE TABLE task (id TEXT PRIMARY KEY, created_at INTEGER, updated_at INTEGER, project_id TEXT);",
        )
        .unwrap();
        let live = LiveSchema::introspect(&conn).unwrap();

        let plan = sync(&graph(), &live);
        assert_eq!(
            plan.steps(),
            &[
                SyncStep::AddUniqueIndex {
                    table: "project".to_string(),
                    column: "name".to_string()
                },
                SyncStep::AddColumn {
                    table: "task".to_string(),
                    column: "title".to_string()
                },
                SyncStep::AddForeignKey {
                    table: "task".to_string(),
                    column: "project_id".to_string(),
                    target: "project".to_string(),
                    on_delete: CascadePolicy::Cascade
                },
            ]
        );
    }

    #[test]
    fn mismatched_on_delete_is_altered_only_when_enabled() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE project (id TEXT PRIMARY KEY, created_at INTEGER, updated_at INTEGER, name TEXT UNIQUE);
             CREATE TABLE task (
                id TEXT PRIMARY KEY, created_at INTEGER, updated_at INTEGER, title TEXT,
                project_id TEXT REFERENCES project (id) ON DELETE RESTRICT
             );",
        )
        .unwrap();
        let live = LiveSchema::introspect(&conn).unwrap();

        assert!(sync(&graph(), &live).is_empty());

        let plan = sync_with(&graph(), &live, SyncOptions { alter_existing: true });
        assert_eq!(plan.len(), 1);
        assert!(matches!(
            &plan.steps()[0],
            SyncStep::AlterForeignKey { current, on_delete: CascadePolicy::Cascade, .. }
                if current == "RESTRICT"
        ));
    }
}
