//! SQLite DDL rendering for declared entities.
//!
//! # Invariants
//! - Every identifier is double-quoted (`group` is a keyword).
//! - JSON columns carry a `json_valid` check; storage stays plain TEXT.
//! - Foreign keys mirror the declared cascade policy.

use super::live::{LiveColumn, LiveTable};
use crate::schema::entity::{ColumnDef, ColumnType, EntityDef, PrimaryKey, ID_COLUMN};
use crate::schema::graph::SchemaGraph;
use crate::schema::relation::EdgeDef;

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Renders `CREATE TABLE IF NOT EXISTS` for `entity` under `table_name`.
///
/// When rebuilding, `live` is the table being replaced: its undeclared
/// columns are kept and declared columns it stores as nullable stay nullable.
pub(crate) fn create_table_sql(
    graph: &SchemaGraph,
    entity: &EntityDef,
    table_name: &str,
    live: Option<&LiveTable>,
) -> String {
    let mut lines: Vec<String> = entity
        .columns
        .iter()
        .map(|column| {
            let stored_nullable = live
                .and_then(|table| table.columns.iter().find(|c| c.name == column.name))
                .is_some_and(|c| !c.not_null && !c.primary_key);
            column_definition(entity, column, !column.nullable && !stored_nullable, true)
        })
        .collect();

    if let Some(table) = live {
        for extra in table
            .columns
            .iter()
            .filter(|column| entity.find_column(&column.name).is_none())
        {
            lines.push(live_column_definition(extra));
        }
    }

    if let PrimaryKey::Composite { left, right } = &entity.primary_key {
        lines.push(format!(
            "PRIMARY KEY ({}, {})",
            quote_ident(left),
            quote_ident(right)
        ));
    }

    for edge in graph.foreign_keys(&entity.name) {
        lines.push(format!(
            "FOREIGN KEY ({}) {}",
            quote_ident(&edge.column),
            references_clause(edge)
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        quote_ident(table_name),
        lines.join(",\n    ")
    )
}

/// Renders `ALTER TABLE ... ADD COLUMN`, inlining the column's foreign key.
///
/// SQLite rejects `UNIQUE` here; uniqueness is planned as a separate index.
/// It also rejects `NOT NULL` without a default, so only managed columns
/// (which default to 0) keep it; the repository enforces required values.
pub(crate) fn add_column_sql(graph: &SchemaGraph, entity: &EntityDef, column: &ColumnDef) -> String {
    let not_null = !column.nullable && column.managed;
    let mut definition = column_definition(entity, column, not_null, false);
    if let Some(edge) = graph.foreign_key(&entity.name, &column.name) {
        definition.push(' ');
        definition.push_str(&references_clause(edge));
    }
    format!(
        "ALTER TABLE {} ADD COLUMN {};",
        quote_ident(&entity.name),
        definition
    )
}

pub(crate) fn unique_index_name(table: &str, column: &str) -> String {
    format!("ux_{table}_{column}")
}

pub(crate) fn unique_index_sql(table: &str, column: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({});",
        quote_ident(&unique_index_name(table, column)),
        quote_ident(table),
        quote_ident(column)
    )
}

fn references_clause(edge: &EdgeDef) -> String {
    format!(
        "REFERENCES {} ({}) ON DELETE {}",
        quote_ident(edge.referenced_entity()),
        quote_ident(ID_COLUMN),
        edge.on_delete.sql_action()
    )
}

fn column_definition(
    entity: &EntityDef,
    column: &ColumnDef,
    not_null: bool,
    in_create: bool,
) -> String {
    let name = quote_ident(&column.name);
    let mut definition = format!("{name} {}", column.ty.sql_type());

    let is_generated_id =
        entity.primary_key == PrimaryKey::GeneratedId && column.name == ID_COLUMN;
    if not_null {
        definition.push_str(" NOT NULL");
    }
    if is_generated_id {
        definition.push_str(" PRIMARY KEY");
    } else if column.managed {
        definition.push_str(" DEFAULT 0");
    }
    if column.unique && in_create && !is_generated_id {
        definition.push_str(" UNIQUE");
    }
    match column.ty {
        ColumnType::Json => {
            definition.push_str(&format!(" CHECK ({name} IS NULL OR json_valid({name}))"));
        }
        ColumnType::Boolean => {
            definition.push_str(&format!(" CHECK ({name} IS NULL OR {name} IN (0, 1))"));
        }
        _ => {}
    }
    definition
}

fn live_column_definition(column: &LiveColumn) -> String {
    let mut definition = quote_ident(&column.name);
    if !column.decl_type.is_empty() {
        definition.push(' ');
        definition.push_str(&column.decl_type);
    }
    if column.not_null {
        definition.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        definition.push_str(" DEFAULT ");
        definition.push_str(default);
    }
    definition
}

#[cfg(test)]
mod tests {
    use super::{add_column_sql, create_table_sql, quote_ident, unique_index_sql};
    use crate::schema::catalog::{platform_schema, GROUP, PROJECT_TIES_LAYER};

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("group"), "\"group\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn create_table_renders_keys_checks_and_foreign_keys() {
        let graph = platform_schema().unwrap();
        let entity = graph.entity(PROJECT_TIES_LAYER).unwrap();
        let sql = create_table_sql(&graph, entity, &entity.name, None);

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"project_ties_layer\""));
        assert!(sql.contains("PRIMARY KEY (\"project_id\", \"layer_id\")"));
        assert!(sql.contains(
            "FOREIGN KEY (\"project_id\") REFERENCES \"project\" (\"id\") ON DELETE CASCADE"
        ));
        assert!(sql.contains("json_valid(\"settings\")"));
    }

    #[test]
    fn add_column_inlines_reference() {
        let graph = platform_schema().unwrap();
        let entity = graph.entity(GROUP).unwrap();
        let column = entity.find_column("organization_id").unwrap();
        let sql = add_column_sql(&graph, entity, column);

        assert_eq!(
            sql,
            "ALTER TABLE \"group\" ADD COLUMN \"organization_id\" TEXT \
             REFERENCES \"organization\" (\"id\") ON DELETE CASCADE;"
        );
    }

    #[test]
    fn unique_index_is_idempotent_ddl() {
        assert_eq!(
            unique_index_sql("person", "email"),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"ux_person_email\" ON \"person\" (\"email\");"
        );
    }
}
