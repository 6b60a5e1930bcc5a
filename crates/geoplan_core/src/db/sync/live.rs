//! Live SQLite schema introspection.
//!
//! # Responsibility
//! - Read tables, columns, foreign keys and single-column unique indexes
//!   from a connection without modifying it.
//!
//! # Invariants
//! - SQLite internal tables (`sqlite_*`) are never reported.
//! - Introspection is read-only and safe inside an open transaction.

use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};

/// Column as reported by `pragma_table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

/// Foreign key as reported by `pragma_foreign_key_list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveForeignKey {
    pub column: String,
    pub target: String,
    pub on_delete: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTable {
    pub name: String,
    pub columns: Vec<LiveColumn>,
    pub foreign_keys: Vec<LiveForeignKey>,
    /// Columns covered by a single-column unique index or constraint.
    pub unique_columns: BTreeSet<String>,
}

impl LiveTable {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column.name == name)
    }

    /// Foreign key on `column` pointing at `target`, if present.
    pub fn foreign_key(&self, column: &str, target: &str) -> Option<&LiveForeignKey> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.column == column && fk.target.eq_ignore_ascii_case(target))
    }
}

/// Snapshot of physical storage shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSchema {
    tables: BTreeMap<String, LiveTable>,
}

impl LiveSchema {
    /// Reads every user table on `conn`.
    pub fn introspect(conn: &Connection) -> rusqlite::Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT name
             FROM sqlite_master
             WHERE type = 'table'
               AND name NOT LIKE 'sqlite_%'
             ORDER BY name ASC;",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut tables = BTreeMap::new();
        for name in names {
            let table = introspect_table(conn, &name)?;
            tables.insert(name, table);
        }
        Ok(Self { tables })
    }

    pub fn table(&self, name: &str) -> Option<&LiveTable> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &LiveTable> {
        self.tables.values()
    }
}

/// Reads one table. Returns an empty column list when the table is absent.
pub(crate) fn introspect_table(conn: &Connection, table: &str) -> rusqlite::Result<LiveTable> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk
         FROM pragma_table_info(?1)
         ORDER BY cid ASC;",
    )?;
    let columns = stmt
        .query_map([table], |row| {
            Ok(LiveColumn {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                default: row.get(3)?,
                primary_key: row.get::<_, i64>(4)? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT \"from\", \"table\", on_delete
         FROM pragma_foreign_key_list(?1)
         ORDER BY id ASC, seq ASC;",
    )?;
    let foreign_keys = stmt
        .query_map([table], |row| {
            Ok(LiveForeignKey {
                column: row.get(0)?,
                target: row.get(1)?,
                on_delete: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(LiveTable {
        name: table.to_string(),
        columns,
        foreign_keys,
        unique_columns: unique_columns(conn, table)?,
    })
}

fn unique_columns(conn: &Connection, table: &str) -> rusqlite::Result<BTreeSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT name
         FROM pragma_index_list(?1)
         WHERE \"unique\" = 1
           AND partial = 0;",
    )?;
    let indexes = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut result = BTreeSet::new();
    let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1);")?;
    for index in indexes {
        let columns = info
            .query_map([index.as_str()], |row| row.get::<_, Option<String>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if let [Some(column)] = columns.as_slice() {
            result.insert(column.clone());
        }
    }
    Ok(result)
}
