//! Associative entity repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Link and unlink participant pairs, carrying the association payload.
//!
//! # Invariants
//! - At most one row exists per `(left, right)` pair.
//! - `link` on an existing pair replaces the whole payload.
//! - Both participants must exist when a pair is linked.

use super::entity_repo::error_code;
use super::error::{map_write_error, RepoError, RepoResult};
use super::value::{Attrs, FieldValue, RowId};
use crate::db::sync::quote_ident;
use crate::integrity::validate::{ensure_references, ensure_row_exists, normalize_attrs, WriteMode};
use crate::schema::graph::{Association, SchemaGraph};
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// One association row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub left: RowId,
    pub right: RowId,
    /// Non-null payload attributes.
    pub payload: Attrs,
}

/// Repository interface for associative entities.
pub trait LinkRepository {
    /// Creates the pair or replaces its payload.
    fn link(&self, left: RowId, right: RowId, payload: &Attrs) -> RepoResult<()>;
    fn unlink(&self, left: RowId, right: RowId) -> RepoResult<()>;
    fn get_payload(&self, left: RowId, right: RowId) -> RepoResult<Attrs>;
    fn list_by_left(&self, left: RowId) -> RepoResult<Vec<LinkRecord>>;
    fn list_by_right(&self, right: RowId) -> RepoResult<Vec<LinkRecord>>;
}

/// SQLite-backed repository over one associative entity.
pub struct SqliteLinkRepository<'conn> {
    conn: &'conn Connection,
    graph: &'conn SchemaGraph,
    association: Association<'conn>,
}

impl<'conn> SqliteLinkRepository<'conn> {
    /// # Errors
    /// - `UnknownEntity` when `entity` is not declared.
    /// - `WrongShape` when `entity` is not associative.
    pub fn new(conn: &'conn Connection, graph: &'conn SchemaGraph, entity: &str) -> RepoResult<Self> {
        if graph.entity(entity).is_none() {
            return Err(RepoError::UnknownEntity(entity.to_string()));
        }
        let association = graph.association(entity).ok_or_else(|| RepoError::WrongShape {
            entity: entity.to_string(),
            expected: "an associative entity",
        })?;
        Ok(Self {
            conn,
            graph,
            association,
        })
    }

    /// Entities referenced by the left and right key columns.
    pub fn participants(&self) -> (&str, &str) {
        (
            self.association.left.target.as_str(),
            self.association.right.target.as_str(),
        )
    }

    fn table(&self) -> &str {
        &self.association.entity.name
    }

    fn upsert(&self, left: RowId, right: RowId, payload: &Attrs) -> RepoResult<()> {
        let entity = self.association.entity;
        let values = normalize_attrs(self.graph, entity, payload, WriteMode::Payload)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        for (edge, id) in [(self.association.left, left), (self.association.right, right)] {
            ensure_row_exists(&tx, &entity.name, &edge.column, &edge.target, id)?;
        }
        ensure_references(&tx, self.graph, entity, &values)?;

        let left_column = quote_ident(&self.association.left.column);
        let right_column = quote_ident(&self.association.right.column);
        let mut columns = vec![left_column.clone(), right_column.clone()];
        let mut bind = vec![Value::Text(left.to_string()), Value::Text(right.to_string())];
        let mut updates = Vec::new();
        for column in entity.payload_columns() {
            let value = values
                .iter()
                .find(|(def, _)| def.name == column.name)
                .map(|(_, value)| value.to_sql())
                .unwrap_or(Value::Null);
            let quoted = quote_ident(&column.name);
            updates.push(format!("{quoted} = excluded.{quoted}"));
            columns.push(quoted);
            bind.push(value);
        }
        let placeholders = (1..=bind.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let on_conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        tx.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({placeholders})
                 ON CONFLICT ({left_column}, {right_column}) {on_conflict};",
                quote_ident(self.table()),
                columns.join(", ")
            ),
            params_from_iter(bind),
        )
        .map_err(|err| map_write_error(self.table(), err))?;
        tx.commit()?;
        Ok(())
    }

    fn select_sql(&self) -> String {
        let mut columns = vec![
            quote_ident(&self.association.left.column),
            quote_ident(&self.association.right.column),
        ];
        columns.extend(
            self.association
                .entity
                .payload_columns()
                .map(|column| quote_ident(&column.name)),
        );
        format!("SELECT {} FROM {}", columns.join(", "), quote_ident(self.table()))
    }

    fn query(&self, column: &str, id: RowId) -> RepoResult<Vec<LinkRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE {} = ?1 ORDER BY rowid ASC;",
            self.select_sql(),
            quote_ident(column)
        ))?;
        let mut rows = stmt.query([id.to_string()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(self.parse_link(row)?);
        }
        Ok(records)
    }

    fn parse_link(&self, row: &Row<'_>) -> RepoResult<LinkRecord> {
        let invalid = |message: String| RepoError::InvalidData(format!("{}: {message}", self.table()));
        let key = |index: usize| -> RepoResult<RowId> {
            let text: String = row.get(index)?;
            Uuid::parse_str(&text).map_err(|_| invalid(format!("invalid key `{text}`")))
        };

        let left = key(0)?;
        let right = key(1)?;
        let mut payload = Attrs::new();
        for (offset, column) in self.association.entity.payload_columns().enumerate() {
            let value = FieldValue::from_sql(column.ty, row.get_ref(offset + 2)?)
                .map_err(|message| invalid(format!("{}: {message}", column.name)))?;
            if !value.is_null() {
                payload.insert(column.name.clone(), value);
            }
        }
        Ok(LinkRecord {
            left,
            right,
            payload,
        })
    }

    fn not_found(&self, left: RowId, right: RowId) -> RepoError {
        RepoError::NotFound {
            entity: self.table().to_string(),
            key: format!("({left}, {right})"),
        }
    }
}

impl LinkRepository for SqliteLinkRepository<'_> {
    fn link(&self, left: RowId, right: RowId, payload: &Attrs) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = self.upsert(left, right, payload);
        match &result {
            Ok(()) => debug!(
                "event=pair_link module=repo status=ok entity={} left={} right={} duration_ms={}",
                self.table(),
                left,
                right,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=pair_link module=repo status=error entity={} left={} right={} duration_ms={} error_code={}",
                self.table(),
                left,
                right,
                started_at.elapsed().as_millis(),
                error_code(err)
            ),
        }
        result
    }

    fn unlink(&self, left: RowId, right: RowId) -> RepoResult<()> {
        let changed = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1 AND {} = ?2;",
                quote_ident(self.table()),
                quote_ident(&self.association.left.column),
                quote_ident(&self.association.right.column)
            ),
            [left.to_string(), right.to_string()],
        )?;
        if changed == 0 {
            debug!(
                "event=pair_unlink module=repo status=error entity={} left={} right={} error_code=not_found",
                self.table(),
                left,
                right
            );
            return Err(self.not_found(left, right));
        }
        debug!(
            "event=pair_unlink module=repo status=ok entity={} left={} right={}",
            self.table(),
            left,
            right
        );
        Ok(())
    }

    fn get_payload(&self, left: RowId, right: RowId) -> RepoResult<Attrs> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE {} = ?1 AND {} = ?2;",
            self.select_sql(),
            quote_ident(&self.association.left.column),
            quote_ident(&self.association.right.column)
        ))?;
        let mut rows = stmt.query([left.to_string(), right.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(self.parse_link(row)?.payload),
            None => Err(self.not_found(left, right)),
        }
    }

    fn list_by_left(&self, left: RowId) -> RepoResult<Vec<LinkRecord>> {
        self.query(&self.association.left.column, left)
    }

    fn list_by_right(&self, right: RowId) -> RepoResult<Vec<LinkRecord>> {
        self.query(&self.association.right.column, right)
    }
}
