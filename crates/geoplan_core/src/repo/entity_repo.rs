//! Generated-id entity repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide typed CRUD over any generated-id entity of the schema graph.
//! - Run validation, hierarchy and cascade rules inside one transaction per
//!   write.
//!
//! # Invariants
//! - Identifiers and managed timestamps are assigned here, never by callers.
//! - A rejected write leaves storage unchanged.
//! - Read paths reject persisted values that do not fit their declared type.

use super::error::{map_write_error, RepoError, RepoResult};
use super::value::{Attrs, FieldValue, RowId};
use crate::db::sync::quote_ident;
use crate::integrity::cascade::{delete_cascading, DeleteSummary};
use crate::integrity::hierarchy::{ancestor_ids, child_count, ensure_acyclic, ensure_same_scope};
use crate::integrity::validate::{ensure_references, normalize_attrs, row_exists, WriteMode};
use crate::integrity::ValidationError;
use crate::schema::entity::{ColumnDef, EntityDef, CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN};
use crate::schema::graph::SchemaGraph;
use crate::schema::relation::EdgeDef;
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// One persisted row of a generated-id entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RowId,
    pub created_at: i64,
    pub updated_at: i64,
    /// Non-null caller-writable attributes. A column holding NULL has no
    /// key here, so writing `FieldValue::Null` reads back as an absent key.
    pub attrs: Attrs,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.attrs.get(column)
    }

    /// Identifier stored in a foreign-key attribute.
    pub fn id_of(&self, column: &str) -> Option<RowId> {
        self.get(column).and_then(FieldValue::as_id)
    }
}

/// Repository interface for generated-id entities.
pub trait EntityRepository {
    /// Inserts a row and returns its generated identifier.
    fn create(&self, attrs: &Attrs) -> RepoResult<RowId>;
    fn get(&self, id: RowId) -> RepoResult<Record>;
    /// Applies a partial update. `FieldValue::Null` clears a nullable column.
    fn update(&self, id: RowId, patch: &Attrs) -> RepoResult<Record>;
    /// Deletes a row, propagating along declared cascade policies.
    fn delete(&self, id: RowId) -> RepoResult<()>;
    /// Rows whose foreign key `column` references `parent`.
    fn list_by_parent(&self, column: &str, parent: RowId) -> RepoResult<Vec<Record>>;
    /// Rows of a self-referential entity without a parent.
    fn list_roots(&self) -> RepoResult<Vec<Record>>;
    /// Ancestors of `id`, nearest first.
    fn ancestors(&self, id: RowId) -> RepoResult<Vec<Record>>;
}

/// SQLite-backed repository over one generated-id entity.
pub struct SqliteEntityRepository<'conn> {
    conn: &'conn Connection,
    graph: &'conn SchemaGraph,
    entity: &'conn EntityDef,
    max_depth: u32,
}

impl<'conn> SqliteEntityRepository<'conn> {
    /// # Errors
    /// - `UnknownEntity` when `entity` is not declared.
    /// - `WrongShape` when `entity` is associative.
    pub fn new(
        conn: &'conn Connection,
        graph: &'conn SchemaGraph,
        entity: &str,
        max_depth: u32,
    ) -> RepoResult<Self> {
        let entity = graph
            .entity(entity)
            .ok_or_else(|| RepoError::UnknownEntity(entity.to_string()))?;
        if entity.is_associative() {
            return Err(RepoError::WrongShape {
                entity: entity.name.clone(),
                expected: "a generated-id entity",
            });
        }
        Ok(Self {
            conn,
            graph,
            entity,
            max_depth,
        })
    }

    pub fn entity(&self) -> &EntityDef {
        self.entity
    }

    fn begin(&self) -> RepoResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    fn insert(&self, attrs: &Attrs) -> RepoResult<RowId> {
        let values = normalize_attrs(self.graph, self.entity, attrs, WriteMode::Create)?;
        let id = Uuid::new_v4();
        let tx = self.begin()?;
        ensure_references(&tx, self.graph, self.entity, &values)?;
        self.check_hierarchy(&tx, id, &values, None)?;

        let now = now_ms();
        let mut columns = vec![
            quote_ident(ID_COLUMN),
            quote_ident(CREATED_AT_COLUMN),
            quote_ident(UPDATED_AT_COLUMN),
        ];
        let mut bind = vec![Value::Text(id.to_string()), Value::Integer(now), Value::Integer(now)];
        for (column, value) in &values {
            columns.push(quote_ident(&column.name));
            bind.push(value.to_sql());
        }
        let placeholders = (1..=bind.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");

        tx.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({placeholders});",
                quote_ident(&self.entity.name),
                columns.join(", ")
            ),
            params_from_iter(bind),
        )
        .map_err(|err| map_write_error(&self.entity.name, err))?;
        tx.commit()?;
        Ok(id)
    }

    fn patch(&self, id: RowId, patch: &Attrs) -> RepoResult<Record> {
        let values = normalize_attrs(self.graph, self.entity, patch, WriteMode::Patch)?;
        let tx = self.begin()?;
        let current = self.fetch(&tx, id)?.ok_or_else(|| self.not_found(id))?;
        ensure_references(&tx, self.graph, self.entity, &values)?;
        self.check_hierarchy(&tx, id, &values, Some(&current))?;

        if !values.is_empty() {
            let mut assignments = Vec::with_capacity(values.len() + 1);
            let mut bind = Vec::with_capacity(values.len() + 2);
            for (column, value) in &values {
                bind.push(value.to_sql());
                assignments.push(format!("{} = ?{}", quote_ident(&column.name), bind.len()));
            }
            bind.push(Value::Integer(now_ms().max(current.updated_at)));
            assignments.push(format!("{} = ?{}", quote_ident(UPDATED_AT_COLUMN), bind.len()));
            bind.push(Value::Text(id.to_string()));

            tx.execute(
                &format!(
                    "UPDATE {} SET {} WHERE {} = ?{};",
                    quote_ident(&self.entity.name),
                    assignments.join(", "),
                    quote_ident(ID_COLUMN),
                    bind.len()
                ),
                params_from_iter(bind),
            )
            .map_err(|err| map_write_error(&self.entity.name, err))?;
        }

        let record = self.fetch(&tx, id)?.ok_or_else(|| self.not_found(id))?;
        tx.commit()?;
        Ok(record)
    }

    fn remove(&self, id: RowId) -> RepoResult<DeleteSummary> {
        let tx = self.begin()?;
        if !row_exists(&tx, &self.entity.name, id)? {
            return Err(self.not_found(id));
        }
        let summary = delete_cascading(&tx, self.graph, &self.entity.name, id, now_ms())
            .map_err(|err| match err {
                RepoError::Db(crate::db::DbError::Sqlite(source)) => {
                    map_write_error(&self.entity.name, source)
                }
                other => other,
            })?;
        tx.commit()?;
        Ok(summary)
    }

    /// Enforces acyclicity, depth and scope on the parent edge, if any.
    fn check_hierarchy(
        &self,
        conn: &Connection,
        id: RowId,
        values: &[(&ColumnDef, FieldValue)],
        current: Option<&Record>,
    ) -> RepoResult<()> {
        let Some(edge) = self.graph.parent_edge(&self.entity.name) else {
            return Ok(());
        };
        let supplied = |name: &str| {
            values
                .iter()
                .find(|(column, _)| column.name == name)
                .map(|(_, value)| value.clone())
        };
        let stored = |name: &str| {
            current
                .and_then(|record| record.get(name))
                .cloned()
                .unwrap_or(FieldValue::Null)
        };

        let new_parent = supplied(&edge.column);
        let new_scope = edge.scope.as_deref().and_then(supplied);
        if new_parent.is_none() && new_scope.is_none() {
            return Ok(());
        }

        let parent = new_parent.unwrap_or_else(|| stored(&edge.column));
        if let FieldValue::Id(parent) = parent {
            ensure_acyclic(conn, edge, id, parent, self.max_depth)?;
            if let Some(scope) = edge.scope.as_deref() {
                let scope_value = new_scope.clone().unwrap_or_else(|| stored(scope));
                ensure_same_scope(conn, edge, parent, &scope_value.to_sql())?;
            }
        }

        if let (Some(scope), Some(new_scope), Some(_)) = (edge.scope.as_deref(), &new_scope, current) {
            if *new_scope != stored(scope) && child_count(conn, edge, id)? > 0 {
                return Err(ValidationError::ScopeMismatch {
                    entity: self.entity.name.clone(),
                    column: scope.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn fetch(&self, conn: &Connection, id: RowId) -> RepoResult<Option<Record>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE {} = ?1;",
            select_sql(self.entity),
            quote_ident(ID_COLUMN)
        ))?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_record(self.entity, row)?)),
            None => Ok(None),
        }
    }

    fn query(&self, filter: &str, bind: Vec<Value>) -> RepoResult<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE {filter} ORDER BY {} ASC, rowid ASC;",
            select_sql(self.entity),
            quote_ident(CREATED_AT_COLUMN)
        ))?;
        let mut rows = stmt.query(params_from_iter(bind))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record(self.entity, row)?);
        }
        Ok(records)
    }

    fn not_found(&self, id: RowId) -> RepoError {
        RepoError::NotFound {
            entity: self.entity.name.clone(),
            key: id.to_string(),
        }
    }

    fn parent_edge(&self) -> RepoResult<&'conn EdgeDef> {
        self.graph
            .parent_edge(&self.entity.name)
            .ok_or_else(|| RepoError::NotHierarchical(self.entity.name.clone()))
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn create(&self, attrs: &Attrs) -> RepoResult<RowId> {
        let started_at = Instant::now();
        let result = self.insert(attrs);
        match &result {
            Ok(id) => debug!(
                "event=row_create module=repo status=ok entity={} id={} duration_ms={}",
                self.entity.name,
                id,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=row_create module=repo status=error entity={} duration_ms={} error_code={}",
                self.entity.name,
                started_at.elapsed().as_millis(),
                error_code(err)
            ),
        }
        result
    }

    fn get(&self, id: RowId) -> RepoResult<Record> {
        self.fetch(self.conn, id)?.ok_or_else(|| self.not_found(id))
    }

    fn update(&self, id: RowId, patch: &Attrs) -> RepoResult<Record> {
        let started_at = Instant::now();
        let result = self.patch(id, patch);
        match &result {
            Ok(_) => debug!(
                "event=row_update module=repo status=ok entity={} id={} columns={} duration_ms={}",
                self.entity.name,
                id,
                patch.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=row_update module=repo status=error entity={} id={} duration_ms={} error_code={}",
                self.entity.name,
                id,
                started_at.elapsed().as_millis(),
                error_code(err)
            ),
        }
        result
    }

    fn delete(&self, id: RowId) -> RepoResult<()> {
        let started_at = Instant::now();
        match self.remove(id) {
            Ok(counts) => {
                debug!(
                    "event=row_delete module=repo status=ok entity={} id={} rows={} links={} nulled={} duration_ms={}",
                    self.entity.name,
                    id,
                    counts.rows,
                    counts.links,
                    counts.nulled,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    "event=row_delete module=repo status=error entity={} id={} duration_ms={} error_code={}",
                    self.entity.name,
                    id,
                    started_at.elapsed().as_millis(),
                    error_code(&err)
                );
                Err(err)
            }
        }
    }

    fn list_by_parent(&self, column: &str, parent: RowId) -> RepoResult<Vec<Record>> {
        if self.graph.foreign_key(&self.entity.name, column).is_none() {
            return Err(RepoError::UnknownRelation {
                entity: self.entity.name.clone(),
                column: column.to_string(),
            });
        }
        self.query(
            &format!("{} = ?1", quote_ident(column)),
            vec![Value::Text(parent.to_string())],
        )
    }

    fn list_roots(&self) -> RepoResult<Vec<Record>> {
        let edge = self.parent_edge()?;
        self.query(&format!("{} IS NULL", quote_ident(&edge.column)), Vec::new())
    }

    fn ancestors(&self, id: RowId) -> RepoResult<Vec<Record>> {
        let edge = self.parent_edge()?;
        if self.fetch(self.conn, id)?.is_none() {
            return Err(self.not_found(id));
        }
        ancestor_ids(self.conn, edge, id, self.max_depth)?
            .into_iter()
            .map(|ancestor| self.get(ancestor))
            .collect()
    }
}

/// `SELECT <all declared columns> FROM <table>` in declaration order.
fn select_sql(entity: &EntityDef) -> String {
    let columns = entity
        .columns
        .iter()
        .map(|column| quote_ident(&column.name))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {columns} FROM {}", quote_ident(&entity.name))
}

fn parse_record(entity: &EntityDef, row: &Row<'_>) -> RepoResult<Record> {
    let mut id = None;
    let mut created_at = 0;
    let mut updated_at = 0;
    let mut attrs = Attrs::new();

    for (index, column) in entity.columns.iter().enumerate() {
        let value = FieldValue::from_sql(column.ty, row.get_ref(index)?).map_err(|message| {
            RepoError::InvalidData(format!("{}.{}: {message}", entity.name, column.name))
        })?;
        match (column.name.as_str(), value) {
            (ID_COLUMN, FieldValue::Id(value)) if column.managed => id = Some(value),
            (CREATED_AT_COLUMN, FieldValue::Integer(value)) if column.managed => created_at = value,
            (UPDATED_AT_COLUMN, FieldValue::Integer(value)) if column.managed => updated_at = value,
            (_, FieldValue::Null) => {}
            (_, value) if !column.managed => {
                attrs.insert(column.name.clone(), value);
            }
            (name, _) => {
                return Err(RepoError::InvalidData(format!(
                    "{}.{name} holds an unexpected managed value",
                    entity.name
                )))
            }
        }
    }

    let id = id.ok_or_else(|| RepoError::InvalidData(format!("{} row without id", entity.name)))?;
    Ok(Record {
        id,
        created_at,
        updated_at,
        attrs,
    })
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

/// Stable error code for log lines.
pub(crate) fn error_code(err: &RepoError) -> &'static str {
    match err {
        RepoError::Validation(_) => "validation_failed",
        RepoError::Conflict(_) => "conflict",
        RepoError::NotFound { .. } => "not_found",
        RepoError::UnknownEntity(_) => "unknown_entity",
        RepoError::WrongShape { .. } => "wrong_shape",
        RepoError::UnknownRelation { .. } => "unknown_relation",
        RepoError::NotHierarchical(_) => "not_hierarchical",
        RepoError::Db(_) => "db_error",
        RepoError::InvalidData(_) => "invalid_data",
    }
}
