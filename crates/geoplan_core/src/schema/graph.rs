//! Validated entity/relationship graph.
//!
//! # Responsibility
//! - Own the declared entity descriptors and edges.
//! - Reject inconsistent declarations once, at build time.
//! - Answer the lookups the synchronizer and repositories need.
//!
//! # Invariants
//! - Every edge endpoint is a declared entity.
//! - Every edge has exactly one inverse edge.
//! - Self-referential edges carry a hierarchy role; other edges do not.
//! - A `SchemaGraph` value is never observed in an unvalidated state.

use super::entity::{ColumnType, EntityDef, PrimaryKey};
use super::error::{SchemaError, SchemaResult};
use super::relation::{Cardinality, CascadePolicy, EdgeDef, HierarchyRole};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,62}$").expect("valid identifier regex"));

/// Prefix reserved for temporary tables created while rebuilding.
pub(crate) const RESERVED_PREFIX: &str = "__sync_";

/// The two participant edges of an associative entity.
#[derive(Debug, Clone, Copy)]
pub struct Association<'g> {
    pub entity: &'g EntityDef,
    pub left: &'g EdgeDef,
    pub right: &'g EdgeDef,
}

/// Declared schema, validated.
#[derive(Debug, Clone)]
pub struct SchemaGraph {
    entities: Vec<EntityDef>,
    index: HashMap<String, usize>,
    edges: Vec<EdgeDef>,
}

impl SchemaGraph {
    /// Validates declarations and builds the graph.
    ///
    /// # Errors
    /// - `DanglingReference` when an edge names an undeclared entity.
    /// - `AsymmetricEdge` when an edge's inverse is missing or duplicated.
    /// - Other `SchemaError` variants for identifier, column, key, cascade and
    ///   hierarchy declaration mistakes.
    pub fn build(entities: Vec<EntityDef>, edges: Vec<EdgeDef>) -> SchemaResult<Self> {
        let mut index = HashMap::with_capacity(entities.len());
        for (position, entity) in entities.iter().enumerate() {
            ensure_identifier(&entity.name)?;
            if index.insert(entity.name.clone(), position).is_some() {
                return Err(SchemaError::DuplicateEntity(entity.name.clone()));
            }
            let mut seen = HashSet::new();
            for column in &entity.columns {
                ensure_identifier(&column.name)?;
                if !seen.insert(column.name.as_str()) {
                    return Err(SchemaError::DuplicateColumn {
                        entity: entity.name.clone(),
                        column: column.name.clone(),
                    });
                }
            }
        }

        let graph = Self {
            entities,
            index,
            edges,
        };
        graph.validate_edges()?;
        graph.validate_inverses()?;
        graph.validate_associations()?;

        debug!(
            "event=schema_build module=schema status=ok entities={} edges={}",
            graph.entities.len(),
            graph.edges.len()
        );
        Ok(graph)
    }

    /// Entities in declaration order.
    pub fn entities(&self) -> &[EntityDef] {
        &self.entities
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.index.get(name).map(|position| &self.entities[*position])
    }

    pub fn edges(&self) -> &[EdgeDef] {
        &self.edges
    }

    pub fn edge(&self, name: &str) -> Option<&EdgeDef> {
        self.edges.iter().find(|edge| edge.name == name)
    }

    /// Many-to-one edges whose foreign-key column lives on `entity`.
    pub fn foreign_keys<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a EdgeDef> + 'a {
        self.edges
            .iter()
            .filter(move |edge| edge.cardinality == Cardinality::ManyToOne && edge.source == entity)
    }

    /// The many-to-one edge owning `entity.column`, if any.
    pub fn foreign_key(&self, entity: &str, column: &str) -> Option<&EdgeDef> {
        self.edges.iter().find(|edge| {
            edge.cardinality == Cardinality::ManyToOne
                && edge.source == entity
                && edge.column == column
        })
    }

    /// Many-to-one edges that reference `entity` (including self-references).
    pub fn dependents<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a EdgeDef> + 'a {
        self.edges
            .iter()
            .filter(move |edge| edge.cardinality == Cardinality::ManyToOne && edge.target == entity)
    }

    /// Self-referential parent edge of a hierarchical entity.
    pub fn parent_edge(&self, entity: &str) -> Option<&EdgeDef> {
        self.edges.iter().find(|edge| {
            edge.cardinality == Cardinality::ManyToOne
                && edge.source == entity
                && edge.hierarchy == Some(HierarchyRole::Parent)
        })
    }

    /// Participant edges of an associative entity.
    pub fn association(&self, entity: &str) -> Option<Association<'_>> {
        let def = self.entity(entity)?;
        let PrimaryKey::Composite { left, right } = &def.primary_key else {
            return None;
        };
        Some(Association {
            entity: def,
            left: self.foreign_key(entity, left)?,
            right: self.foreign_key(entity, right)?,
        })
    }

    fn validate_edges(&self) -> SchemaResult<()> {
        let mut names = HashSet::new();
        let mut owned_columns = HashSet::new();

        for edge in &self.edges {
            if !names.insert(edge.name.as_str()) {
                return Err(SchemaError::DuplicateEdge(edge.name.clone()));
            }
            for endpoint in [&edge.source, &edge.target] {
                if self.entity(endpoint).is_none() {
                    return Err(SchemaError::DanglingReference {
                        edge: edge.name.clone(),
                        entity: endpoint.clone(),
                    });
                }
            }

            let referenced = self
                .entity(edge.referenced_entity())
                .ok_or_else(|| SchemaError::DanglingReference {
                    edge: edge.name.clone(),
                    entity: edge.referenced_entity().to_string(),
                })?;
            if referenced.is_associative() {
                return Err(SchemaError::InvalidTarget {
                    edge: edge.name.clone(),
                    entity: referenced.name.clone(),
                });
            }

            let owner = self
                .entity(edge.owning_entity())
                .ok_or_else(|| SchemaError::DanglingReference {
                    edge: edge.name.clone(),
                    entity: edge.owning_entity().to_string(),
                })?;
            let column = owner
                .find_column(&edge.column)
                .filter(|column| column.ty == ColumnType::Id && !column.managed)
                .ok_or_else(|| SchemaError::InvalidColumn {
                    edge: edge.name.clone(),
                    entity: owner.name.clone(),
                    column: edge.column.clone(),
                })?;

            if edge.cardinality == Cardinality::ManyToOne {
                if !owned_columns.insert((owner.name.as_str(), column.name.as_str())) {
                    return Err(SchemaError::DuplicateEdge(edge.name.clone()));
                }
                if edge.on_delete == CascadePolicy::SetNull && !column.nullable {
                    return Err(SchemaError::InvalidCascade {
                        edge: edge.name.clone(),
                        column: column.name.clone(),
                    });
                }
            }

            let expected_role = match (edge.is_self_referential(), edge.cardinality) {
                (false, _) => None,
                (true, Cardinality::ManyToOne) => Some(HierarchyRole::Parent),
                (true, Cardinality::OneToMany) => Some(HierarchyRole::Children),
            };
            if edge.hierarchy != expected_role {
                return Err(SchemaError::AmbiguousHierarchy(edge.name.clone()));
            }

            if let Some(scope) = &edge.scope {
                if !edge.is_self_referential() || owner.find_column(scope).is_none() {
                    return Err(SchemaError::InvalidScope {
                        edge: edge.name.clone(),
                        column: scope.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_inverses(&self) -> SchemaResult<()> {
        for edge in &self.edges {
            let inverses = self
                .edges
                .iter()
                .filter(|other| edge.is_inverse_of(other))
                .count();
            if inverses != 1 {
                return Err(SchemaError::AsymmetricEdge(edge.name.clone()));
            }
        }
        Ok(())
    }

    fn validate_associations(&self) -> SchemaResult<()> {
        for entity in self.entities.iter().filter(|entity| entity.is_associative()) {
            for key in entity.key_columns() {
                let column = entity.find_column(key).ok_or_else(|| SchemaError::InvalidPrimaryKey {
                    entity: entity.name.clone(),
                    reason: format!("key column `{key}` is not declared"),
                })?;
                if column.nullable || column.ty != ColumnType::Id {
                    return Err(SchemaError::InvalidPrimaryKey {
                        entity: entity.name.clone(),
                        reason: format!("key column `{key}` must be a required id column"),
                    });
                }
                if self.foreign_key(&entity.name, key).is_none() {
                    return Err(SchemaError::InvalidPrimaryKey {
                        entity: entity.name.clone(),
                        reason: format!("key column `{key}` has no participant edge"),
                    });
                }
            }
        }
        Ok(())
    }
}

fn ensure_identifier(name: &str) -> SchemaResult<()> {
    if IDENTIFIER_RE.is_match(name) && !name.starts_with(RESERVED_PREFIX) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(name.to_string()))
    }
}
