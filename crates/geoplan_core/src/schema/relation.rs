//! Relationship edges and per-edge cascade policy.
//!
//! # Responsibility
//! - Describe directed ownership/reference edges between entities.
//! - Carry the declared `ON DELETE` policy next to the edge it governs.
//!
//! # Invariants
//! - Edges are declared as inverse pairs: one `ManyToOne` on the entity that
//!   owns the foreign-key column, one `OneToMany` on the referenced entity.
//! - The cascade policy lives on the `ManyToOne` side; the `OneToMany` side
//!   mirrors it for readability only.

use std::fmt::{Display, Formatter};

/// What happens to dependent rows when a referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadePolicy {
    /// Deleting the target fails while dependents exist.
    Restrict,
    /// Deleting the target deletes dependents in the same transaction.
    Cascade,
    /// Deleting the target nulls the referencing column on dependents.
    SetNull,
}

impl CascadePolicy {
    /// `ON DELETE` action keyword used in DDL.
    pub fn sql_action(self) -> &'static str {
        match self {
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
        }
    }

    /// Parses the action reported by `PRAGMA foreign_key_list`.
    ///
    /// `NO ACTION` is reported for keys declared without a clause and is
    /// treated as `Restrict`.
    pub fn from_sql_action(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RESTRICT" | "NO ACTION" => Some(Self::Restrict),
            "CASCADE" => Some(Self::Cascade),
            "SET NULL" => Some(Self::SetNull),
            _ => None,
        }
    }
}

impl Display for CascadePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql_action())
    }
}

/// Edge direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ManyToOne,
    OneToMany,
}

/// Role of a self-referential edge inside a hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyRole {
    /// The `ManyToOne` side: the column points at the parent row.
    Parent,
    /// The `OneToMany` side: rows whose column points at this row.
    Children,
}

/// One directed edge of the relationship graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeDef {
    pub name: String,
    pub source: String,
    pub target: String,
    pub cardinality: Cardinality,
    /// Foreign-key column, always living on the "many" entity.
    pub column: String,
    pub on_delete: CascadePolicy,
    /// Required for self-referential edges.
    pub hierarchy: Option<HierarchyRole>,
    /// Column that parent and child rows must share (self-referential only).
    pub scope: Option<String>,
}

impl EdgeDef {
    /// `source.column` references `target.id`.
    pub fn many_to_one(
        name: impl Into<String>,
        source: impl Into<String>,
        column: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            target: target.into(),
            cardinality: Cardinality::ManyToOne,
            column: column.into(),
            on_delete: CascadePolicy::Restrict,
            hierarchy: None,
            scope: None,
        }
    }

    /// Rows of `target` whose `column` references `source.id`.
    pub fn one_to_many(
        name: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::OneToMany,
            ..Self::many_to_one(name, source, column, target)
        }
    }

    pub fn on_delete(mut self, policy: CascadePolicy) -> Self {
        self.on_delete = policy;
        self
    }

    pub fn hierarchy(mut self, role: HierarchyRole) -> Self {
        self.hierarchy = Some(role);
        self
    }

    pub fn scoped_by(mut self, column: impl Into<String>) -> Self {
        self.scope = Some(column.into());
        self
    }

    pub fn is_self_referential(&self) -> bool {
        self.source == self.target
    }

    /// Entity whose table holds the foreign-key column.
    pub fn owning_entity(&self) -> &str {
        match self.cardinality {
            Cardinality::ManyToOne => &self.source,
            Cardinality::OneToMany => &self.target,
        }
    }

    /// Entity whose `id` the foreign-key column references.
    pub fn referenced_entity(&self) -> &str {
        match self.cardinality {
            Cardinality::ManyToOne => &self.target,
            Cardinality::OneToMany => &self.source,
        }
    }

    /// Whether `other` is the inverse half of this edge.
    pub fn is_inverse_of(&self, other: &EdgeDef) -> bool {
        self.cardinality != other.cardinality
            && self.source == other.target
            && self.target == other.source
            && self.column == other.column
    }
}

/// Declares `source.column -> target` together with its inverse edge.
pub fn belongs_to(
    source: &str,
    column: &str,
    target: &str,
    on_delete: CascadePolicy,
) -> [EdgeDef; 2] {
    [
        EdgeDef::many_to_one(format!("{source}.{column}"), source, column, target)
            .on_delete(on_delete),
        EdgeDef::one_to_many(
            format!("{target}.{source}_by_{column}"),
            target,
            source,
            column,
        )
        .on_delete(on_delete),
    ]
}

/// Declares a self-referential parent link on `entity`.
///
/// `scope` names a column that a row and its parent must share.
pub fn parent_link(
    entity: &str,
    column: &str,
    on_delete: CascadePolicy,
    scope: Option<&str>,
) -> [EdgeDef; 2] {
    let [parent, children] = belongs_to(entity, column, entity, on_delete);
    let mut parent = parent.hierarchy(HierarchyRole::Parent);
    let mut children = children.hierarchy(HierarchyRole::Children);
    if let Some(scope) = scope {
        parent = parent.scoped_by(scope);
        children = children.scoped_by(scope);
    }
    [parent, children]
}

#[cfg(test)]
mod tests {
    use super::{belongs_to, parent_link, Cardinality, CascadePolicy, HierarchyRole};

    #[test]
    fn belongs_to_declares_inverse_pair() {
        let [forward, inverse] = belongs_to("layer", "geom_type_id", "geom_type", CascadePolicy::Restrict);

        assert_eq!(forward.cardinality, Cardinality::ManyToOne);
        assert_eq!(inverse.cardinality, Cardinality::OneToMany);
        assert!(forward.is_inverse_of(&inverse));
        assert_eq!(forward.owning_entity(), "layer");
        assert_eq!(inverse.owning_entity(), "layer");
        assert_eq!(inverse.referenced_entity(), "geom_type");
    }

    #[test]
    fn parent_link_marks_roles_and_scope() {
        let [parent, children] = parent_link("field", "parent_id", CascadePolicy::Cascade, Some("form_id"));

        assert!(parent.is_self_referential());
        assert_eq!(parent.hierarchy, Some(HierarchyRole::Parent));
        assert_eq!(children.hierarchy, Some(HierarchyRole::Children));
        assert_eq!(parent.scope.as_deref(), Some("form_id"));
    }

    #[test]
    fn sql_actions_parse_back() {
        for policy in [CascadePolicy::Restrict, CascadePolicy::Cascade, CascadePolicy::SetNull] {
            assert_eq!(CascadePolicy::from_sql_action(policy.sql_action()), Some(policy));
        }
        assert_eq!(
            CascadePolicy::from_sql_action("NO ACTION"),
            Some(CascadePolicy::Restrict)
        );
    }
}
