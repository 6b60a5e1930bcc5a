use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Build-time inconsistency in the declared entity/relationship graph.
///
/// Always fatal: a store is never opened against an invalid graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Table or column name is not a plain lowercase identifier.
    InvalidIdentifier(String),
    DuplicateEntity(String),
    DuplicateColumn {
        entity: String,
        column: String,
    },
    DuplicateEdge(String),
    /// Edge source or target names an undeclared entity.
    DanglingReference {
        edge: String,
        entity: String,
    },
    /// Edge names a column its owning entity does not declare, or a column
    /// that is not an `Id` column.
    InvalidColumn {
        edge: String,
        entity: String,
        column: String,
    },
    /// A `ManyToOne` edge lacks exactly one inverse `OneToMany` edge (or the
    /// reverse).
    AsymmetricEdge(String),
    /// Self-referential edge without a parent/children role, or a role on a
    /// non-self-referential edge.
    AmbiguousHierarchy(String),
    /// Edge points at an associative entity, which has no single identifier.
    InvalidTarget {
        edge: String,
        entity: String,
    },
    /// `SetNull` declared on a NOT NULL column.
    InvalidCascade {
        edge: String,
        column: String,
    },
    /// Composite key columns are missing, nullable, or lack participant edges.
    InvalidPrimaryKey {
        entity: String,
        reason: String,
    },
    /// Hierarchy scope column is not declared on the entity.
    InvalidScope {
        edge: String,
        column: String,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier(name) => write!(f, "invalid identifier `{name}`"),
            Self::DuplicateEntity(name) => write!(f, "entity `{name}` declared twice"),
            Self::DuplicateColumn { entity, column } => {
                write!(f, "column `{column}` declared twice on `{entity}`")
            }
            Self::DuplicateEdge(name) => write!(f, "edge `{name}` declared twice"),
            Self::DanglingReference { edge, entity } => {
                write!(f, "edge `{edge}` references undeclared entity `{entity}`")
            }
            Self::InvalidColumn {
                edge,
                entity,
                column,
            } => write!(
                f,
                "edge `{edge}` uses column `{column}` which is not an id column of `{entity}`"
            ),
            Self::AsymmetricEdge(edge) => {
                write!(f, "edge `{edge}` has no single matching inverse edge")
            }
            Self::AmbiguousHierarchy(edge) => write!(
                f,
                "edge `{edge}` must declare a hierarchy role if and only if it is self-referential"
            ),
            Self::InvalidTarget { edge, entity } => write!(
                f,
                "edge `{edge}` targets associative entity `{entity}` which has no single id"
            ),
            Self::InvalidCascade { edge, column } => write!(
                f,
                "edge `{edge}` declares SET NULL on non-nullable column `{column}`"
            ),
            Self::InvalidPrimaryKey { entity, reason } => {
                write!(f, "invalid primary key on `{entity}`: {reason}")
            }
            Self::InvalidScope { edge, column } => {
                write!(f, "edge `{edge}` is scoped by undeclared column `{column}`")
            }
        }
    }
}

impl Error for SchemaError {}
