//! Declared schema: entity descriptors, relationship graph and catalog.
//!
//! # Responsibility
//! - Describe every table, column and foreign-key edge as static metadata.
//! - Validate the declarations once before any storage is touched.
//!
//! # Invariants
//! - Nothing in this module performs I/O.
//! - Cascade behavior is declared per edge, never inferred.

pub mod catalog;
pub mod entity;
mod error;
pub mod graph;
pub mod relation;

pub use catalog::platform_schema;
pub use entity::{ColumnDef, ColumnType, EntityDef, PrimaryKey};
pub use error::{SchemaError, SchemaResult};
pub use graph::{Association, SchemaGraph};
pub use relation::{belongs_to, parent_link, Cardinality, CascadePolicy, EdgeDef, HierarchyRole};
