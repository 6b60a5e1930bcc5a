//! Integrity rules enforced on every repository write.
//!
//! # Responsibility
//! - Validate attributes against declared column constraints.
//! - Keep self-referential hierarchies acyclic, bounded and scoped.
//! - Propagate deletes along declared cascade policies.
//!
//! # Invariants
//! - Every check runs inside the repository's write transaction, so a
//!   rejected write leaves storage unchanged.

pub(crate) mod cascade;
pub(crate) mod hierarchy;
pub(crate) mod validate;

pub use validate::ValidationError;
