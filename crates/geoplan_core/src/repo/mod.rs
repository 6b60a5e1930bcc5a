//! Repository layer over the declared schema graph.
//!
//! # Responsibility
//! - Expose typed create/read/update/delete per generated-id entity and
//!   link/unlink per associative entity.
//! - Isolate SQL text from callers; callers exchange `Attrs` and `RowId`.
//!
//! # Invariants
//! - Every write enforces the integrity rules before committing.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`,
//!   `Validation`) in addition to transport errors.

pub mod entity_repo;
pub mod error;
pub mod link_repo;
pub mod value;

pub use entity_repo::{EntityRepository, Record, SqliteEntityRepository};
pub use error::{Conflict, RepoError, RepoResult};
pub use link_repo::{LinkRecord, LinkRepository, SqliteLinkRepository};
pub use value::{attrs, Attrs, FieldValue, RowId};
