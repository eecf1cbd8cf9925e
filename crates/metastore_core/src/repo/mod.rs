//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the storage backend contract the store is written against.
//! - Isolate SQLite query details from store orchestration.
//!
//! # Invariants
//! - Every repository call is filtered by an exact scope.
//! - Repository APIs return semantic errors (`UniqueViolation`, `NotFound`)
//!   in addition to DB transport errors.

pub mod meta_repo;
