//! Domain model for scoped metadata.
//!
//! # Responsibility
//! - Define values, keys, scopes and rows shared by codec, repository and
//!   store layers.
//!
//! # Invariants
//! - `(realm, owner_type, owner_id, key)` identifies at most one record.
//! - Deletion is physical; there are no tombstones.

pub mod key;
pub mod record;
pub mod scope;
pub mod value;
