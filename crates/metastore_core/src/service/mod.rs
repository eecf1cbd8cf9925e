//! Core use-case services.
//!
//! # Responsibility
//! - Turn repository row I/O into typed metadata operations.
//! - Keep callers decoupled from storage details.

pub mod meta_store;
