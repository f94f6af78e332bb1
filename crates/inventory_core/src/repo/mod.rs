//! Repository layer for inventory persistence.
//!
//! # Responsibility
//! - Define the storage contract consumed by the use-case layer.
//! - Keep SQL inside one implementation bound to a transaction connection.
//!
//! # Invariants
//! - Write paths validate entities before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.

pub mod resource_repo;

pub use resource_repo::{ResourceRepository, SqliteResourceRepository};
