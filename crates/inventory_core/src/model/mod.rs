//! Inventory domain model.
//!
//! # Responsibility
//! - Define the canonical resource, per-reporter pointers and snapshots.
//! - Validate every entity at construction time.
//!
//! # Invariants
//! - Deletion is represented by tombstones, never by removing rows.
//! - Per-key `(generation, representation_version)` pairs only increase.

pub mod change_set;
pub mod event;
pub mod outcome;
pub mod reporter_resource;
pub mod representation;
pub mod resource;
pub mod validation;
