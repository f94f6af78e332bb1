//! Inventory use-case services.
//!
//! # Responsibility
//! - Turn report/delete requests into planned, persisted state transitions.
//! - Keep authorizer, producer and schema details behind narrow traits.

pub mod collaborators;
pub mod relay;
pub mod request;
pub mod resource_service;
pub mod schema;
pub mod transition;

mod tuples;

pub use resource_service::{ResourceHistory, ResourceService};
