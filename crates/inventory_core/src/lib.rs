//! Resource inventory versioning and transactional storage.
//! Reporters submit their own view of a resource; this crate reconciles the
//! views into canonical state and keeps every submission's history.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use config::{AuthorityPolicy, ConfigError, LoggingConfig, StoreConfig};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::event::{AggregateType, OperationType, OutboxEvent};
pub use model::outcome::{MutationOutcome, OutcomeKind, TransactionId};
pub use model::reporter_resource::{ReporterResource, ReporterResourceKey};
pub use model::representation::{
    CommonRepresentation, Representation, ReporterRepresentation, Representations,
};
pub use model::resource::{Resource, ResourceId};
pub use model::validation::ValidationError;
pub use repo::{ResourceRepository, SqliteResourceRepository};
pub use service::request::{DeleteRequest, ReportRequest};
pub use service::{ResourceHistory, ResourceService};
pub use store::context::OperationContext;
pub use store::outbox::EventSource;
pub use store::{Store, Tx};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
