//! Ordered write set for one logical operation.
//!
//! # Invariants
//! - Rows are written in order: resource, reporter resource, reporter
//!   snapshot, canonical state.
//! - A `CommonRepresentation` is present exactly when a new resource row is
//!   appended, and its version equals that row's `common_version`.

use super::outcome::{MutationOutcome, OutcomeKind, TransactionId};
use super::representation::{CommonRepresentation, ReporterRepresentation};
use super::reporter_resource::ReporterResource;
use super::resource::Resource;
use super::validation::ValidationError;

/// How the canonical resource row is affected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceWrite {
    /// Insert a new `(id, common_version)` row.
    Append(Resource),
    /// Flag the current row as tombstoned in place.
    MarkTombstone(Resource),
    /// Leave the canonical rows untouched.
    Keep(Resource),
}

impl ResourceWrite {
    pub fn resource(&self) -> &Resource {
        match self {
            Self::Append(resource) | Self::MarkTombstone(resource) | Self::Keep(resource) => {
                resource
            }
        }
    }
}

/// How the reporter resource pointer is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWrite {
    Insert,
    Update,
}

/// Everything one create/update/revive/delete persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub kind: OutcomeKind,
    pub resource: ResourceWrite,
    pub reporter_resource: ReporterResource,
    pub pointer_write: PointerWrite,
    pub reporter_representation: ReporterRepresentation,
    pub common_representation: Option<CommonRepresentation>,
}

impl ChangeSet {
    pub fn resource(&self) -> &Resource {
        self.resource.resource()
    }

    /// Validates every entity and the cross-row version links.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.resource().validate()?;
        self.reporter_resource.validate()?;
        self.reporter_representation.validate()?;
        if let Some(common) = &self.common_representation {
            common.validate()?;
        }
        Ok(())
    }

    /// Returns `true` when the canonical rows and the snapshot agree.
    pub fn is_consistent(&self) -> bool {
        let resource = self.resource();
        let appended = matches!(self.resource, ResourceWrite::Append(_));
        let common_matches = match &self.common_representation {
            Some(common) => {
                appended
                    && common.resource_id == resource.id
                    && common.version == resource.common_version
            }
            None => !appended,
        };
        common_matches
            && self.reporter_resource.resource_id == resource.id
            && self.reporter_representation.reporter_resource_id == self.reporter_resource.id
            && self.reporter_representation.version == self.reporter_resource.representation_version
            && self.reporter_representation.generation == self.reporter_resource.generation
            && self.reporter_representation.common_version == resource.common_version
    }

    pub fn outcome(&self, transaction_id: &TransactionId) -> MutationOutcome {
        let resource = self.resource();
        MutationOutcome {
            kind: self.kind,
            transaction_id: transaction_id.clone(),
            resource_id: resource.id,
            reporter_resource_id: self.reporter_resource.id,
            representation_version: self.reporter_resource.representation_version,
            generation: self.reporter_resource.generation,
            common_version: resource.common_version,
            tombstone: self.reporter_resource.tombstone,
            replayed: false,
        }
    }
}
