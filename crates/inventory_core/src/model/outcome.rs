//! Transaction identifiers and recorded mutation outcomes.
//!
//! # Responsibility
//! - Carry the idempotency token of one logical operation.
//! - Describe what an operation did, so a replay can return the same result.
//!
//! # Invariants
//! - A transaction id is non-empty and at most 128 chars.
//! - One ledger entry exists per applied caller-supplied transaction id.
//! - Generated ids are never written to the ledger.

use super::event::OperationType;
use super::reporter_resource::ReporterResourceId;
use super::resource::ResourceId;
use super::validation::{FieldValidator, ValidationError, MAX_TRANSACTION_ID_LEN};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Idempotency token of one logical operation.
///
/// Equality and hashing look at the id text only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId {
    value: String,
    #[serde(skip)]
    generated: bool,
}

impl TransactionId {
    /// Validates a caller-supplied id.
    pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        let mut validator = FieldValidator::new();
        validator.required("transaction_id", &value, MAX_TRANSACTION_ID_LEN);
        validator.finish()?;
        Ok(Self {
            value,
            generated: false,
        })
    }

    /// Generates a fresh time-ordered id for callers that supplied none.
    pub fn generate() -> Self {
        Self {
            value: Uuid::now_v7().to_string(),
            generated: true,
        }
    }

    /// Uses the caller id when present and non-blank, otherwise generates one.
    pub fn from_optional(value: Option<&str>) -> Result<Self, ValidationError> {
        match value {
            Some(value) if !value.trim().is_empty() => Self::parse(value),
            _ => Ok(Self::generate()),
        }
    }

    /// `true` when the store minted this id; such ids are not replayable.
    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl PartialEq for TransactionId {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for TransactionId {}

impl Hash for TransactionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

/// Kind of request recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Report,
    Delete,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "report" => Some(Self::Report),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// State transition applied to one reporter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// First report for the key.
    Created,
    /// Changed report on a live key; version bumped.
    Updated,
    /// Report on a tombstoned key; generation bumped.
    Revived,
    /// Live key tombstoned.
    Deleted,
    /// Identical report; nothing written.
    Unchanged,
    /// Delete of an already tombstoned key; nothing written.
    AlreadyDeleted,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Revived => "revived",
            Self::Deleted => "deleted",
            Self::Unchanged => "unchanged",
            Self::AlreadyDeleted => "already_deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "revived" => Some(Self::Revived),
            "deleted" => Some(Self::Deleted),
            "unchanged" => Some(Self::Unchanged),
            "already_deleted" => Some(Self::AlreadyDeleted),
            _ => None,
        }
    }

    /// Event operation emitted for this outcome; `None` for no-ops.
    pub fn operation_type(self) -> Option<OperationType> {
        match self {
            Self::Created => Some(OperationType::Created),
            Self::Updated | Self::Revived => Some(OperationType::Updated),
            Self::Deleted => Some(OperationType::Deleted),
            Self::Unchanged | Self::AlreadyDeleted => None,
        }
    }

    pub fn is_noop(self) -> bool {
        self.operation_type().is_none()
    }
}

/// Result of one report or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub kind: OutcomeKind,
    pub transaction_id: TransactionId,
    pub resource_id: ResourceId,
    pub reporter_resource_id: ReporterResourceId,
    pub representation_version: u64,
    pub generation: u64,
    pub common_version: u64,
    /// Reporter resource tombstone after the operation.
    pub tombstone: bool,
    /// `true` when served from the ledger without applying effects.
    pub replayed: bool,
}

impl MutationOutcome {
    pub fn operation_type(&self) -> Option<OperationType> {
        self.kind.operation_type()
    }

    /// Marks an outcome loaded from the ledger.
    pub fn into_replayed(self) -> Self {
        Self {
            replayed: true,
            ..self
        }
    }
}

/// One row of the processed-transaction ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedTransaction {
    pub request: RequestKind,
    pub outcome: MutationOutcome,
    pub created_at: Option<i64>,
}
