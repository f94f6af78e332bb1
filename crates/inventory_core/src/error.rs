//! Store-level error taxonomy.
//!
//! # Responsibility
//! - Give every failure a stable, distinguishable `ErrorKind`.
//! - Keep persistence details wrapped, not flattened into strings.
//!
//! # Invariants
//! - Validation failures never reach the database.
//! - A replayed transaction id is a success, never an error.

use crate::config::ConfigError;
use crate::db::DbError;
use crate::model::reporter_resource::ReporterResourceKey;
use crate::model::resource::ResourceId;
use crate::model::validation::{FieldError, ValidationError};
use crate::service::collaborators::CollaboratorError;
use crate::store::context::CancelReason;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Stable error class surfaced to layers above the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    ConsistencyMismatch,
    Validation,
    Database,
    Cancelled,
    Unavailable,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::ConsistencyMismatch => "consistency_mismatch",
            Self::Validation => "validation",
            Self::Database => "database",
            Self::Cancelled => "cancelled",
            Self::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    /// No reporter resource or canonical resource matches the lookup.
    ResourceNotFound(String),
    /// Strict create hit a live record for the same key.
    ResourceAlreadyExists(ReporterResourceKey),
    /// Caller-supplied canonical id disagrees with the stored one.
    InventoryIdMismatch {
        requested: ResourceId,
        stored: ResourceId,
    },
    Validation(ValidationError),
    /// Persisted state that cannot be decoded into a domain value.
    InvalidData(String),
    /// Payload rejected by the schema validator.
    Schema(String),
    Db(DbError),
    /// Serialization conflicts persisted through every attempt.
    SerializationExhausted {
        operation: &'static str,
        attempts: u32,
        last: DbError,
    },
    Cancelled(CancelReason),
    /// Authorizer or producer failure.
    Collaborator(String),
    Config(ConfigError),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ResourceNotFound(_) => ErrorKind::NotFound,
            Self::ResourceAlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InventoryIdMismatch { .. } => ErrorKind::ConsistencyMismatch,
            Self::Validation(_) | Self::Schema(_) | Self::Config(_) => ErrorKind::Validation,
            Self::InvalidData(_) | Self::Db(_) | Self::SerializationExhausted { .. } => {
                ErrorKind::Database
            }
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Collaborator(_) => ErrorKind::Unavailable,
        }
    }

    pub fn not_found_for_key(key: &ReporterResourceKey) -> Self {
        Self::ResourceNotFound(format!("reporter resource {key}"))
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResourceNotFound(what) => write!(f, "resource not found: {what}"),
            Self::ResourceAlreadyExists(key) => write!(f, "resource already exists: {key}"),
            Self::InventoryIdMismatch { requested, stored } => write!(
                f,
                "resource inventory id mismatch: requested {requested}, stored {stored}"
            ),
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Schema(message) => write!(f, "schema validation failed: {message}"),
            Self::Db(err) => write!(f, "database error: {err}"),
            Self::SerializationExhausted {
                operation,
                attempts,
                last,
            } => write!(
                f,
                "database error: {operation} gave up after {attempts} serialization failures: {last}"
            ),
            Self::Cancelled(reason) => write!(f, "operation {reason}"),
            Self::Collaborator(message) => write!(f, "collaborator failure: {message}"),
            Self::Config(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::SerializationExhausted { last, .. } => Some(last),
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for StoreError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<FieldError> for StoreError {
    fn from(value: FieldError) -> Self {
        Self::Validation(value.into())
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<CollaboratorError> for StoreError {
    fn from(value: CollaboratorError) -> Self {
        Self::Collaborator(value.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
