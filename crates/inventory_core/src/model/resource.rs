//! Canonical resource anchor.
//!
//! # Responsibility
//! - Define the reporter-agnostic identity every reporter view attaches to.
//!
//! # Invariants
//! - `common_version` only increases for one `id`.
//! - `(id, common_version)` is a historical coordinate; the highest one is current.
//! - `tombstone` is true only once every reporter of the resource is tombstoned.

use super::validation::{
    FieldValidator, ValidationError, MAX_CONSISTENCY_TOKEN_LEN, MAX_RESOURCE_TYPE_LEN,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable canonical resource identifier.
pub type ResourceId = Uuid;

/// One canonical coordinate of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    /// Serialized as `type` to match the persisted column name.
    #[serde(rename = "type")]
    pub resource_type: String,
    pub common_version: u64,
    /// Opaque authorization token, passed through unmodified.
    pub consistency_token: String,
    pub tombstone: bool,
    /// Unix epoch milliseconds; `None` until persisted.
    pub created_at: Option<i64>,
    /// Unix epoch milliseconds; `None` until persisted.
    pub updated_at: Option<i64>,
}

impl Resource {
    /// Creates a validated live resource at `common_version`.
    pub fn new(
        id: ResourceId,
        resource_type: impl Into<String>,
        common_version: u64,
        consistency_token: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let resource = Self {
            id,
            resource_type: resource_type.into(),
            common_version,
            consistency_token: consistency_token.into(),
            tombstone: false,
            created_at: None,
            updated_at: None,
        };
        resource.validate()?;
        Ok(resource)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut validator = FieldValidator::new();
        validator.not_nil("id", self.id);
        validator.required("type", &self.resource_type, MAX_RESOURCE_TYPE_LEN);
        validator.max_len(
            "consistency_token",
            &self.consistency_token,
            MAX_CONSISTENCY_TOKEN_LEN,
        );
        validator.finish()
    }

    /// Returns the next canonical coordinate of this resource.
    pub fn next_version(&self) -> Self {
        Self {
            common_version: self.common_version + 1,
            created_at: None,
            updated_at: None,
            ..self.clone()
        }
    }
}
