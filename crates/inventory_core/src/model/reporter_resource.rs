//! Reporter natural key and per-reporter latest-state pointer.
//!
//! # Responsibility
//! - Define the externally supplied identity of one reporter's view.
//! - Track the latest version/generation written by that reporter.
//!
//! # Invariants
//! - Key matching is case-insensitive (ASCII), like the storage collation.
//! - `representation_version` is monotonic within one `generation`.
//! - `generation` increases only on tombstone to live transitions.

use super::resource::ResourceId;
use super::validation::{
    FieldValidator, ValidationError, MAX_API_HREF_LEN, MAX_CONSOLE_HREF_LEN,
    MAX_LOCAL_RESOURCE_ID_LEN, MAX_REPORTER_INSTANCE_ID_LEN, MAX_REPORTER_TYPE_LEN,
    MAX_RESOURCE_TYPE_LEN,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Surrogate identifier of a reporter resource row.
pub type ReporterResourceId = Uuid;

/// Natural identity of a reporter's view of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReporterResourceKey {
    pub local_resource_id: String,
    pub reporter_type: String,
    pub resource_type: String,
    pub reporter_instance_id: String,
}

impl ReporterResourceKey {
    pub fn new(
        local_resource_id: impl Into<String>,
        reporter_type: impl Into<String>,
        resource_type: impl Into<String>,
        reporter_instance_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let key = Self {
            local_resource_id: local_resource_id.into(),
            reporter_type: reporter_type.into(),
            resource_type: resource_type.into(),
            reporter_instance_id: reporter_instance_id.into(),
        };
        key.validate()?;
        Ok(key)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut validator = FieldValidator::new();
        self.collect_errors(&mut validator);
        validator.finish()
    }

    pub(crate) fn collect_errors(&self, validator: &mut FieldValidator) {
        validator.required(
            "local_resource_id",
            &self.local_resource_id,
            MAX_LOCAL_RESOURCE_ID_LEN,
        );
        validator.required("reporter_type", &self.reporter_type, MAX_REPORTER_TYPE_LEN);
        validator.required("resource_type", &self.resource_type, MAX_RESOURCE_TYPE_LEN);
        validator.required(
            "reporter_instance_id",
            &self.reporter_instance_id,
            MAX_REPORTER_INSTANCE_ID_LEN,
        );
    }

    /// Case-insensitive comparison of all four key parts.
    pub fn matches(&self, other: &Self) -> bool {
        self.local_resource_id
            .eq_ignore_ascii_case(&other.local_resource_id)
            && self.reporter_type.eq_ignore_ascii_case(&other.reporter_type)
            && self.resource_type.eq_ignore_ascii_case(&other.resource_type)
            && self
                .reporter_instance_id
                .eq_ignore_ascii_case(&other.reporter_instance_id)
    }
}

impl Display for ReporterResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.reporter_type, self.reporter_instance_id, self.resource_type, self.local_resource_id
        )
    }
}

/// Latest-state pointer for one reporter key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterResource {
    pub id: ReporterResourceId,
    pub key: ReporterResourceKey,
    pub resource_id: ResourceId,
    pub api_href: String,
    pub console_href: Option<String>,
    /// Latest snapshot version within `generation`.
    pub representation_version: u64,
    pub generation: u64,
    pub tombstone: bool,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl ReporterResource {
    /// Creates the first pointer for a key: version 1, generation 0, live.
    pub fn new(
        id: ReporterResourceId,
        key: ReporterResourceKey,
        resource_id: ResourceId,
        api_href: impl Into<String>,
        console_href: Option<String>,
    ) -> Result<Self, ValidationError> {
        let reporter_resource = Self {
            id,
            key,
            resource_id,
            api_href: api_href.into(),
            console_href,
            representation_version: 1,
            generation: 0,
            tombstone: false,
            created_at: None,
            updated_at: None,
        };
        reporter_resource.validate()?;
        Ok(reporter_resource)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut validator = FieldValidator::new();
        validator.not_nil("id", self.id);
        self.key.collect_errors(&mut validator);
        validator.not_nil("resource_id", self.resource_id);
        validator.required_url("api_href", &self.api_href, MAX_API_HREF_LEN);
        validator.optional_url(
            "console_href",
            self.console_href.as_deref(),
            MAX_CONSOLE_HREF_LEN,
        );
        validator.finish()
    }

    /// Returns `true` when this pointer is the live view of its reporter.
    pub fn is_live(&self) -> bool {
        !self.tombstone
    }
}
