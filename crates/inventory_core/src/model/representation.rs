//! Reporter snapshots, canonical state and the shared JSON payload.
//!
//! # Responsibility
//! - Wrap reporter-supplied JSON objects as opaque `Representation` values.
//! - Define append-only `ReporterRepresentation` snapshots.
//! - Define versioned `CommonRepresentation` canonical state.
//!
//! # Invariants
//! - Reporter snapshots are never rewritten once persisted.
//! - `CommonRepresentation.version` equals the `Resource.common_version` it introduced.
//! - Payloads are JSON objects; arrays and scalars are rejected at the boundary.

use super::reporter_resource::ReporterResourceId;
use super::resource::ResourceId;
use super::validation::{
    FieldError, FieldErrorKind, FieldValidator, ValidationError, MAX_REPORTER_INSTANCE_ID_LEN,
    MAX_REPORTER_TYPE_LEN, MAX_REPORTER_VERSION_LEN, MAX_TRANSACTION_ID_LEN,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque JSON object submitted by a reporter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Representation(Map<String, Value>);

impl Representation {
    pub fn new(data: Map<String, Value>) -> Self {
        Self(data)
    }

    /// Accepts only JSON objects.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(FieldError::new(
                "data",
                FieldErrorKind::InvalidData(format!("expected a JSON object, got {other}")),
            )
            .into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for Representation {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

/// Immutable snapshot of what one reporter submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterRepresentation {
    pub reporter_resource_id: ReporterResourceId,
    pub version: u64,
    pub generation: u64,
    pub data: Representation,
    /// Reporter's own semantic version label.
    pub reporter_version: Option<String>,
    /// Canonical version in effect when this snapshot was recorded.
    pub common_version: u64,
    pub transaction_id: String,
    /// `true` when this snapshot records a delete.
    pub tombstone: bool,
    pub created_at: Option<i64>,
}

impl ReporterRepresentation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reporter_resource_id: ReporterResourceId,
        version: u64,
        generation: u64,
        data: Representation,
        reporter_version: Option<String>,
        common_version: u64,
        transaction_id: impl Into<String>,
        tombstone: bool,
    ) -> Result<Self, ValidationError> {
        let snapshot = Self {
            reporter_resource_id,
            version,
            generation,
            data,
            reporter_version,
            common_version,
            transaction_id: transaction_id.into(),
            tombstone,
            created_at: None,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut validator = FieldValidator::new();
        validator.not_nil("reporter_resource_id", self.reporter_resource_id);
        validator.max_len(
            "transaction_id",
            &self.transaction_id,
            MAX_TRANSACTION_ID_LEN,
        );
        validator.optional(
            "reporter_version",
            self.reporter_version.as_deref(),
            MAX_REPORTER_VERSION_LEN,
        );
        validator.finish()
    }
}

/// Canonical state of a resource at one common version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonRepresentation {
    pub resource_id: ResourceId,
    pub version: u64,
    pub data: Representation,
    /// Reporter that supplied this canonical view.
    pub reported_by_reporter_type: String,
    pub reported_by_reporter_instance: String,
    pub transaction_id: String,
    pub created_at: Option<i64>,
}

impl CommonRepresentation {
    pub fn new(
        resource_id: ResourceId,
        version: u64,
        data: Representation,
        reported_by_reporter_type: impl Into<String>,
        reported_by_reporter_instance: impl Into<String>,
        transaction_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let common = Self {
            resource_id,
            version,
            data,
            reported_by_reporter_type: reported_by_reporter_type.into(),
            reported_by_reporter_instance: reported_by_reporter_instance.into(),
            transaction_id: transaction_id.into(),
            created_at: None,
        };
        common.validate()?;
        Ok(common)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut validator = FieldValidator::new();
        validator.not_nil("resource_id", self.resource_id);
        validator.required(
            "reported_by_reporter_type",
            &self.reported_by_reporter_type,
            MAX_REPORTER_TYPE_LEN,
        );
        validator.required(
            "reported_by_reporter_instance",
            &self.reported_by_reporter_instance,
            MAX_REPORTER_INSTANCE_ID_LEN,
        );
        validator.max_len(
            "transaction_id",
            &self.transaction_id,
            MAX_TRANSACTION_ID_LEN,
        );
        validator.finish()
    }

    /// Returns `true` when this canonical view was supplied by the given reporter.
    pub fn is_reported_by(&self, reporter_type: &str, reporter_instance: &str) -> bool {
        self.reported_by_reporter_type
            .eq_ignore_ascii_case(reporter_type)
            && self
                .reported_by_reporter_instance
                .eq_ignore_ascii_case(reporter_instance)
    }
}

/// Reporter snapshot and canonical state observed at one point in time.
///
/// At least one side is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representations {
    common: Option<CommonRepresentation>,
    reporter: Option<ReporterRepresentation>,
}

impl Representations {
    pub fn new(
        common: Option<CommonRepresentation>,
        reporter: Option<ReporterRepresentation>,
    ) -> Option<Self> {
        if common.is_none() && reporter.is_none() {
            return None;
        }
        Some(Self { common, reporter })
    }

    pub fn common(&self) -> Option<&CommonRepresentation> {
        self.common.as_ref()
    }

    pub fn reporter(&self) -> Option<&ReporterRepresentation> {
        self.reporter.as_ref()
    }

    pub fn common_version(&self) -> Option<u64> {
        self.common.as_ref().map(|common| common.version)
    }

    pub fn reporter_version(&self) -> Option<(u64, u64)> {
        self.reporter
            .as_ref()
            .map(|reporter| (reporter.generation, reporter.version))
    }
}

#[cfg(test)]
mod tests {
    use super::{CommonRepresentation, Representation, ReporterRepresentation, Representations};
    use crate::model::validation::FieldErrorKind;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn representation_accepts_only_objects() {
        let data = Representation::from_value(json!({"hostname": "a"})).expect("object is valid");
        assert_eq!(data.get("hostname"), Some(&json!("a")));
        let error = Representation::from_value(json!([1, 2])).expect_err("array must fail");
        assert_eq!(error.fields(), vec!["data"]);
    }

    #[test]
    fn common_representation_names_both_missing_reporter_fields() {
        let error =
            CommonRepresentation::new(Uuid::now_v7(), 1, Representation::default(), "", " ", "")
                .expect_err("missing reporter fields must fail");
        let message = error.to_string();
        assert!(message.contains("reported_by_reporter_type"));
        assert!(message.contains("reported_by_reporter_instance"));
    }

    #[test]
    fn reporter_representation_checks_identity_and_lengths() {
        let error = ReporterRepresentation::new(
            Uuid::nil(),
            1,
            0,
            Representation::default(),
            Some("v".repeat(129)),
            1,
            "tx",
            false,
        )
        .expect_err("invalid snapshot must fail");
        assert!(error.has("reporter_resource_id", &FieldErrorKind::InvalidUuid));
        assert!(error.has("reporter_version", &FieldErrorKind::TooLong { max: 128 }));
    }

    #[test]
    fn representations_require_one_side() {
        assert!(Representations::new(None, None).is_none());
        let common = CommonRepresentation::new(
            Uuid::now_v7(),
            2,
            Representation::default(),
            "hbi",
            "i1",
            "",
        )
        .expect("valid common");
        let pair = Representations::new(Some(common), None).expect("one side is enough");
        assert_eq!(pair.common_version(), Some(2));
        assert!(pair.reporter().is_none());
        assert!(pair
            .common()
            .is_some_and(|common| common.is_reported_by("HBI", "I1")));
    }
}
