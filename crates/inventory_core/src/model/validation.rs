//! Field-level validation shared by all inventory entities.
//!
//! # Responsibility
//! - Hold the field length limits used by constructors and storage.
//! - Collect every field violation of one construction call.
//!
//! # Invariants
//! - Exactly one violation is returned unwrapped as `ValidationError::Field`.
//! - Several violations are returned together, in check order.

use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub const MAX_LOCAL_RESOURCE_ID_LEN: usize = 128;
pub const MAX_REPORTER_TYPE_LEN: usize = 128;
pub const MAX_RESOURCE_TYPE_LEN: usize = 128;
pub const MAX_REPORTER_INSTANCE_ID_LEN: usize = 256;
pub const MAX_REPORTER_VERSION_LEN: usize = 128;
pub const MAX_API_HREF_LEN: usize = 512;
pub const MAX_CONSOLE_HREF_LEN: usize = 512;
pub const MAX_CONSISTENCY_TOKEN_LEN: usize = 1024;
pub const MAX_TRANSACTION_ID_LEN: usize = 128;

pub const MIN_VERSION: i64 = 0;
pub const MIN_GENERATION: i64 = 0;
pub const MIN_COMMON_VERSION: i64 = 0;

/// Kind of rule a field violated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldErrorKind {
    Required,
    TooLong { max: usize },
    TooSmall { min: i64 },
    InvalidUrl(String),
    InvalidUuid,
    InvalidData(String),
}

/// One field violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub kind: FieldErrorKind,
}

impl FieldError {
    pub fn new(field: &'static str, kind: FieldErrorKind) -> Self {
        Self { field, kind }
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            FieldErrorKind::Required => write!(f, "{}: cannot be empty", self.field),
            FieldErrorKind::TooLong { max } => write!(f, "{}: exceeds {max} chars", self.field),
            FieldErrorKind::TooSmall { min } => write!(f, "{}: must be >= {min}", self.field),
            FieldErrorKind::InvalidUrl(detail) => {
                write!(f, "{}: invalid url: {detail}", self.field)
            }
            FieldErrorKind::InvalidUuid => write!(f, "{}: invalid uuid", self.field),
            FieldErrorKind::InvalidData(detail) => {
                write!(f, "{}: invalid data: {detail}", self.field)
            }
        }
    }
}

impl Error for FieldError {}

/// Aggregated validation failure for one construction call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Field(FieldError),
    Multiple(Vec<FieldError>),
}

impl ValidationError {
    /// Returns all violations, in check order.
    pub fn errors(&self) -> &[FieldError] {
        match self {
            Self::Field(err) => std::slice::from_ref(err),
            Self::Multiple(errors) => errors.as_slice(),
        }
    }

    /// Returns the names of the violating fields.
    pub fn fields(&self) -> Vec<&'static str> {
        self.errors().iter().map(|err| err.field).collect()
    }

    /// Returns `true` when `field` has at least one violation of `kind`.
    pub fn has(&self, field: &str, kind: &FieldErrorKind) -> bool {
        self.errors()
            .iter()
            .any(|err| err.field == field && &err.kind == kind)
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Field(err) => write!(f, "{err}"),
            Self::Multiple(errors) => {
                for (index, err) in errors.iter().enumerate() {
                    if index > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            }
        }
    }
}

impl Error for ValidationError {}

impl From<FieldError> for ValidationError {
    fn from(value: FieldError) -> Self {
        Self::Field(value)
    }
}

/// Collector used by entity constructors.
#[derive(Debug, Default)]
pub struct FieldValidator {
    errors: Vec<FieldError>,
}

impl FieldValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Rejects empty or whitespace-only values, then checks the length.
    pub fn required(&mut self, field: &'static str, value: &str, max: usize) {
        if value.trim().is_empty() {
            self.push(FieldError::new(field, FieldErrorKind::Required));
            return;
        }
        self.max_len(field, value, max);
    }

    pub fn max_len(&mut self, field: &'static str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.push(FieldError::new(field, FieldErrorKind::TooLong { max }));
        }
    }

    pub fn optional(&mut self, field: &'static str, value: Option<&str>, max: usize) {
        if let Some(value) = value {
            self.max_len(field, value, max);
        }
    }

    /// Required absolute URL.
    pub fn required_url(&mut self, field: &'static str, value: &str, max: usize) {
        if value.trim().is_empty() {
            self.push(FieldError::new(field, FieldErrorKind::Required));
            return;
        }
        self.url(field, value, max);
    }

    /// Optional URL; `None` and empty strings are accepted.
    pub fn optional_url(&mut self, field: &'static str, value: Option<&str>, max: usize) {
        match value {
            Some(value) if !value.is_empty() => self.url(field, value, max),
            _ => {}
        }
    }

    pub fn not_nil(&mut self, field: &'static str, id: Uuid) {
        if id.is_nil() {
            self.push(FieldError::new(field, FieldErrorKind::InvalidUuid));
        }
    }

    pub fn finish(mut self) -> Result<(), ValidationError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(ValidationError::Field(self.errors.remove(0))),
            _ => Err(ValidationError::Multiple(self.errors)),
        }
    }

    fn url(&mut self, field: &'static str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.push(FieldError::new(field, FieldErrorKind::TooLong { max }));
            return;
        }
        if let Err(err) = url::Url::parse(value) {
            self.push(FieldError::new(
                field,
                FieldErrorKind::InvalidUrl(err.to_string()),
            ));
        }
    }
}

/// Converts a signed counter read from storage into the in-memory unsigned
/// form, rejecting negative values.
pub fn counter_from_db(field: &'static str, raw: i64, min: i64) -> Result<u64, FieldError> {
    if raw < min {
        return Err(FieldError::new(field, FieldErrorKind::TooSmall { min }));
    }
    u64::try_from(raw).map_err(|_| FieldError::new(field, FieldErrorKind::TooSmall { min }))
}
