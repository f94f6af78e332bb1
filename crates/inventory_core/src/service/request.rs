//! Inbound report and delete requests.
//!
//! # Invariants
//! - Requests are validated as a whole before any transaction opens.
//! - A blank transaction id is treated as absent.

use crate::model::reporter_resource::ReporterResourceKey;
use crate::model::representation::Representation;
use crate::model::resource::ResourceId;
use crate::model::validation::{
    FieldValidator, ValidationError, MAX_API_HREF_LEN, MAX_CONSOLE_HREF_LEN,
    MAX_REPORTER_VERSION_LEN, MAX_TRANSACTION_ID_LEN,
};

/// One reporter's submission for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub key: ReporterResourceKey,
    /// Reporter-specific payload stored as a snapshot.
    pub data: Representation,
    /// Explicit canonical payload; `data` is used when absent.
    pub common: Option<Representation>,
    pub api_href: String,
    pub console_href: Option<String>,
    pub reporter_version: Option<String>,
    /// Canonical id the reporter wants to attach to.
    pub inventory_id: Option<ResourceId>,
    pub transaction_id: Option<String>,
}

impl ReportRequest {
    pub fn new(
        key: ReporterResourceKey,
        data: Representation,
        api_href: impl Into<String>,
    ) -> Self {
        Self {
            key,
            data,
            common: None,
            api_href: api_href.into(),
            console_href: None,
            reporter_version: None,
            inventory_id: None,
            transaction_id: None,
        }
    }

    pub fn with_common(mut self, common: Representation) -> Self {
        self.common = Some(common);
        self
    }

    pub fn with_console_href(mut self, console_href: impl Into<String>) -> Self {
        self.console_href = Some(console_href.into());
        self
    }

    pub fn with_reporter_version(mut self, reporter_version: impl Into<String>) -> Self {
        self.reporter_version = Some(reporter_version.into());
        self
    }

    pub fn with_inventory_id(mut self, inventory_id: ResourceId) -> Self {
        self.inventory_id = Some(inventory_id);
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    /// Canonical payload this report proposes.
    pub fn canonical_data(&self) -> &Representation {
        self.common.as_ref().unwrap_or(&self.data)
    }

    /// Checks every field and reports all violations at once.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut validator = FieldValidator::new();
        self.key.collect_errors(&mut validator);
        validator.required_url("api_href", &self.api_href, MAX_API_HREF_LEN);
        validator.optional_url(
            "console_href",
            self.console_href.as_deref(),
            MAX_CONSOLE_HREF_LEN,
        );
        validator.optional(
            "reporter_version",
            self.reporter_version.as_deref(),
            MAX_REPORTER_VERSION_LEN,
        );
        if let Some(inventory_id) = self.inventory_id {
            validator.not_nil("inventory_id", inventory_id);
        }
        validator.optional(
            "transaction_id",
            self.transaction_id.as_deref(),
            MAX_TRANSACTION_ID_LEN,
        );
        validator.finish()
    }
}

/// Delete of one reporter key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub key: ReporterResourceKey,
    pub transaction_id: Option<String>,
}

impl DeleteRequest {
    pub fn new(key: ReporterResourceKey) -> Self {
        Self {
            key,
            transaction_id: None,
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut validator = FieldValidator::new();
        self.key.collect_errors(&mut validator);
        validator.optional(
            "transaction_id",
            self.transaction_id.as_deref(),
            MAX_TRANSACTION_ID_LEN,
        );
        validator.finish()
    }
}
