//! Outbox event shapes.
//!
//! # Responsibility
//! - Name the operation carried by a change event.
//! - Define outbox rows and their JSON payloads.
//!
//! # Invariants
//! - Outbox rows are written in the same transaction as the mutation.
//! - One logical change produces one resource event.

use super::reporter_resource::{ReporterResource, ReporterResourceId};
use super::representation::Representation;
use super::resource::{Resource, ResourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Operation carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Created,
    Updated,
    Deleted,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Outbox stream an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateType {
    /// Resource change events.
    #[serde(rename = "kessel.resources")]
    Resources,
    /// Workspace relationship replication events.
    #[serde(rename = "kessel.tuples")]
    Tuples,
}

impl AggregateType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resources => "kessel.resources",
            Self::Tuples => "kessel.tuples",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "kessel.resources" => Some(Self::Resources),
            "kessel.tuples" => Some(Self::Tuples),
            _ => None,
        }
    }
}

/// One row of the transactional outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: AggregateType,
    /// Canonical resource id the event describes.
    pub aggregate_id: String,
    pub operation: OperationType,
    pub transaction_id: String,
    pub payload: Value,
    pub created_at: Option<i64>,
    /// `None` while the event is still pending delivery.
    pub acknowledged_at: Option<i64>,
    /// Relay currently delivering the event, if any.
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
}

impl OutboxEvent {
    pub fn new(
        aggregate_type: AggregateType,
        aggregate_id: ResourceId,
        operation: OperationType,
        transaction_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            aggregate_type,
            aggregate_id: aggregate_id.to_string(),
            operation,
            transaction_id: transaction_id.into(),
            payload,
            created_at: None,
            acknowledged_at: None,
            claimed_by: None,
            claimed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.acknowledged_at.is_none()
    }

    /// Resource type named in the payload, used for producer lookup.
    pub fn resource_type(&self) -> Option<&str> {
        self.payload.get("resource_type").and_then(Value::as_str)
    }
}

/// Reporter block of a resource event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReporter {
    pub reporter_resource_id: ReporterResourceId,
    pub reporter_type: String,
    pub reporter_instance_id: String,
    pub local_resource_id: String,
    pub api_href: String,
    pub console_href: Option<String>,
    pub reporter_version: Option<String>,
    pub representation_version: u64,
    pub generation: u64,
}

/// Payload of a `kessel.resources` outbox event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEventPayload {
    /// `redhat.inventory.resources.<resource_type>.<operation>`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// `/resources/<resource_type>/<resource_id>`.
    pub subject: String,
    pub resource_id: ResourceId,
    pub resource_type: String,
    pub common_version: u64,
    pub tombstone: bool,
    pub reporter: EventReporter,
    /// Reporter-submitted data; absent for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_data: Option<Representation>,
}

impl ResourceEventPayload {
    pub fn new(
        operation: OperationType,
        resource: &Resource,
        reporter_resource: &ReporterResource,
        reporter_version: Option<String>,
        resource_data: Option<Representation>,
    ) -> Self {
        Self {
            event_type: format!(
                "redhat.inventory.resources.{}.{}",
                resource.resource_type,
                operation.as_str()
            ),
            subject: format!("/resources/{}/{}", resource.resource_type, resource.id),
            resource_id: resource.id,
            resource_type: resource.resource_type.clone(),
            common_version: resource.common_version,
            tombstone: resource.tombstone,
            reporter: EventReporter {
                reporter_resource_id: reporter_resource.id,
                reporter_type: reporter_resource.key.reporter_type.clone(),
                reporter_instance_id: reporter_resource.key.reporter_instance_id.clone(),
                local_resource_id: reporter_resource.key.local_resource_id.clone(),
                api_href: reporter_resource.api_href.clone(),
                console_href: reporter_resource.console_href.clone(),
                reporter_version,
                representation_version: reporter_resource.representation_version,
                generation: reporter_resource.generation,
            },
            resource_data,
        }
    }
}

/// Payload of a `kessel.tuples` outbox event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceTupleEventPayload {
    pub resource_id: ResourceId,
    pub resource_type: String,
    pub reporter_type: String,
    pub current_workspace_id: Option<String>,
    pub previous_workspace_id: Option<String>,
}
