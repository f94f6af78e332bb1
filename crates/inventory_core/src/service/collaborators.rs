//! Narrow traits for the services the store talks to.
//!
//! # Responsibility
//! - Abstract authorization checks, event producers and payload schemas.
//! - Provide an in-memory producer for embedding and tests.
//!
//! # Invariants
//! - Consistency tokens are passed through unmodified.

use crate::model::event::OutboxEvent;
use crate::model::representation::Representation;
use crate::model::reporter_resource::ReporterResourceKey;
use crate::model::resource::{Resource, ResourceId};
use crate::store::context::OperationContext;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorError {
    pub collaborator: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}

impl Display for CollaboratorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.collaborator, self.message)
    }
}

impl Error for CollaboratorError {}

/// Resource being checked, as seen by the authorizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCoordinates {
    pub inventory_id: ResourceId,
    pub resource_type: String,
    pub local_resource_id: String,
    pub reporter_type: String,
    pub reporter_instance_id: String,
}

impl ResourceCoordinates {
    pub fn new(resource: &Resource, key: &ReporterResourceKey) -> Self {
        Self {
            inventory_id: resource.id,
            resource_type: key.resource_type.clone(),
            local_resource_id: key.local_resource_id.clone(),
            reporter_type: key.reporter_type.clone(),
            reporter_instance_id: key.reporter_instance_id.clone(),
        }
    }
}

/// Principal an authorization check is made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectReference {
    pub subject_type: String,
    pub subject_id: String,
    /// Optional subject relation, e.g. `member` of a group.
    pub relation: Option<String>,
}

impl SubjectReference {
    pub fn new(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            relation: None,
        }
    }
}

/// Authorizer answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthzDecision {
    pub allowed: bool,
    /// Token to store for later consistent reads; `None` keeps the old one.
    pub consistency_token: Option<String>,
}

pub trait Authorizer: Send + Sync {
    fn check(
        &self,
        ctx: &OperationContext,
        namespace: &str,
        relation: &str,
        consistency_token: &str,
        resource: &ResourceCoordinates,
        subject: &SubjectReference,
    ) -> Result<AuthzDecision, CollaboratorError>;

    fn check_for_update(
        &self,
        ctx: &OperationContext,
        namespace: &str,
        relation: &str,
        consistency_token: &str,
        resource: &ResourceCoordinates,
        subject: &SubjectReference,
    ) -> Result<AuthzDecision, CollaboratorError>;
}

/// Delivers one outbox event downstream.
pub trait Producer: Send + Sync {
    fn produce(&self, ctx: &OperationContext, event: &OutboxEvent) -> Result<(), CollaboratorError>;
}

/// Resolves the producer responsible for one resource.
pub trait Eventer: Send + Sync {
    fn lookup(
        &self,
        identity: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Arc<dyn Producer>, CollaboratorError>;
}

/// Payload rejected by a schema rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub resource_type: String,
    pub reporter_type: String,
    pub message: String,
}

impl Display for SchemaViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}: {}",
            self.resource_type, self.reporter_type, self.message
        )
    }
}

impl Error for SchemaViolation {}

pub trait SchemaValidator: Send + Sync {
    fn validate(
        &self,
        resource_type: &str,
        reporter_type: &str,
        data: &Representation,
    ) -> Result<(), SchemaViolation>;
}

/// Producer keeping delivered events in memory.
#[derive(Debug, Default)]
pub struct RecordingProducer {
    events: Mutex<Vec<OutboxEvent>>,
    failing: AtomicBool,
}

impl RecordingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes later `produce` calls fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<OutboxEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Producer for RecordingProducer {
    fn produce(&self, _ctx: &OperationContext, event: &OutboxEvent) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("producer", "delivery refused"));
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Eventer routing every resource to one producer.
#[derive(Clone)]
pub struct SingleProducerEventer {
    producer: Arc<dyn Producer>,
}

impl SingleProducerEventer {
    pub fn new(producer: Arc<dyn Producer>) -> Self {
        Self { producer }
    }
}

impl Eventer for SingleProducerEventer {
    fn lookup(
        &self,
        _identity: &str,
        _resource_type: &str,
        _id: &str,
    ) -> Result<Arc<dyn Producer>, CollaboratorError> {
        Ok(Arc::clone(&self.producer))
    }
}
