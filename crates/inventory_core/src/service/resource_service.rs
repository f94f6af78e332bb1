//! Resource report/delete use cases.
//!
//! # Responsibility
//! - Validate requests, then run the read-decide-write unit in one
//!   serializable transaction.
//! - Gate every operation on its transaction id and record the outcome.
//! - Relay committed outbox events and pass authorization checks through.
//!
//! # Invariants
//! - A replayed transaction id returns the recorded outcome and writes nothing.
//! - Every applied operation with a caller-supplied transaction id writes
//!   exactly one ledger entry, in the same transaction as its rows.
//! - Delivery failures after commit never fail the operation.

use crate::config::AuthorityPolicy;
use crate::error::{StoreError, StoreResult};
use crate::model::event::OperationType;
use crate::model::outcome::{MutationOutcome, RequestKind, TransactionId};
use crate::model::reporter_resource::{ReporterResource, ReporterResourceKey};
use crate::model::representation::{CommonRepresentation, Representations, ReporterRepresentation};
use crate::model::resource::Resource;
use crate::repo::ResourceRepository;
use crate::service::collaborators::{
    Authorizer, Eventer, ResourceCoordinates, SchemaValidator, SubjectReference,
};
use crate::service::relay::OutboxRelay;
use crate::service::request::{DeleteRequest, ReportRequest};
use crate::service::schema::SchemaRegistry;
use crate::service::transition::{plan_delete, plan_report, DeleteState, NewIds, Plan, ReportState};
use crate::service::tuples::append_workspace_tuple_event;
use crate::store::context::OperationContext;
use crate::store::outbox::SqliteEventSource;
use crate::store::Store;
use log::{info, warn};
use std::sync::Arc;

/// Everything stored for one reporter key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHistory {
    pub resource: Resource,
    pub reporter_resource: ReporterResource,
    /// Ordered by `(generation, version)`.
    pub reporter_representations: Vec<ReporterRepresentation>,
    /// Ordered by version.
    pub common_representations: Vec<CommonRepresentation>,
}

/// Use-case facade over the transactional store.
pub struct ResourceService {
    store: Store,
    schema: Arc<dyn SchemaValidator>,
    authorizer: Option<Arc<dyn Authorizer>>,
    relay: Option<OutboxRelay<SqliteEventSource>>,
}

impl ResourceService {
    /// Creates a service with the default schema rules and no collaborators.
    pub fn new(store: Store) -> Self {
        Self {
            store,
            schema: Arc::new(SchemaRegistry::default()),
            authorizer: None,
            relay: None,
        }
    }

    pub fn with_schema_validator(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Relays committed events to producers resolved for `identity`.
    pub fn with_eventer(mut self, eventer: Arc<dyn Eventer>, identity: impl Into<String>) -> Self {
        let lease = self.store.config().outbox_claim_lease();
        self.relay = Some(
            OutboxRelay::new(self.store.event_source(), eventer, identity).with_claim_lease(lease),
        );
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Creates, updates or revives the reporter's view of a resource.
    pub fn report(
        &self,
        ctx: &OperationContext,
        request: &ReportRequest,
    ) -> StoreResult<MutationOutcome> {
        self.run_report(ctx, request, false)
    }

    /// Like `report`, but fails with `ResourceAlreadyExists` when the key is
    /// already live.
    pub fn create(
        &self,
        ctx: &OperationContext,
        request: &ReportRequest,
    ) -> StoreResult<MutationOutcome> {
        self.run_report(ctx, request, true)
    }

    /// Tombstones the reporter's view of a resource.
    pub fn delete(
        &self,
        ctx: &OperationContext,
        request: &DeleteRequest,
    ) -> StoreResult<MutationOutcome> {
        ctx.check()?;
        request.validate()?;
        let transaction_id = TransactionId::from_optional(request.transaction_id.as_deref())?;
        let policy = self.store.config().authority_policy.clone();

        info!(
            "event=resource_delete module=service status=start key={} transaction_id={}",
            request.key, transaction_id
        );
        let result = self.store.run_serializable("delete", ctx, |tx| {
            let repo = tx.resource_repository();
            apply_delete(&repo, ctx, request, &policy, &transaction_id)
        });
        self.finish("resource_delete", ctx, &request.key, result)
    }

    /// Latest snapshot and canonical state for a key.
    pub fn latest(
        &self,
        ctx: &OperationContext,
        key: &ReporterResourceKey,
    ) -> StoreResult<Representations> {
        key.validate()?;
        self.store.run_serializable("latest", ctx, |tx| {
            tx.resource_repository().find_latest_representations(key)
        })
    }

    /// Full stored history of a key and its resource.
    pub fn history(
        &self,
        ctx: &OperationContext,
        key: &ReporterResourceKey,
    ) -> StoreResult<ResourceHistory> {
        key.validate()?;
        self.store.run_serializable("history", ctx, |tx| {
            let repo = tx.resource_repository();
            let reporter_resource = repo
                .find_reporter_resource(key)?
                .ok_or_else(|| StoreError::not_found_for_key(key))?;
            let resource = repo.find_resource_by_keys(key)?;
            Ok(ResourceHistory {
                reporter_representations: repo.list_reporter_representations(key)?,
                common_representations: repo.list_common_representations(resource.id)?,
                resource,
                reporter_resource,
            })
        })
    }

    /// Asks the authorizer whether `subject` has `relation` on the resource,
    /// passing the stored consistency token.
    pub fn check(
        &self,
        ctx: &OperationContext,
        key: &ReporterResourceKey,
        relation: &str,
        subject: &SubjectReference,
    ) -> StoreResult<bool> {
        let authorizer = self.authorizer()?;
        let resource = self.resource_for_check(ctx, key)?;
        let decision = authorizer.check(
            ctx,
            &key.reporter_type,
            relation,
            &resource.consistency_token,
            &ResourceCoordinates::new(&resource, key),
            subject,
        )?;
        Ok(decision.allowed)
    }

    /// Like `check`, and stores the token the authorizer hands back.
    pub fn check_for_update(
        &self,
        ctx: &OperationContext,
        key: &ReporterResourceKey,
        relation: &str,
        subject: &SubjectReference,
    ) -> StoreResult<bool> {
        let authorizer = self.authorizer()?;
        let resource = self.resource_for_check(ctx, key)?;
        let decision = authorizer.check_for_update(
            ctx,
            &key.reporter_type,
            relation,
            &resource.consistency_token,
            &ResourceCoordinates::new(&resource, key),
            subject,
        )?;

        let token = decision
            .consistency_token
            .as_deref()
            .filter(|token| !token.is_empty());
        if let (true, Some(token)) = (decision.allowed, token) {
            self.store
                .run_serializable("update_consistency_token", ctx, |tx| {
                    tx.resource_repository()
                        .update_consistency_token(resource.id, token)
                })?;
        }
        Ok(decision.allowed)
    }

    fn run_report(
        &self,
        ctx: &OperationContext,
        request: &ReportRequest,
        strict: bool,
    ) -> StoreResult<MutationOutcome> {
        ctx.check()?;
        request.validate()?;
        self.schema
            .validate(
                &request.key.resource_type,
                &request.key.reporter_type,
                &request.data,
            )
            .map_err(|violation| StoreError::Schema(violation.to_string()))?;
        let transaction_id = TransactionId::from_optional(request.transaction_id.as_deref())?;
        let policy = self.store.config().authority_policy.clone();

        info!(
            "event=resource_report module=service status=start key={} transaction_id={} strict={}",
            request.key, transaction_id, strict
        );
        let result = self.store.run_serializable("report", ctx, |tx| {
            let repo = tx.resource_repository();
            apply_report(&repo, ctx, request, strict, &policy, &transaction_id)
        });
        self.finish("resource_report", ctx, &request.key, result)
    }

    fn finish(
        &self,
        event: &'static str,
        ctx: &OperationContext,
        key: &ReporterResourceKey,
        result: StoreResult<MutationOutcome>,
    ) -> StoreResult<MutationOutcome> {
        match result {
            Ok(outcome) => {
                info!(
                    "event={} module=service status=ok key={} outcome={} replayed={} version={} generation={} common_version={}",
                    event,
                    key,
                    outcome.kind.as_str(),
                    outcome.replayed,
                    outcome.representation_version,
                    outcome.generation,
                    outcome.common_version
                );
                self.publish(ctx, &outcome);
                Ok(outcome)
            }
            Err(err) => {
                warn!(
                    "event={} module=service status=error key={} error_code={} error={}",
                    event,
                    key,
                    err.kind().as_str(),
                    err
                );
                Err(err)
            }
        }
    }

    fn publish(&self, ctx: &OperationContext, outcome: &MutationOutcome) {
        if outcome.replayed || outcome.kind.is_noop() {
            return;
        }
        let Some(relay) = &self.relay else {
            return;
        };
        match relay.publish_transaction(ctx, outcome.transaction_id.as_str()) {
            Ok(report) if report.failed > 0 => warn!(
                "event=outbox_publish module=service status=error transaction_id={} delivered={} failed={}",
                outcome.transaction_id, report.delivered, report.failed
            ),
            Ok(_) => {}
            Err(err) => warn!(
                "event=outbox_publish module=service status=error transaction_id={} error={}",
                outcome.transaction_id, err
            ),
        }
    }

    fn authorizer(&self) -> StoreResult<&Arc<dyn Authorizer>> {
        self.authorizer
            .as_ref()
            .ok_or_else(|| StoreError::Collaborator("authorizer not configured".to_string()))
    }

    fn resource_for_check(
        &self,
        ctx: &OperationContext,
        key: &ReporterResourceKey,
    ) -> StoreResult<Resource> {
        key.validate()?;
        self.store.run_serializable("check", ctx, |tx| {
            tx.resource_repository().find_resource_by_keys(key)
        })
    }
}

/// Stored outcome for a transaction id that was already applied.
fn replayed_outcome<R: ResourceRepository>(
    repo: &R,
    transaction_id: &TransactionId,
) -> StoreResult<Option<MutationOutcome>> {
    if transaction_id.is_generated()
        || !repo.has_transaction_id_been_processed(transaction_id.as_str())?
    {
        return Ok(None);
    }
    let entry = repo
        .find_processed_transaction(transaction_id.as_str())?
        .ok_or_else(|| {
            StoreError::InvalidData(format!(
                "transaction {transaction_id} is processed but has no ledger entry"
            ))
        })?;
    Ok(Some(entry.outcome.into_replayed()))
}

/// Report read-decide-write unit; runs inside one transaction.
pub(crate) fn apply_report<R: ResourceRepository>(
    repo: &R,
    ctx: &OperationContext,
    request: &ReportRequest,
    strict: bool,
    policy: &AuthorityPolicy,
    transaction_id: &TransactionId,
) -> StoreResult<MutationOutcome> {
    if let Some(outcome) = replayed_outcome(repo, transaction_id)? {
        return Ok(outcome);
    }

    let pointer = repo.find_reporter_resource(&request.key)?;
    if strict && pointer.as_ref().is_some_and(ReporterResource::is_live) {
        return Err(StoreError::ResourceAlreadyExists(request.key.clone()));
    }

    let state = load_report_state(repo, request, pointer)?;
    let ids = NewIds {
        resource_id: repo.next_resource_id()?,
        reporter_resource_id: repo.next_reporter_resource_id()?,
    };
    ctx.check()?;

    match plan_report(request, &state, ids, policy, transaction_id)? {
        Plan::NoOp(outcome) => {
            repo.record_processed_transaction(RequestKind::Report, &outcome)?;
            Ok(outcome)
        }
        Plan::Apply(change_set) => {
            let operation = planned_operation(change_set.kind.operation_type())?;
            let outcome = repo.save(&change_set, operation, transaction_id)?;
            append_workspace_tuple_event(repo, &change_set, operation, transaction_id)?;
            Ok(outcome)
        }
    }
}

/// Delete read-decide-write unit; runs inside one transaction.
pub(crate) fn apply_delete<R: ResourceRepository>(
    repo: &R,
    ctx: &OperationContext,
    request: &DeleteRequest,
    policy: &AuthorityPolicy,
    transaction_id: &TransactionId,
) -> StoreResult<MutationOutcome> {
    if let Some(outcome) = replayed_outcome(repo, transaction_id)? {
        return Ok(outcome);
    }

    let pointer = repo
        .find_reporter_resource(&request.key)?
        .ok_or_else(|| StoreError::not_found_for_key(&request.key))?;
    let resource = repo
        .find_current_resource(pointer.resource_id)?
        .ok_or_else(|| missing_resource(&pointer))?;
    let latest_snapshot = repo.find_latest_reporter_representation(pointer.id)?;
    let common = repo.find_current_common_representation(resource.id)?;

    let mut other_live = Vec::new();
    for candidate in repo.find_live_reporter_resources(resource.id)? {
        if candidate.id == pointer.id {
            continue;
        }
        if let Some(snapshot) = repo.find_latest_reporter_representation(candidate.id)? {
            other_live.push((candidate, snapshot));
        }
    }
    ctx.check()?;

    let state = DeleteState {
        pointer,
        latest_snapshot,
        resource,
        common,
        other_live,
    };
    match plan_delete(&state, policy, transaction_id)? {
        Plan::NoOp(outcome) => {
            repo.record_processed_transaction(RequestKind::Delete, &outcome)?;
            Ok(outcome)
        }
        Plan::Apply(change_set) => {
            let outcome = repo.save(&change_set, OperationType::Deleted, transaction_id)?;
            append_workspace_tuple_event(repo, &change_set, OperationType::Deleted, transaction_id)?;
            Ok(outcome)
        }
    }
}

fn load_report_state<R: ResourceRepository>(
    repo: &R,
    request: &ReportRequest,
    pointer: Option<ReporterResource>,
) -> StoreResult<ReportState> {
    let (resource, latest_snapshot) = match &pointer {
        Some(existing) => (
            Some(
                repo.find_current_resource(existing.resource_id)?
                    .ok_or_else(|| missing_resource(existing))?,
            ),
            repo.find_latest_reporter_representation(existing.id)?,
        ),
        None => match request.inventory_id {
            Some(inventory_id) => (repo.find_current_resource(inventory_id)?, None),
            None => (None, None),
        },
    };

    let common = match &resource {
        Some(resource) => repo.find_current_common_representation(resource.id)?,
        None => None,
    };
    let authority_live = match (&resource, &common) {
        (Some(resource), Some(common)) => repo
            .find_live_reporter_resources(resource.id)?
            .iter()
            .any(|live| {
                common.is_reported_by(&live.key.reporter_type, &live.key.reporter_instance_id)
            }),
        _ => false,
    };

    Ok(ReportState {
        pointer,
        latest_snapshot,
        resource,
        common,
        authority_live,
    })
}

fn planned_operation(operation: Option<OperationType>) -> StoreResult<OperationType> {
    operation.ok_or_else(|| StoreError::InvalidData("planned change has no operation".to_string()))
}

fn missing_resource(pointer: &ReporterResource) -> StoreError {
    StoreError::InvalidData(format!(
        "reporter resource {} points at missing resource {}",
        pointer.id, pointer.resource_id
    ))
}
