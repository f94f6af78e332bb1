//! Pure state-transition planner for reports and deletes.
//!
//! # Responsibility
//! - Decide create/update/revive/delete/no-op from loaded state.
//! - Decide whether canonical state changes under the authority policy.
//! - Produce the `ChangeSet` the repository persists.
//!
//! # Invariants
//! - Planning performs no I/O; the same input always yields the same plan.
//! - Versions only grow: update bumps `representation_version`, revive bumps
//!   `generation` and restarts the version at 1.
//! - Canonical state is appended only when its data actually changes, or
//!   when a tombstoned resource comes back.

use crate::config::AuthorityPolicy;
use crate::error::{StoreError, StoreResult};
use crate::model::change_set::{ChangeSet, PointerWrite, ResourceWrite};
use crate::model::outcome::{MutationOutcome, OutcomeKind, TransactionId};
use crate::model::reporter_resource::{ReporterResource, ReporterResourceId, ReporterResourceKey};
use crate::model::representation::{CommonRepresentation, Representation, ReporterRepresentation};
use crate::model::resource::{Resource, ResourceId};
use crate::model::validation::{FieldError, FieldErrorKind};
use crate::service::request::ReportRequest;

/// Persisted state a report is planned against.
#[derive(Debug, Clone, Default)]
pub struct ReportState {
    /// Existing pointer for the request key.
    pub pointer: Option<ReporterResource>,
    /// Latest snapshot of `pointer`.
    pub latest_snapshot: Option<ReporterRepresentation>,
    /// Current canonical resource, either the pointer's or the one named by
    /// the request's inventory id.
    pub resource: Option<Resource>,
    pub common: Option<CommonRepresentation>,
    /// Whether the reporter that supplied `common` is still live.
    pub authority_live: bool,
}

/// Persisted state a delete is planned against.
#[derive(Debug, Clone)]
pub struct DeleteState {
    pub pointer: ReporterResource,
    pub latest_snapshot: Option<ReporterRepresentation>,
    pub resource: Resource,
    pub common: Option<CommonRepresentation>,
    /// Other live reporters of the resource with their latest snapshots,
    /// most recently reported first.
    pub other_live: Vec<(ReporterResource, ReporterRepresentation)>,
}

/// Identifiers used when the plan creates new rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewIds {
    pub resource_id: ResourceId,
    pub reporter_resource_id: ReporterResourceId,
}

/// Planner decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Apply(ChangeSet),
    /// Nothing to write except the ledger entry.
    NoOp(MutationOutcome),
}

/// Plans one report.
pub fn plan_report(
    request: &ReportRequest,
    state: &ReportState,
    ids: NewIds,
    policy: &AuthorityPolicy,
    transaction_id: &TransactionId,
) -> StoreResult<Plan> {
    match &state.pointer {
        None => plan_create(request, state, ids, policy, transaction_id).map(Plan::Apply),
        Some(pointer) => plan_existing(request, state, pointer, policy, transaction_id),
    }
}

/// Plans one delete.
pub fn plan_delete(
    state: &DeleteState,
    policy: &AuthorityPolicy,
    transaction_id: &TransactionId,
) -> StoreResult<Plan> {
    let pointer = &state.pointer;
    if !pointer.is_live() {
        return Ok(Plan::NoOp(noop_outcome(
            OutcomeKind::AlreadyDeleted,
            pointer,
            &state.resource,
            transaction_id,
        )));
    }

    let mut next_pointer = pointer.clone();
    next_pointer.representation_version += 1;
    next_pointer.tombstone = true;

    let is_authority = state
        .common
        .as_ref()
        .map_or(true, |common| is_reported_by(common, &pointer.key));

    let (resource_write, common_representation) = if state.other_live.is_empty() {
        let mut resource = state.resource.clone();
        resource.tombstone = true;
        (ResourceWrite::MarkTombstone(resource), None)
    } else if is_authority {
        let (fallback, snapshot) = best_fallback(&state.other_live, policy)?;
        let resource = revived_version(&state.resource);
        let common = CommonRepresentation::new(
            resource.id,
            resource.common_version,
            snapshot.data.clone(),
            fallback.key.reporter_type.clone(),
            fallback.key.reporter_instance_id.clone(),
            transaction_id.as_str(),
        )?;
        (ResourceWrite::Append(resource), Some(common))
    } else {
        (ResourceWrite::Keep(state.resource.clone()), None)
    };

    let reporter_version = state
        .latest_snapshot
        .as_ref()
        .and_then(|snapshot| snapshot.reporter_version.clone());
    let snapshot = ReporterRepresentation::new(
        next_pointer.id,
        next_pointer.representation_version,
        next_pointer.generation,
        Representation::default(),
        reporter_version,
        resource_write.resource().common_version,
        transaction_id.as_str(),
        true,
    )?;

    Ok(Plan::Apply(ChangeSet {
        kind: OutcomeKind::Deleted,
        resource: resource_write,
        reporter_resource: next_pointer,
        pointer_write: PointerWrite::Update,
        reporter_representation: snapshot,
        common_representation,
    }))
}

fn plan_create(
    request: &ReportRequest,
    state: &ReportState,
    ids: NewIds,
    policy: &AuthorityPolicy,
    transaction_id: &TransactionId,
) -> StoreResult<ChangeSet> {
    let canonical = request.canonical_data();

    let (resource_write, common_representation) = match &state.resource {
        Some(existing) => {
            if !existing
                .resource_type
                .eq_ignore_ascii_case(&request.key.resource_type)
            {
                return Err(FieldError::new(
                    "inventory_id",
                    FieldErrorKind::InvalidData(format!(
                        "resource {} has type `{}`, not `{}`",
                        existing.id, existing.resource_type, request.key.resource_type
                    )),
                )
                .into());
            }
            canonical_change(
                &request.key,
                canonical,
                existing,
                state.common.as_ref(),
                false,
                state.authority_live,
                policy,
                transaction_id,
            )?
        }
        None => {
            let resource_id = request.inventory_id.unwrap_or(ids.resource_id);
            let resource = Resource::new(resource_id, request.key.resource_type.clone(), 1, "")?;
            let common = new_common(&request.key, &resource, canonical, transaction_id)?;
            (ResourceWrite::Append(resource), Some(common))
        }
    };

    let pointer = ReporterResource::new(
        ids.reporter_resource_id,
        request.key.clone(),
        resource_write.resource().id,
        request.api_href.clone(),
        normalized_href(request.console_href.as_deref()),
    )?;
    let snapshot = new_snapshot(request, &pointer, resource_write.resource(), transaction_id)?;

    Ok(ChangeSet {
        kind: OutcomeKind::Created,
        resource: resource_write,
        reporter_resource: pointer,
        pointer_write: PointerWrite::Insert,
        reporter_representation: snapshot,
        common_representation,
    })
}

fn plan_existing(
    request: &ReportRequest,
    state: &ReportState,
    pointer: &ReporterResource,
    policy: &AuthorityPolicy,
    transaction_id: &TransactionId,
) -> StoreResult<Plan> {
    if let Some(requested) = request.inventory_id {
        if requested != pointer.resource_id {
            return Err(StoreError::InventoryIdMismatch {
                requested,
                stored: pointer.resource_id,
            });
        }
    }

    let resource = state.resource.as_ref().ok_or_else(|| {
        StoreError::InvalidData(format!(
            "reporter resource {} points at missing resource {}",
            pointer.id, pointer.resource_id
        ))
    })?;
    let canonical = request.canonical_data();
    let console_href = normalized_href(request.console_href.as_deref());
    let is_authority = state
        .common
        .as_ref()
        .map_or(true, |common| is_reported_by(common, &request.key));

    let mut next_pointer = pointer.clone();
    next_pointer.api_href = request.api_href.clone();
    next_pointer.console_href = console_href;

    let kind = if pointer.is_live() {
        let snapshot = state.latest_snapshot.as_ref().ok_or_else(|| {
            StoreError::InvalidData(format!("reporter resource {} has no snapshot", pointer.id))
        })?;
        let canonical_unchanged = !is_authority
            || state
                .common
                .as_ref()
                .is_some_and(|common| &common.data == canonical);
        let unchanged = snapshot.data == request.data
            && snapshot.reporter_version == request.reporter_version
            && pointer.api_href == next_pointer.api_href
            && pointer.console_href == next_pointer.console_href
            && canonical_unchanged;
        if unchanged {
            return Ok(Plan::NoOp(noop_outcome(
                OutcomeKind::Unchanged,
                pointer,
                resource,
                transaction_id,
            )));
        }
        next_pointer.representation_version += 1;
        OutcomeKind::Updated
    } else {
        next_pointer.generation += 1;
        next_pointer.representation_version = 1;
        next_pointer.tombstone = false;
        OutcomeKind::Revived
    };

    let (resource_write, common_representation) = canonical_change(
        &request.key,
        canonical,
        resource,
        state.common.as_ref(),
        is_authority,
        state.authority_live,
        policy,
        transaction_id,
    )?;
    let snapshot = new_snapshot(
        request,
        &next_pointer,
        resource_write.resource(),
        transaction_id,
    )?;

    Ok(Plan::Apply(ChangeSet {
        kind,
        resource: resource_write,
        reporter_resource: next_pointer,
        pointer_write: PointerWrite::Update,
        reporter_representation: snapshot,
        common_representation,
    }))
}

/// Decides whether `reporter` moves canonical state to `canonical`.
#[allow(clippy::too_many_arguments)]
fn canonical_change(
    reporter: &ReporterResourceKey,
    canonical: &Representation,
    resource: &Resource,
    common: Option<&CommonRepresentation>,
    is_authority: bool,
    authority_live: bool,
    policy: &AuthorityPolicy,
    transaction_id: &TransactionId,
) -> StoreResult<(ResourceWrite, Option<CommonRepresentation>)> {
    // A tombstoned resource has no live authority left.
    if resource.tombstone {
        let next = revived_version(resource);
        let common = new_common(reporter, &next, canonical, transaction_id)?;
        return Ok((ResourceWrite::Append(next), Some(common)));
    }

    let Some(current) = common else {
        let next = revived_version(resource);
        let common = new_common(reporter, &next, canonical, transaction_id)?;
        return Ok((ResourceWrite::Append(next), Some(common)));
    };

    let allowed = is_authority
        || policy.may_replace(
            &reporter.reporter_type,
            &current.reported_by_reporter_type,
            authority_live,
        );
    if !allowed || &current.data == canonical {
        return Ok((ResourceWrite::Keep(resource.clone()), None));
    }

    let next = revived_version(resource);
    let common = new_common(reporter, &next, canonical, transaction_id)?;
    Ok((ResourceWrite::Append(next), Some(common)))
}

/// Picks the live reporter that takes over canonical state: best policy
/// rank first, then the most recent reporter.
fn best_fallback<'a>(
    candidates: &'a [(ReporterResource, ReporterRepresentation)],
    policy: &AuthorityPolicy,
) -> StoreResult<&'a (ReporterResource, ReporterRepresentation)> {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(recency, (pointer, _))| (policy.rank(&pointer.key.reporter_type), *recency))
        .map(|(_, candidate)| candidate)
        .ok_or_else(|| StoreError::InvalidData("no live reporter to fall back to".to_string()))
}

fn new_common(
    reporter: &ReporterResourceKey,
    resource: &Resource,
    canonical: &Representation,
    transaction_id: &TransactionId,
) -> StoreResult<CommonRepresentation> {
    Ok(CommonRepresentation::new(
        resource.id,
        resource.common_version,
        canonical.clone(),
        reporter.reporter_type.clone(),
        reporter.reporter_instance_id.clone(),
        transaction_id.as_str(),
    )?)
}

fn new_snapshot(
    request: &ReportRequest,
    pointer: &ReporterResource,
    resource: &Resource,
    transaction_id: &TransactionId,
) -> StoreResult<ReporterRepresentation> {
    Ok(ReporterRepresentation::new(
        pointer.id,
        pointer.representation_version,
        pointer.generation,
        request.data.clone(),
        request.reporter_version.clone(),
        resource.common_version,
        transaction_id.as_str(),
        false,
    )?)
}

/// Next canonical coordinate, always live.
fn revived_version(resource: &Resource) -> Resource {
    let mut next = resource.next_version();
    next.tombstone = false;
    next
}

fn is_reported_by(common: &CommonRepresentation, key: &ReporterResourceKey) -> bool {
    common.is_reported_by(&key.reporter_type, &key.reporter_instance_id)
}

fn normalized_href(href: Option<&str>) -> Option<String> {
    href.filter(|value| !value.is_empty()).map(str::to_string)
}

fn noop_outcome(
    kind: OutcomeKind,
    pointer: &ReporterResource,
    resource: &Resource,
    transaction_id: &TransactionId,
) -> MutationOutcome {
    MutationOutcome {
        kind,
        transaction_id: transaction_id.clone(),
        resource_id: resource.id,
        reporter_resource_id: pointer.id,
        representation_version: pointer.representation_version,
        generation: pointer.generation,
        common_version: resource.common_version,
        tombstone: pointer.tombstone,
        replayed: false,
    }
}
