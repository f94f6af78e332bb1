//! Outbox relay: pending events to producers.
//!
//! # Responsibility
//! - Deliver pending outbox events through the `Eventer`.
//! - Acknowledge each event only after its producer accepted it.
//!
//! # Invariants
//! - An event is produced only while this relay holds its claim.
//! - A failed delivery releases the claim and leaves the event pending.
//! - Events are delivered in insertion order.

use crate::config::DEFAULT_OUTBOX_CLAIM_LEASE_MS;
use crate::error::StoreResult;
use crate::model::event::OutboxEvent;
use crate::service::collaborators::Eventer;
use crate::store::context::OperationContext;
use crate::store::outbox::EventSource;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Delivery counts of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub failed: usize,
    /// Events another relay had claimed or already delivered.
    pub skipped: usize,
}

pub struct OutboxRelay<S: EventSource> {
    source: S,
    eventer: Arc<dyn Eventer>,
    identity: String,
    claimant: String,
    lease: Duration,
}

impl<S: EventSource> OutboxRelay<S> {
    /// `identity` names the caller the producers are looked up for.
    pub fn new(source: S, eventer: Arc<dyn Eventer>, identity: impl Into<String>) -> Self {
        let identity = identity.into();
        Self {
            source,
            eventer,
            claimant: format!("{identity}/{}", Uuid::new_v4()),
            identity,
            lease: Duration::from_millis(DEFAULT_OUTBOX_CLAIM_LEASE_MS),
        }
    }

    /// Overrides how long a claim keeps other relays away.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Unique name this relay claims events under.
    pub fn claimant(&self) -> &str {
        &self.claimant
    }

    /// Delivers the pending events written under one transaction id.
    pub fn publish_transaction(
        &self,
        ctx: &OperationContext,
        transaction_id: &str,
    ) -> StoreResult<RelayReport> {
        let events = self.source.pending_for_transaction(transaction_id)?;
        self.deliver(ctx, events)
    }

    /// Delivers up to `limit` of the oldest pending events.
    pub fn drain(&self, ctx: &OperationContext, limit: u32) -> StoreResult<RelayReport> {
        let events = self.source.pending(limit)?;
        self.deliver(ctx, events)
    }

    fn deliver(&self, ctx: &OperationContext, events: Vec<OutboxEvent>) -> StoreResult<RelayReport> {
        let mut report = RelayReport::default();
        for event in events {
            ctx.check()?;
            if !self.source.claim(event.id, &self.claimant, self.lease)? {
                report.skipped += 1;
                debug!(
                    "event=outbox_relay module=service status=skip event_id={} reason=claimed_elsewhere",
                    event.id
                );
                continue;
            }

            let resource_type = event.resource_type().unwrap_or_default();
            let produced = self
                .eventer
                .lookup(&self.identity, resource_type, &event.aggregate_id)
                .and_then(|producer| producer.produce(ctx, &event));

            if let Err(err) = produced {
                report.failed += 1;
                warn!(
                    "event=outbox_relay module=service status=error event_id={} aggregate_type={} error_code=produce_failed error={}",
                    event.id,
                    event.aggregate_type.as_str(),
                    err
                );
                self.source.release(event.id, &self.claimant)?;
                continue;
            }

            if self.source.acknowledge(event.id)? {
                report.delivered += 1;
            } else {
                report.skipped += 1;
                debug!(
                    "event=outbox_relay module=service status=skip event_id={} reason=already_acknowledged",
                    event.id
                );
            }
        }
        Ok(report)
    }
}
