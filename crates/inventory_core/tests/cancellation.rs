use inventory_core::service::collaborators::{SchemaValidator, SchemaViolation};
use inventory_core::{
    DeleteRequest, ErrorKind, OperationContext, ReportRequest, Representation,
    ReporterResourceKey, ResourceService, Store, StoreConfig, StoreError,
};
use rusqlite::Connection;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

const API_HREF: &str = "https://api.example.com/hosts/h1";

fn open_service() -> (tempfile::TempDir, ResourceService) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("inventory.db"), StoreConfig::default()).unwrap();
    (dir, ResourceService::new(store))
}

fn host_key() -> ReporterResourceKey {
    ReporterResourceKey::new("h1", "hbi", "host", "i1").unwrap()
}

fn request() -> ReportRequest {
    ReportRequest::new(
        host_key(),
        Representation::from_value(json!({"hostname": "a"})).unwrap(),
        API_HREF,
    )
    .with_transaction_id("tx-cancel")
}

fn table_count(service: &ResourceService, table: &str) -> i64 {
    let conn = Connection::open(service.store().path()).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

fn assert_nothing_written(service: &ResourceService) {
    for table in [
        "resource",
        "reporter_resource",
        "reporter_representation",
        "outbox_events",
        "processed_transactions",
    ] {
        assert_eq!(table_count(service, table), 0, "{table} must stay empty");
    }
}

/// Accepts every payload and cancels the operation it runs under.
struct CancellingValidator {
    ctx: OperationContext,
}

impl SchemaValidator for CancellingValidator {
    fn validate(
        &self,
        _resource_type: &str,
        _reporter_type: &str,
        _data: &Representation,
    ) -> Result<(), SchemaViolation> {
        self.ctx.cancel();
        Ok(())
    }
}

#[test]
fn cancelled_context_writes_nothing() {
    let (_dir, service) = open_service();
    let ctx = OperationContext::new();
    ctx.cancel();

    let error = service.report(&ctx, &request()).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert_nothing_written(&service);
}

#[test]
fn expired_deadline_writes_nothing() {
    let (_dir, service) = open_service();
    let ctx = OperationContext::new().with_deadline(Instant::now());

    let error = service.report(&ctx, &request()).unwrap_err();
    assert!(matches!(error, StoreError::Cancelled(_)));
    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert_nothing_written(&service);
}

#[test]
fn cancellation_during_the_operation_rolls_back() {
    let (_dir, service) = open_service();
    let ctx = OperationContext::new();
    let service = service.with_schema_validator(Arc::new(CancellingValidator { ctx: ctx.clone() }));

    let error = service.report(&ctx, &request()).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert_nothing_written(&service);

    // The transaction id was never recorded, so a fresh attempt applies.
    let outcome = service
        .report(&OperationContext::new(), &request())
        .unwrap();
    assert!(!outcome.replayed);
    assert_eq!(table_count(&service, "processed_transactions"), 1);
}

#[test]
fn cancelled_delete_keeps_the_resource_live() {
    let (_dir, service) = open_service();
    service
        .report(&OperationContext::new(), &request())
        .unwrap();

    let ctx = OperationContext::new();
    ctx.cancel();
    let error = service
        .delete(&ctx, &DeleteRequest::new(host_key()))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);

    let history = service
        .history(&OperationContext::new(), &host_key())
        .unwrap();
    assert!(!history.reporter_resource.tombstone);
    assert_eq!(history.reporter_representations.len(), 1);
}
