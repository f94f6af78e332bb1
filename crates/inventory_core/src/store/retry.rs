//! Bounded retry of serializable read-decide-write units.
//!
//! # Responsibility
//! - Re-run a whole transaction when SQLite reports a serialization failure.
//! - Report retries and exhaustion to an injected observer.
//!
//! # Invariants
//! - Every attempt starts from a fresh transaction; nothing is reused.
//! - Only busy/locked/stale-snapshot failures are retried.
//! - Exhaustion surfaces as `StoreError::SerializationExhausted`.

use super::{Store, Tx};
use crate::error::{StoreError, StoreResult};
use crate::store::context::OperationContext;
use log::{debug, error, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Hook for retry metrics.
pub trait RetryObserver: Send + Sync {
    fn on_serialization_failure(&self, _operation: &'static str, _attempt: u32) {}
    fn on_exhausted(&self, _operation: &'static str, _attempts: u32) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRetryObserver;

impl RetryObserver for NoopRetryObserver {}

/// Observer that counts notifications.
#[derive(Debug, Default)]
pub struct CountingRetryObserver {
    failures: AtomicU32,
    exhausted: AtomicU32,
}

impl CountingRetryObserver {
    pub fn serialization_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn exhausted(&self) -> u32 {
        self.exhausted.load(Ordering::SeqCst)
    }
}

impl RetryObserver for CountingRetryObserver {
    fn on_serialization_failure(&self, _operation: &'static str, _attempt: u32) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_exhausted(&self, _operation: &'static str, _attempts: u32) {
        self.exhausted.fetch_add(1, Ordering::SeqCst);
    }
}

impl Store {
    /// Runs `work` inside a transaction and commits it, retrying the whole
    /// unit on serialization failures.
    ///
    /// `ctx` is checked before each attempt and again before commit; a
    /// cancelled attempt rolls back and is not retried.
    pub fn run_serializable<T, F>(
        &self,
        operation: &'static str,
        ctx: &OperationContext,
        mut work: F,
    ) -> StoreResult<T>
    where
        F: FnMut(&Tx) -> StoreResult<T>,
    {
        let max_attempts = self.config().max_serialization_retries.max(1);
        let started_at = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            ctx.check()?;

            let result = self.begin().and_then(|mut tx| {
                let value = work(&tx)?;
                ctx.check()?;
                tx.commit()?;
                Ok(value)
            });

            match result {
                Ok(value) => {
                    debug!(
                        "event=tx_run module=store status=ok op={} attempts={} duration_ms={}",
                        operation,
                        attempt,
                        started_at.elapsed().as_millis()
                    );
                    return Ok(value);
                }
                Err(StoreError::Db(last)) if last.is_serialization_failure() => {
                    self.observer().on_serialization_failure(operation, attempt);
                    if attempt >= max_attempts {
                        self.observer().on_exhausted(operation, attempt);
                        error!(
                            "event=tx_run module=store status=error op={} attempts={} duration_ms={} error_code=serialization_exhausted error={}",
                            operation,
                            attempt,
                            started_at.elapsed().as_millis(),
                            last
                        );
                        return Err(StoreError::SerializationExhausted {
                            operation,
                            attempts: attempt,
                            last,
                        });
                    }

                    let mut delay = self.config().retry_delay(attempt);
                    if let Some(remaining) = ctx.remaining() {
                        delay = delay.min(remaining);
                    }
                    warn!(
                        "event=tx_retry module=store status=retry op={} attempt={} delay_ms={}",
                        operation,
                        attempt,
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => {
                    debug!(
                        "event=tx_run module=store status=error op={} attempts={} error_kind={}",
                        operation,
                        attempt,
                        err.kind().as_str()
                    );
                    return Err(err);
                }
            }
        }
    }
}
