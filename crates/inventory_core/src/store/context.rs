//! Cancellation and deadline carried through one logical operation.
//!
//! # Invariants
//! - Clones share one cancellation flag.
//! - A cancelled or expired context stops the operation before commit.

use crate::error::{StoreError, StoreResult};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Cancelled,
    DeadlineExceeded,
}

impl Display for CancelReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Time left before the deadline; `None` without a deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn check(&self) -> StoreResult<()> {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled(CancelReason::Cancelled));
        }
        if self.remaining().is_some_and(|left| left.is_zero()) {
            return Err(StoreError::Cancelled(CancelReason::DeadlineExceeded));
        }
        Ok(())
    }
}
