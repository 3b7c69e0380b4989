//! Per-entity queue of speculative operations.
//!
//! The queue owns the last confirmed baseline and every operation that has
//! not settled yet. Displayed state is never stored: it is recomputed by
//! folding the pending operations, in sequence order, over the baseline.
//! Settlement removes an operation by handle, so confirmations may arrive
//! in any order without corrupting the fold.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::debug;

/// Pure function producing the next speculative state from a state and a payload.
pub type Transform<S, P> = Arc<dyn Fn(&S, &P) -> S + Send + Sync>;

/// Boxes a closure as a [`Transform`].
pub fn transform<S, P, F>(f: F) -> Transform<S, P>
where
    F: Fn(&S, &P) -> S + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identifies one enqueued operation; used later to settle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationHandle {
    sequence: u64,
}

impl OperationHandle {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Handle that never matches a queued operation; sequences start at 1.
    pub(crate) fn detached() -> Self {
        Self { sequence: 0 }
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Confirmed,
    Failed,
}

pub struct Operation<S, P> {
    pub sequence: u64,
    pub transform: Transform<S, P>,
    pub payload: P,
    pub status: OperationStatus,
    pub submitted_at: DateTime<Utc>,
}

impl<S, P> Operation<S, P> {
    pub fn handle(&self) -> OperationHandle {
        OperationHandle {
            sequence: self.sequence,
        }
    }

    /// Milliseconds since the operation was enqueued.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.submitted_at).num_milliseconds()
    }
}

impl<S, P: fmt::Debug> fmt::Debug for Operation<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("sequence", &self.sequence)
            .field("payload", &self.payload)
            .field("status", &self.status)
            .field("submitted_at", &self.submitted_at)
            .finish_non_exhaustive()
    }
}

pub struct OperationQueue<S, P> {
    baseline: S,
    pending: Vec<Operation<S, P>>,
    next_sequence: u64,
}

impl<S: Clone, P> OperationQueue<S, P> {
    pub fn new(baseline: S) -> Self {
        Self {
            baseline,
            pending: Vec::new(),
            next_sequence: 1,
        }
    }

    pub fn enqueue(&mut self, transform: Transform<S, P>, payload: P) -> OperationHandle {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending.push(Operation {
            sequence,
            transform,
            payload,
            status: OperationStatus::Pending,
            submitted_at: Utc::now(),
        });
        debug!(sequence, pending = self.pending.len(), "enqueued operation");
        OperationHandle { sequence }
    }

    pub fn displayed_state(&self) -> S {
        self.pending
            .iter()
            .fold(self.baseline.clone(), |state, op| {
                (op.transform)(&state, &op.payload)
            })
    }

    /// Settles `handle` as confirmed and adopts `server_state` as the new baseline.
    ///
    /// Later operations stay pending and re-fold over the new baseline.
    pub fn resolve_success(
        &mut self,
        handle: OperationHandle,
        server_state: S,
    ) -> Option<Operation<S, P>> {
        let mut op = self.take(handle)?;
        op.status = OperationStatus::Confirmed;
        self.baseline = server_state;
        Some(op)
    }

    /// Settles `handle` as failed. The baseline is untouched.
    pub fn resolve_failure(&mut self, handle: OperationHandle) -> Option<Operation<S, P>> {
        let mut op = self.take(handle)?;
        op.status = OperationStatus::Failed;
        Some(op)
    }

    /// Replaces the baseline with an authoritative state without settling anything.
    pub fn rebase(&mut self, state: S) {
        self.baseline = state;
    }

    /// Drops every pending operation. Sequence numbers keep increasing.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn baseline(&self) -> &S {
        &self.baseline
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, handle: OperationHandle) -> bool {
        self.position(handle).is_some()
    }

    pub fn pending_handles(&self) -> Vec<OperationHandle> {
        self.pending.iter().map(Operation::handle).collect()
    }

    fn position(&self, handle: OperationHandle) -> Option<usize> {
        // pending is sorted by sequence since enqueue only appends
        self.pending
            .binary_search_by_key(&handle.sequence, |op| op.sequence)
            .ok()
    }

    fn take(&mut self, handle: OperationHandle) -> Option<Operation<S, P>> {
        match self.position(handle) {
            Some(index) => Some(self.pending.remove(index)),
            None => {
                debug!(sequence = handle.sequence, "ignoring resolution for unknown operation");
                None
            }
        }
    }
}

impl<S: fmt::Debug, P: fmt::Debug> fmt::Debug for OperationQueue<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue")
            .field("baseline", &self.baseline)
            .field("pending", &self.pending)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/queue_tests.rs"]
mod tests;
