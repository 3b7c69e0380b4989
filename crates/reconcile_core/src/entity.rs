//! Public controller for a single optimistic entity.

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use anyhow::anyhow;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::ConfirmationError,
    events::EntityEvent,
    queue::{OperationHandle, OperationQueue, Transform},
    settings::EngineSettings,
    Confirmation, EntityKey, EntityValue, MissingConfirmation,
};

#[derive(Debug, Clone)]
pub enum SubmitOutcome<S> {
    Succeeded(S),
    Failed(ConfirmationError),
}

impl<S> SubmitOutcome<S> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn state(&self) -> Option<&S> {
        match self {
            Self::Succeeded(state) => Some(state),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ConfirmationError> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(error) => Some(error),
        }
    }

    fn from_result(result: Result<S, ConfirmationError>) -> Self {
        match result {
            Ok(state) => Self::Succeeded(state),
            Err(error) => Self::Failed(error),
        }
    }
}

/// Awaitable outcome of one `submit`.
///
/// The optimistic state is already visible when this is returned. Dropping
/// it does not cancel the confirmation; the operation still settles.
pub struct Submission<S> {
    handle: OperationHandle,
    task: JoinHandle<SubmitOutcome<S>>,
}

impl<S> Submission<S> {
    pub fn handle(&self) -> OperationHandle {
        self.handle
    }
}

impl<S> Future for Submission<S> {
    type Output = SubmitOutcome<S>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(join_error)) => Poll::Ready(SubmitOutcome::Failed(
                ConfirmationError::new(anyhow!("confirmation task failed: {join_error}")),
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct EntityState<S, P> {
    queue: OperationQueue<S, P>,
    last_error: Option<ConfirmationError>,
}

struct EntityInner<K, S, P> {
    id: K,
    transform: Transform<S, P>,
    confirmation: Arc<dyn Confirmation<P, S>>,
    state: Mutex<EntityState<S, P>>,
    events: broadcast::Sender<EntityEvent<K, S>>,
    disposed: CancellationToken,
}

impl<K: EntityKey, S: EntityValue, P: EntityValue> EntityInner<K, S, P> {
    fn event(&self, state: &EntityState<S, P>, displayed: S) -> EntityEvent<K, S> {
        EntityEvent {
            id: self.id.clone(),
            state: displayed,
            pending: !state.queue.is_empty(),
            pending_count: state.queue.len(),
            error: state.last_error.clone(),
        }
    }

    fn snapshot(&self, state: &EntityState<S, P>) -> EntityEvent<K, S> {
        self.event(state, state.queue.displayed_state())
    }

    fn notify(&self, event: EntityEvent<K, S>) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn confirm_and_settle(
        self: Arc<Self>,
        handle: OperationHandle,
        payload: P,
    ) -> SubmitOutcome<S> {
        let result = match AssertUnwindSafe(self.confirmation.confirm(payload))
            .catch_unwind()
            .await
        {
            Ok(result) => result.map_err(ConfirmationError::from),
            Err(_) => {
                warn!(id = ?self.id, sequence = handle.sequence(), "confirmation panicked");
                Err(ConfirmationError::new(anyhow!("confirmation panicked")))
            }
        };

        {
            let mut state = self.state.lock();
            if self.disposed.is_cancelled() {
                debug!(
                    id = ?self.id,
                    sequence = handle.sequence(),
                    "entity disposed; dropping confirmation result"
                );
            } else if let Some(event) = self.settle(&mut state, handle, &result) {
                // sent under the lock so subscribers see mutations in order
                self.notify(event);
            }
        }

        SubmitOutcome::from_result(result)
    }

    fn settle(
        &self,
        state: &mut EntityState<S, P>,
        handle: OperationHandle,
        result: &Result<S, ConfirmationError>,
    ) -> Option<EntityEvent<K, S>> {
        match result {
            Ok(server_state) => {
                let op = state.queue.resolve_success(handle, server_state.clone())?;
                state.last_error = None;
                info!(
                    id = ?self.id,
                    sequence = op.sequence,
                    latency_ms = op.age_ms(),
                    pending = state.queue.len(),
                    "operation confirmed"
                );
            }
            Err(error) => {
                let op = state.queue.resolve_failure(handle)?;
                state.last_error = Some(error.clone());
                warn!(
                    id = ?self.id,
                    sequence = op.sequence,
                    latency_ms = op.age_ms(),
                    pending = state.queue.len(),
                    %error,
                    "operation failed; rolled back"
                );
            }
        }
        Some(self.snapshot(state))
    }
}

/// Wraps one [`OperationQueue`] and drives confirmations for it.
///
/// Dropping the controller disposes it: confirmations still in flight run to
/// completion but their results are discarded.
pub struct EntityController<K: EntityKey, S: EntityValue, P: EntityValue> {
    inner: Arc<EntityInner<K, S, P>>,
}

impl<K: EntityKey, S: EntityValue, P: EntityValue> EntityController<K, S, P> {
    /// Controller without a backend; every submit fails and rolls back.
    pub fn new(id: K, baseline: S, transform: Transform<S, P>) -> Self {
        Self::new_with_confirmation(id, baseline, transform, Arc::new(MissingConfirmation))
    }

    pub fn new_with_confirmation(
        id: K,
        baseline: S,
        transform: Transform<S, P>,
        confirmation: Arc<dyn Confirmation<P, S>>,
    ) -> Self {
        Self::new_with_dependencies(
            id,
            baseline,
            transform,
            confirmation,
            EngineSettings::default(),
        )
    }

    pub fn new_with_dependencies(
        id: K,
        baseline: S,
        transform: Transform<S, P>,
        confirmation: Arc<dyn Confirmation<P, S>>,
        settings: EngineSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.capacity());
        Self::attached(id, baseline, transform, confirmation, events)
    }

    /// Controller publishing on an existing channel, used by collections.
    pub(crate) fn attached(
        id: K,
        baseline: S,
        transform: Transform<S, P>,
        confirmation: Arc<dyn Confirmation<P, S>>,
        events: broadcast::Sender<EntityEvent<K, S>>,
    ) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                id,
                transform,
                confirmation,
                state: Mutex::new(EntityState {
                    queue: OperationQueue::new(baseline),
                    last_error: None,
                }),
                events,
                disposed: CancellationToken::new(),
            }),
        }
    }

    /// Applies `payload` optimistically and starts its confirmation.
    ///
    /// Must be called within a tokio runtime. A panicking transform unwinds
    /// out of this call and leaves the queue untouched.
    pub fn submit(&self, payload: P) -> Submission<S> {
        self.submit_with(move |_| payload)
    }

    /// Like [`submit`](Self::submit), but derives the payload from the
    /// currently displayed state under the same lock that enqueues it.
    pub fn submit_with<F>(&self, payload_for: F) -> Submission<S>
    where
        F: FnOnce(&S) -> P,
    {
        let enqueued = {
            let mut state = self.inner.state.lock();
            if self.inner.disposed.is_cancelled() {
                None
            } else {
                let displayed = state.queue.displayed_state();
                let payload = payload_for(&displayed);
                let optimistic = (self.inner.transform)(&displayed, &payload);
                let handle = state
                    .queue
                    .enqueue(Arc::clone(&self.inner.transform), payload.clone());
                state.last_error = None;
                self.inner.notify(self.inner.event(&state, optimistic));
                Some((handle, payload))
            }
        };

        let Some((handle, payload)) = enqueued else {
            debug!(id = ?self.inner.id, "submit on disposed entity");
            return Submission {
                handle: OperationHandle::detached(),
                task: tokio::spawn(async {
                    SubmitOutcome::Failed(ConfirmationError::new(anyhow!(
                        "entity controller disposed"
                    )))
                }),
            };
        };

        let inner = Arc::clone(&self.inner);
        Submission {
            handle,
            task: tokio::spawn(inner.confirm_and_settle(handle, payload)),
        }
    }

    pub fn id(&self) -> &K {
        &self.inner.id
    }

    pub fn displayed_state(&self) -> S {
        self.inner.state.lock().queue.displayed_state()
    }

    pub fn baseline(&self) -> S {
        self.inner.state.lock().queue.baseline().clone()
    }

    pub fn is_pending(&self) -> bool {
        !self.inner.state.lock().queue.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn last_error(&self) -> Option<ConfirmationError> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn clear_error(&self) {
        let mut state = self.inner.state.lock();
        if state.last_error.take().is_some() {
            self.inner.notify(self.inner.snapshot(&state));
        }
    }

    /// Adopts an authoritative state pushed from outside the confirmation flow.
    pub fn rebase(&self, baseline: S) {
        let mut state = self.inner.state.lock();
        if self.inner.disposed.is_cancelled() {
            return;
        }
        state.queue.rebase(baseline);
        self.inner.notify(self.inner.snapshot(&state));
    }

    pub fn snapshot(&self) -> EntityEvent<K, S> {
        let state = self.inner.state.lock();
        self.inner.snapshot(&state)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent<K, S>> {
        self.inner.events.subscribe()
    }

    /// Detaches the queue. Idempotent.
    pub fn dispose(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            if self.inner.disposed.is_cancelled() {
                return;
            }
            self.inner.disposed.cancel();
            state.queue.clear()
        };
        debug!(id = ?self.inner.id, dropped, "entity controller disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.is_cancelled()
    }
}

impl<K: EntityKey, S: EntityValue, P: EntityValue> Drop for EntityController<K, S, P> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[path = "tests/entity_tests.rs"]
mod tests;
