//! Ordered set of independently optimistic entities plus list-level reordering.

use std::{
    collections::{HashMap, HashSet},
    fmt,
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
use tracing::{debug, info, warn};

use crate::{
    entity::{EntityController, Submission},
    error::{ConfirmationError, EngineError},
    events::{EntityEvent, OrderEvent},
    queue::Transform,
    settings::EngineSettings,
    Confirmation, EntityKey, EntityValue, OrderConfirmation,
};

/// Identifies one reorder; only the most recent token may settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReorderToken(u64);

impl fmt::Display for ReorderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reorder#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum ReorderOutcome<K> {
    Succeeded(Vec<K>),
    Failed(ConfirmationError),
    /// A newer reorder was submitted before this one settled.
    Superseded,
}

impl<K> ReorderOutcome<K> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }
}

pub struct ReorderSubmission<K> {
    token: ReorderToken,
    task: JoinHandle<ReorderOutcome<K>>,
}

impl<K> ReorderSubmission<K> {
    pub fn token(&self) -> ReorderToken {
        self.token
    }
}

impl<K> Future for ReorderSubmission<K> {
    type Output = ReorderOutcome<K>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(join_error)) => Poll::Ready(ReorderOutcome::Failed(
                ConfirmationError::new(anyhow!("reorder task failed: {join_error}")),
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct ActiveReorder<K> {
    token: ReorderToken,
    rollback: Vec<K>,
}

struct OrderState<K> {
    displayed: Vec<K>,
    active: Option<ActiveReorder<K>>,
    next_token: u64,
}

impl<K: EntityKey> OrderState<K> {
    fn event(&self) -> OrderEvent<K> {
        OrderEvent {
            order: self.displayed.clone(),
            pending: self.active.is_some(),
        }
    }

    fn is_active(&self, token: ReorderToken) -> bool {
        self.active.as_ref().is_some_and(|active| active.token == token)
    }

    fn forget(&mut self, id: &K) {
        self.displayed.retain(|existing| existing != id);
        if let Some(active) = &mut self.active {
            active.rollback.retain(|existing| existing != id);
        }
    }

    fn append(&mut self, id: K) {
        if let Some(active) = &mut self.active {
            active.rollback.push(id.clone());
        }
        self.displayed.push(id);
    }
}

struct OrderShared<K> {
    state: Mutex<OrderState<K>>,
    events: broadcast::Sender<OrderEvent<K>>,
}

impl<K: EntityKey> OrderShared<K> {
    fn notify(&self, event: OrderEvent<K>) {
        let _ = self.events.send(event);
    }

    /// Returns the order now displayed, or `None` if `token` was superseded.
    fn resolve_success(&self, token: ReorderToken, server_order: Vec<K>) -> Option<Vec<K>> {
        let mut state = self.state.lock();
        if !state.is_active(token) {
            debug!(%token, "ignoring success for superseded reorder");
            return None;
        }
        state.displayed = reconcile_order(server_order, &state.displayed);
        state.active = None;
        info!(%token, len = state.displayed.len(), "reorder confirmed");
        self.notify(state.event());
        Some(state.displayed.clone())
    }

    fn resolve_failure(&self, token: ReorderToken, error: Option<&ConfirmationError>) -> bool {
        let mut state = self.state.lock();
        if !state.is_active(token) {
            debug!(%token, "ignoring failure for superseded reorder");
            return false;
        }
        let Some(active) = state.active.take() else {
            return false;
        };
        state.displayed = active.rollback;
        match error {
            Some(error) => warn!(%token, %error, "reorder failed; order reverted"),
            None => warn!(%token, "reorder failed; order reverted"),
        }
        self.notify(state.event());
        true
    }

    async fn confirm_and_settle(
        self: Arc<Self>,
        confirmation: Arc<dyn OrderConfirmation<K>>,
        token: ReorderToken,
        order: Vec<K>,
    ) -> ReorderOutcome<K> {
        let result = match AssertUnwindSafe(confirmation.confirm_order(order))
            .catch_unwind()
            .await
        {
            Ok(result) => result.map_err(ConfirmationError::from),
            Err(_) => {
                warn!(%token, "order confirmation panicked");
                Err(ConfirmationError::new(anyhow!("order confirmation panicked")))
            }
        };

        match result {
            Ok(server_order) => match self.resolve_success(token, server_order) {
                Some(order) => ReorderOutcome::Succeeded(order),
                None => ReorderOutcome::Superseded,
            },
            Err(error) => {
                if self.resolve_failure(token, Some(&error)) {
                    ReorderOutcome::Failed(error)
                } else {
                    ReorderOutcome::Superseded
                }
            }
        }
    }
}

/// Orders `server_order` against current membership: unknown and repeated
/// ids are dropped, members it omits keep their relative order at the end.
fn reconcile_order<K: EntityKey>(server_order: Vec<K>, members: &[K]) -> Vec<K> {
    let known: HashSet<&K> = members.iter().collect();
    let mut seen: HashSet<K> = HashSet::with_capacity(members.len());
    let mut order = Vec::with_capacity(members.len());
    for id in server_order {
        if known.contains(&id) && seen.insert(id.clone()) {
            order.push(id);
        }
    }
    for id in members {
        if !seen.contains(id) {
            order.push(id.clone());
        }
    }
    order
}

struct Members<K: EntityKey, S: EntityValue, P: EntityValue> {
    items: HashMap<K, S>,
    controllers: HashMap<K, EntityController<K, S, P>>,
}

pub struct CollectionController<K: EntityKey, S: EntityValue, P: EntityValue> {
    transform: Transform<S, P>,
    confirmation: Arc<dyn Confirmation<P, S>>,
    order_confirmation: Arc<dyn OrderConfirmation<K>>,
    members: Mutex<Members<K, S, P>>,
    order: Arc<OrderShared<K>>,
    entity_events: broadcast::Sender<EntityEvent<K, S>>,
}

impl<K: EntityKey, S: EntityValue, P: EntityValue> CollectionController<K, S, P> {
    /// `items` are given in display order.
    pub fn new(
        items: Vec<(K, S)>,
        transform: Transform<S, P>,
        confirmation: Arc<dyn Confirmation<P, S>>,
        order_confirmation: Arc<dyn OrderConfirmation<K>>,
    ) -> Result<Self, EngineError> {
        Self::new_with_settings(
            items,
            transform,
            confirmation,
            order_confirmation,
            EngineSettings::default(),
        )
    }

    pub fn new_with_settings(
        items: Vec<(K, S)>,
        transform: Transform<S, P>,
        confirmation: Arc<dyn Confirmation<P, S>>,
        order_confirmation: Arc<dyn OrderConfirmation<K>>,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        let mut displayed = Vec::with_capacity(items.len());
        let mut by_id = HashMap::with_capacity(items.len());
        for (id, item) in items {
            if by_id.insert(id.clone(), item).is_some() {
                return Err(EngineError::duplicate_entity(&id));
            }
            displayed.push(id);
        }

        let (entity_events, _) = broadcast::channel(settings.capacity());
        let (order_events, _) = broadcast::channel(settings.capacity());
        Ok(Self {
            transform,
            confirmation,
            order_confirmation,
            members: Mutex::new(Members {
                items: by_id,
                controllers: HashMap::new(),
            }),
            order: Arc::new(OrderShared {
                state: Mutex::new(OrderState {
                    displayed,
                    active: None,
                    next_token: 1,
                }),
                events: order_events,
            }),
            entity_events,
        })
    }

    /// Submits `payload` against entity `id`, creating its controller on first use.
    pub fn update_one(&self, id: &K, payload: P) -> Result<Submission<S>, EngineError> {
        let mut members = self.members.lock();
        let Members { items, controllers } = &mut *members;
        let Some(item) = items.get(id) else {
            return Err(EngineError::unknown_entity(id));
        };
        let controller = controllers.entry(id.clone()).or_insert_with(|| {
            debug!(?id, "creating entity controller");
            EntityController::attached(
                id.clone(),
                item.clone(),
                Arc::clone(&self.transform),
                Arc::clone(&self.confirmation),
                self.entity_events.clone(),
            )
        });
        Ok(controller.submit(payload))
    }

    /// Displays `new_order` immediately and confirms it, superseding any
    /// reorder still in flight.
    pub fn reorder(&self, new_order: Vec<K>) -> Result<ReorderSubmission<K>, EngineError> {
        let token = {
            let mut state = self.order.state.lock();
            validate_permutation(&new_order, &state.displayed)?;

            let token = ReorderToken(state.next_token);
            state.next_token += 1;
            let rollback = std::mem::replace(&mut state.displayed, new_order.clone());
            if let Some(previous) = state.active.replace(ActiveReorder { token, rollback }) {
                debug!(superseded = %previous.token, %token, "superseding pending reorder");
            }
            self.order.notify(state.event());
            token
        };

        let order = Arc::clone(&self.order);
        let confirmation = Arc::clone(&self.order_confirmation);
        Ok(ReorderSubmission {
            token,
            task: tokio::spawn(order.confirm_and_settle(confirmation, token, new_order)),
        })
    }

    /// Adopts `server_order` if `token` is still the active reorder.
    pub fn resolve_reorder_success(&self, token: ReorderToken, server_order: Vec<K>) -> bool {
        self.order.resolve_success(token, server_order).is_some()
    }

    /// Reverts to the order captured when `token` was submitted, if still active.
    pub fn resolve_reorder_failure(&self, token: ReorderToken) -> bool {
        self.order.resolve_failure(token, None)
    }

    pub fn insert(&self, id: K, item: S) -> Result<(), EngineError> {
        let mut members = self.members.lock();
        if members.items.contains_key(&id) {
            return Err(EngineError::duplicate_entity(&id));
        }
        members.items.insert(id.clone(), item);
        let mut state = self.order.state.lock();
        state.append(id);
        self.order.notify(state.event());
        Ok(())
    }

    /// Removes `id`, disposing its controller. Late confirmations for it are ignored.
    pub fn remove(&self, id: &K) -> Result<S, EngineError> {
        let mut members = self.members.lock();
        let Some(item) = members.items.remove(id) else {
            return Err(EngineError::unknown_entity(id));
        };
        // dropping the controller disposes it
        let item = match members.controllers.remove(id) {
            Some(controller) => controller.displayed_state(),
            None => item,
        };
        let mut state = self.order.state.lock();
        state.forget(id);
        self.order.notify(state.event());
        Ok(item)
    }

    /// Replaces the baseline of `id` with an authoritative state.
    pub fn rebase(&self, id: &K, state: S) -> Result<(), EngineError> {
        let mut members = self.members.lock();
        let Members { items, controllers } = &mut *members;
        let Some(item) = items.get_mut(id) else {
            return Err(EngineError::unknown_entity(id));
        };
        match controllers.get(id) {
            Some(controller) => controller.rebase(state),
            None => *item = state,
        }
        Ok(())
    }

    /// Displayed `(id, state)` pairs in displayed order.
    pub fn items(&self) -> Vec<(K, S)> {
        let members = self.members.lock();
        let state = self.order.state.lock();
        state
            .displayed
            .iter()
            .filter_map(|id| {
                Self::displayed_for(&members, id).map(|item| (id.clone(), item))
            })
            .collect()
    }

    pub fn get(&self, id: &K) -> Option<S> {
        Self::displayed_for(&self.members.lock(), id)
    }

    pub fn order(&self) -> Vec<K> {
        self.order.state.lock().displayed.clone()
    }

    pub fn len(&self) -> usize {
        self.members.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pending(&self, id: &K) -> bool {
        self.members
            .lock()
            .controllers
            .get(id)
            .is_some_and(EntityController::is_pending)
    }

    /// Ids with at least one operation in flight, in displayed order.
    pub fn pending_ids(&self) -> Vec<K> {
        let members = self.members.lock();
        let state = self.order.state.lock();
        state
            .displayed
            .iter()
            .filter(|id| {
                members
                    .controllers
                    .get(*id)
                    .is_some_and(EntityController::is_pending)
            })
            .cloned()
            .collect()
    }

    /// Last confirmation failure per entity, for entities that have one.
    pub fn errors(&self) -> HashMap<K, ConfirmationError> {
        self.members
            .lock()
            .controllers
            .iter()
            .filter_map(|(id, controller)| controller.last_error().map(|error| (id.clone(), error)))
            .collect()
    }

    pub fn clear_error(&self, id: &K) {
        if let Some(controller) = self.members.lock().controllers.get(id) {
            controller.clear_error();
        }
    }

    pub fn is_reorder_pending(&self) -> bool {
        self.order.state.lock().active.is_some()
    }

    pub fn active_reorder(&self) -> Option<ReorderToken> {
        self.order
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| active.token)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent<K, S>> {
        self.entity_events.subscribe()
    }

    pub fn subscribe_order(&self) -> broadcast::Receiver<OrderEvent<K>> {
        self.order.events.subscribe()
    }

    fn displayed_for(members: &Members<K, S, P>, id: &K) -> Option<S> {
        match members.controllers.get(id) {
            Some(controller) => Some(controller.displayed_state()),
            None => members.items.get(id).cloned(),
        }
    }
}

fn validate_permutation<K: EntityKey>(new_order: &[K], current: &[K]) -> Result<(), EngineError> {
    if new_order.len() != current.len() {
        return Err(EngineError::invalid_order(format!(
            "expected {} ids, got {}",
            current.len(),
            new_order.len()
        )));
    }
    let known: HashSet<&K> = current.iter().collect();
    let mut seen = HashSet::with_capacity(new_order.len());
    for id in new_order {
        if !known.contains(id) {
            return Err(EngineError::invalid_order(format!("unknown id {id:?}")));
        }
        if !seen.insert(id) {
            return Err(EngineError::invalid_order(format!("duplicate id {id:?}")));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/collection_tests.rs"]
mod tests;
