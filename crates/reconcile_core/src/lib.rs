//! Optimistic-update reconciliation engine.
//!
//! Controllers apply speculative changes immediately, hand the payload to a
//! caller-supplied confirmation capability, and reconcile displayed state by
//! replaying whatever is still pending once each confirmation settles.

use std::{fmt, future::Future, hash::Hash, marker::PhantomData, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

pub mod collection;
pub mod entity;
pub mod error;
pub mod events;
pub mod queue;
pub mod settings;
pub mod toggle;

pub use collection::{CollectionController, ReorderOutcome, ReorderSubmission, ReorderToken};
pub use entity::{EntityController, SubmitOutcome, Submission};
pub use error::{ConfirmationError, EngineError};
pub use events::{EntityEvent, OrderEvent};
pub use queue::{transform, Operation, OperationHandle, OperationQueue, OperationStatus, Transform};
pub use settings::EngineSettings;
pub use toggle::ToggleController;

/// Bounds required of entity identities.
pub trait EntityKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> EntityKey for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Bounds required of entity states and payloads.
pub trait EntityValue: Clone + Send + Sync + 'static {}

impl<T> EntityValue for T where T: Clone + Send + Sync + 'static {}

/// Remote write for one entity. Resolves to the authoritative state.
#[async_trait]
pub trait Confirmation<P, S>: Send + Sync {
    async fn confirm(&self, payload: P) -> Result<S>;
}

/// Remote write for a whole-collection reorder. Resolves to the authoritative order.
#[async_trait]
pub trait OrderConfirmation<K>: Send + Sync {
    async fn confirm_order(&self, ids: Vec<K>) -> Result<Vec<K>>;
}

pub struct MissingConfirmation;

#[async_trait]
impl<P, S> Confirmation<P, S> for MissingConfirmation
where
    P: Send + 'static,
    S: Send + 'static,
{
    async fn confirm(&self, _payload: P) -> Result<S> {
        Err(anyhow!("confirmation backend unavailable"))
    }
}

pub struct MissingOrderConfirmation;

#[async_trait]
impl<K> OrderConfirmation<K> for MissingOrderConfirmation
where
    K: Send + 'static,
{
    async fn confirm_order(&self, _ids: Vec<K>) -> Result<Vec<K>> {
        Err(anyhow!("order confirmation backend unavailable"))
    }
}

/// Adapts an async closure into a [`Confirmation`].
pub struct ConfirmFn<F, P, S> {
    f: F,
    _marker: PhantomData<fn(P) -> S>,
}

impl<F, P, S> ConfirmFn<F, P, S> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, P, S> Confirmation<P, S> for ConfirmFn<F, P, S>
where
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<S>> + Send + 'static,
    P: Send + 'static,
    S: Send + 'static,
{
    async fn confirm(&self, payload: P) -> Result<S> {
        (self.f)(payload).await
    }
}

/// Adapts an async closure into an [`OrderConfirmation`].
pub struct OrderConfirmFn<F, K> {
    f: F,
    _marker: PhantomData<fn(K) -> K>,
}

impl<F, K> OrderConfirmFn<F, K> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, K> OrderConfirmation<K> for OrderConfirmFn<F, K>
where
    F: Fn(Vec<K>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<K>>> + Send + 'static,
    K: Send + 'static,
{
    async fn confirm_order(&self, ids: Vec<K>) -> Result<Vec<K>> {
        (self.f)(ids).await
    }
}

/// Shorthand for `Arc::new(ConfirmFn::new(f))`.
pub fn confirm_fn<F, Fut, P, S>(f: F) -> Arc<dyn Confirmation<P, S>>
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S>> + Send + 'static,
    P: Send + 'static,
    S: Send + 'static,
{
    Arc::new(ConfirmFn::new(f))
}

/// Shorthand for `Arc::new(OrderConfirmFn::new(f))`.
pub fn order_confirm_fn<F, Fut, K>(f: F) -> Arc<dyn OrderConfirmation<K>>
where
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<K>>> + Send + 'static,
    K: Send + 'static,
{
    Arc::new(OrderConfirmFn::new(f))
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
