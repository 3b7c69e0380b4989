//! Confirmations whose calls park until the test answers them, so tests
//! decide settlement order.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::{Confirmation, OrderConfirmation};

pub(crate) type Reply<S> = oneshot::Sender<Result<S>>;

pub(crate) struct Gate<P, S> {
    calls: mpsc::UnboundedSender<(P, Reply<S>)>,
}

pub(crate) struct GateCalls<P, S> {
    rx: mpsc::UnboundedReceiver<(P, Reply<S>)>,
}

impl<P, S> Gate<P, S> {
    pub(crate) fn new() -> (Arc<Self>, GateCalls<P, S>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { calls }), GateCalls { rx })
    }
}

impl<P, S> GateCalls<P, S> {
    pub(crate) async fn next(&mut self) -> (P, Reply<S>) {
        self.rx.recv().await.expect("confirmation call")
    }

    pub(crate) fn has_waiting(&mut self) -> bool {
        !self.rx.is_empty()
    }
}

impl<P: Send + 'static, S: Send + 'static> Gate<P, S> {
    async fn call(&self, payload: P) -> Result<S> {
        let (tx, rx) = oneshot::channel();
        self.calls
            .send((payload, tx))
            .map_err(|_| anyhow!("test harness gone"))?;
        rx.await.map_err(|_| anyhow!("reply dropped"))?
    }
}

#[async_trait]
impl<P: Send + 'static, S: Send + 'static> Confirmation<P, S> for Gate<P, S> {
    async fn confirm(&self, payload: P) -> Result<S> {
        self.call(payload).await
    }
}

#[async_trait]
impl<K: Send + 'static> OrderConfirmation<K> for Gate<Vec<K>, Vec<K>> {
    async fn confirm_order(&self, ids: Vec<K>) -> Result<Vec<K>> {
        self.call(ids).await
    }
}
