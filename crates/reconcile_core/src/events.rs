//! Subscriber notifications.

use crate::error::ConfirmationError;

/// Emitted whenever an entity's displayed state, pending flag or error changes.
#[derive(Debug, Clone)]
pub struct EntityEvent<K, S> {
    pub id: K,
    pub state: S,
    pub pending: bool,
    pub pending_count: usize,
    pub error: Option<ConfirmationError>,
}

/// Emitted whenever the displayed order of a collection changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEvent<K> {
    pub order: Vec<K>,
    pub pending: bool,
}
