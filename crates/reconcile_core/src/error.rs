//! Engine misuse errors and the shared confirmation failure type.

use std::{fmt, sync::Arc};

use thiserror::Error;

/// Synchronous usage errors raised by the controllers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),
    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },
}

impl EngineError {
    pub(crate) fn unknown_entity(id: &impl fmt::Debug) -> Self {
        Self::UnknownEntity(format!("{id:?}"))
    }

    pub(crate) fn duplicate_entity(id: &impl fmt::Debug) -> Self {
        Self::DuplicateEntity(format!("{id:?}"))
    }

    pub(crate) fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidOrder {
            reason: reason.into(),
        }
    }
}

/// Opaque failure reported by a confirmation capability.
///
/// Clones share the underlying error so it can be fanned out to every
/// subscriber.
#[derive(Clone, Error)]
#[error("{0}")]
pub struct ConfirmationError(Arc<anyhow::Error>);

impl ConfirmationError {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    pub fn message(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Debug for ConfirmationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl From<anyhow::Error> for ConfirmationError {
    fn from(value: anyhow::Error) -> Self {
        Self::new(value)
    }
}

impl PartialEq for ConfirmationError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
