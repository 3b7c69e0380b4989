//! Two-valued convenience controller (like, favorite, publish).

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{
    entity::{EntityController, Submission},
    error::ConfirmationError,
    events::EntityEvent,
    queue::transform,
    settings::EngineSettings,
    Confirmation, EntityKey,
};

/// Each toggle captures the negation of the value displayed at submission
/// time and replays as "set to that value". Two rapid toggles where the
/// first fails therefore still display the second toggle's target.
pub struct ToggleController<K: EntityKey> {
    entity: EntityController<K, bool, bool>,
}

impl<K: EntityKey> ToggleController<K> {
    /// `confirmation` receives the target value and resolves to the server's value.
    pub fn new(id: K, initial: bool, confirmation: Arc<dyn Confirmation<bool, bool>>) -> Self {
        Self::new_with_settings(id, initial, confirmation, EngineSettings::default())
    }

    pub fn new_with_settings(
        id: K,
        initial: bool,
        confirmation: Arc<dyn Confirmation<bool, bool>>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            entity: EntityController::new_with_dependencies(
                id,
                initial,
                transform(|_: &bool, target: &bool| *target),
                confirmation,
                settings,
            ),
        }
    }

    pub fn toggle(&self) -> Submission<bool> {
        self.entity.submit_with(|current| !*current)
    }

    pub fn value(&self) -> bool {
        self.entity.displayed_state()
    }

    pub fn baseline(&self) -> bool {
        self.entity.baseline()
    }

    pub fn id(&self) -> &K {
        self.entity.id()
    }

    pub fn is_pending(&self) -> bool {
        self.entity.is_pending()
    }

    pub fn pending_count(&self) -> usize {
        self.entity.pending_count()
    }

    pub fn last_error(&self) -> Option<ConfirmationError> {
        self.entity.last_error()
    }

    pub fn clear_error(&self) {
        self.entity.clear_error();
    }

    pub fn rebase(&self, value: bool) {
        self.entity.rebase(value);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent<K, bool>> {
        self.entity.subscribe()
    }

    pub fn dispose(&self) {
        self.entity.dispose();
    }

    pub fn entity(&self) -> &EntityController<K, bool, bool> {
        &self.entity
    }
}

#[cfg(test)]
#[path = "tests/toggle_tests.rs"]
mod tests;
