//! Tunables shared by every controller.

use serde::{Deserialize, Serialize};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Buffer size of each subscriber channel. Slow subscribers that fall
    /// further behind than this observe a lag and skip to newer events.
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineSettings {
    pub fn with_event_capacity(mut self, event_capacity: usize) -> Self {
        // broadcast::channel panics on zero
        self.event_capacity = event_capacity.max(1);
        self
    }

    pub(crate) fn capacity(&self) -> usize {
        self.event_capacity.max(1)
    }
}
