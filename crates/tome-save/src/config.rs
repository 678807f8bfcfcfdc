use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing of the save state machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    /// Quiet period after the last mutation before a write starts.
    pub debounce_ms: u64,
    /// How long a mutation waits before the status shows unsaved changes.
    pub status_delay_ms: u64,
}

impl SaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn status_delay(&self) -> Duration {
        Duration::from_millis(self.status_delay_ms)
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 400,
            status_delay_ms: 150,
        }
    }
}
