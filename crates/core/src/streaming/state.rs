use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Lifecycle of one streaming consumer.
///
/// ```text
/// Idle -> Connecting -> Subscribing -> Running -> Disconnected
///             |              |            |
///             +--------------+------------+--> Failed
/// ```
///
/// `Failed` and `Disconnected` restart at `Connecting`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerState {
    #[default]
    Idle,
    Connecting,
    Subscribing,
    Running,
    Failed,
    Disconnected,
}

impl ConsumerState {
    pub fn can_transition_to(self, next: ConsumerState) -> bool {
        use ConsumerState::*;
        matches!(
            (self, next),
            (Idle | Failed | Disconnected, Connecting)
                | (Connecting, Subscribing)
                | (Subscribing, Running)
                | (Connecting | Subscribing | Running, Failed)
                | (Running, Disconnected)
                // Shutdown of a consumer that never reached Running.
                | (Idle | Connecting | Subscribing, Disconnected)
        )
    }

    pub fn is_running(self) -> bool {
        self == ConsumerState::Running
    }

    /// A worker task is alive for this consumer.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConsumerState::Connecting | ConsumerState::Subscribing | ConsumerState::Running
        )
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsumerState::Idle => "idle",
            ConsumerState::Connecting => "connecting",
            ConsumerState::Subscribing => "subscribing",
            ConsumerState::Running => "running",
            ConsumerState::Failed => "failed",
            ConsumerState::Disconnected => "disconnected",
        };
        write!(f, "{}", s)
    }
}

/// Current state of every consumer, shared between the orchestrator and
/// the worker tasks.
#[derive(Debug, Clone, Default)]
pub struct ConsumerStates {
    inner: Arc<RwLock<HashMap<String, ConsumerState>>>,
}

impl ConsumerStates {
    pub fn get(&self, consumer: &str) -> ConsumerState {
        self.read().get(consumer).copied().unwrap_or_default()
    }

    /// Apply a lifecycle step. Steps outside the state machine are applied
    /// anyway and logged.
    pub fn transition(&self, consumer: &str, next: ConsumerState) {
        let mut states = self.write();
        let current = states.get(consumer).copied().unwrap_or_default();
        if current == next {
            return;
        }
        if current.can_transition_to(next) {
            debug!("Consumer {}: {} -> {}", consumer, current, next);
        } else {
            warn!("Consumer {}: unexpected transition {} -> {}", consumer, current, next);
        }
        states.insert(consumer.to_string(), next);
    }

    /// Overwrite without checking the state machine.
    pub fn set(&self, consumer: &str, state: ConsumerState) {
        self.write().insert(consumer.to_string(), state);
    }

    pub fn snapshot(&self) -> HashMap<String, ConsumerState> {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ConsumerState>> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("Consumer state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ConsumerState>> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("Consumer state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
