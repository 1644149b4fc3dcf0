//! Configuration for the driver.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Upper bound for one blocking wait in milliseconds (`None` = unbounded).
    #[serde(default)]
    pub max_block_ms: Option<u64>,

    /// What to do when a suspension is resumed after its driver is gone.
    #[serde(default)]
    pub escape_policy: EscapePolicy,

    /// Initial capacity of the microtask and callback queues.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_block_ms: None,
            escape_policy: EscapePolicy::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl DriverConfig {
    /// Get the blocking cap as Duration.
    pub fn max_block(&self) -> Option<Duration> {
        self.max_block_ms.map(Duration::from_millis)
    }
}

/// Recovery applied when a suspension outlives its driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscapePolicy {
    /// Log and terminate the process, so a dangling coroutine cannot hang it silently.
    #[default]
    Exit,
    /// Report [`crate::Error::LoopExited`] to the caller of `resume`/`throw`.
    Error,
}
