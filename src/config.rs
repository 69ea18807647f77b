//! Engine configuration

use serde::{Deserialize, Serialize};

/// What a producer does when the output queue is full
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backpressure {
    /// Block until the writer drains a slot
    Block,
    /// Drop the item and count it
    Drop,
}

/// Engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Flows idle longer than this are flushed by the sweep (seconds)
    pub idle_timeout_secs: u64,

    /// Output queue capacity
    pub queue_size: usize,

    /// Producer behavior on a full queue
    pub backpressure: Backpressure,

    /// Staging buffer size for the writer (bytes)
    pub staging_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
            queue_size: 65_536,
            backpressure: Backpressure::Block,
            staging_size: 1024 * 1024,
        }
    }
}
