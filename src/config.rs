// Embedding configuration

use serde::Deserialize;

/// Tuning knobs for the synchronization core. The embedding application
/// deserializes this from its own settings source; defaults are fine for a
/// handful of chat groups and one location stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Capacity of each collection's classified-batch broadcast channel.
    /// Slow subscribers that lag past this see a Lagged error, not blocked
    /// producers.
    pub fanout_capacity: usize,

    /// Capacity of the per-collection raw delivery queue between the
    /// transport and the listener worker.
    pub delivery_queue: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            fanout_capacity: 64,
            delivery_queue: 32,
        }
    }
}
