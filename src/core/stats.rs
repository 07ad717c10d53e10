use serde::{Deserialize, Serialize};

/// Engine statistics for monitoring (point-in-time snapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    // General info
    pub uptime_secs: u64,
    pub catalog_count: usize,

    // Item metrics
    pub active_items: usize,
    pub tombstoned_items: usize,
    pub next_bit_position: u32,

    // Query metrics
    pub queries_executed: u64,
}
