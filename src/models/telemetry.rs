// Sampling inputs and outputs

use serde::{Deserialize, Serialize};

/// Cumulative byte counters for one interface at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCounterSample {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl RawCounterSample {
    pub const fn new(rx_bytes: u64, tx_bytes: u64) -> Self {
        Self { rx_bytes, tx_bytes }
    }
}

/// Throughput computed for one tracked identifier on one sampling tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedEvent {
    pub identifier: String,
    pub rx_bps: i64,
    pub tx_bps: i64,
}
