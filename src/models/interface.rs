// Interface record placed in grid cells

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Canonical identifier form: lowercase hex digits, separators stripped.
/// `"AA:bb-CC.dd ee:FF"` becomes `"aabbccddeeff"`.
pub fn normalize_identifier(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// One network interface as discovered and as shown in a grid cell.
///
/// Identity is the normalized `identifier` only; two records with the same
/// identifier compare equal even when their counters or names differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceRecord {
    pub identifier: String,
    pub name: String,
    pub is_up: bool,
    pub is_running: bool,
    #[serde(default)]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default)]
    pub netmask: Option<Ipv4Addr>,
    #[serde(default)]
    pub broadcast: Option<Ipv4Addr>,
    /// When discovery last saw this interface (epoch millis).
    pub last_seen_ms: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Receive throughput in bits/sec.
    pub rx_bps: i64,
    /// Transmit throughput in bits/sec.
    pub tx_bps: i64,
    /// When throughput was last updated (epoch millis), 0 if never.
    pub last_update_ms: u64,
}

impl InterfaceRecord {
    pub fn new(identifier: &str, name: impl Into<String>) -> Self {
        Self {
            identifier: normalize_identifier(identifier),
            name: name.into(),
            is_up: false,
            is_running: false,
            ipv4: None,
            netmask: None,
            broadcast: None,
            last_seen_ms: 0,
            rx_bytes: 0,
            tx_bytes: 0,
            rx_bps: 0,
            tx_bps: 0,
            last_update_ms: 0,
        }
    }

    pub fn total_bps(&self) -> i64 {
        self.rx_bps.saturating_add(self.tx_bps)
    }

    /// Overwrites the throughput fields only; identity and address fields are untouched.
    pub fn apply_speed(&mut self, rx_bps: i64, tx_bps: i64, now_ms: u64) {
        self.rx_bps = rx_bps;
        self.tx_bps = tx_bps;
        self.last_update_ms = now_ms;
    }
}

impl PartialEq for InterfaceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for InterfaceRecord {}
