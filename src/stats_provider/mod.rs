// Raw interface counters. The sampling algorithm is platform independent; only
// the counter source differs per target.

mod linux;

pub use linux::{ProcNetDevProvider, parse_proc_net_dev};

use crate::models::{RawCounterSample, normalize_identifier};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use sysinfo::Networks;

/// Source of cumulative per-interface byte counters. Calls may block; the sampler
/// invokes them from a blocking task.
pub trait RawStatsProvider: Send + Sync {
    /// Cumulative counters for every interface, keyed by interface name.
    fn read_all(&self) -> anyhow::Result<HashMap<String, RawCounterSample>>;

    /// Interface name -> normalized identifier for interfaces that have one.
    fn resolve_identifiers(&self) -> anyhow::Result<HashMap<String, String>>;
}

/// The counter source for this build target.
pub fn platform_provider() -> Arc<dyn RawStatsProvider> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(ProcNetDevProvider::default())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(SysinfoStatsProvider::new())
    }
}

/// Counters via `sysinfo::Networks` (works on every target sysinfo supports).
pub struct SysinfoStatsProvider {
    networks: Mutex<Networks>,
}

impl Default for SysinfoStatsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoStatsProvider {
    pub fn new() -> Self {
        Self {
            networks: Mutex::new(Networks::new_with_refreshed_list()),
        }
    }
}

impl RawStatsProvider for SysinfoStatsProvider {
    fn read_all(&self) -> anyhow::Result<HashMap<String, RawCounterSample>> {
        let mut networks = self
            .networks
            .lock()
            .map_err(|e| anyhow::anyhow!("sysinfo networks lock poisoned: {}", e))?;
        networks.refresh(true);
        Ok(networks
            .list()
            .iter()
            .map(|(name, data)| {
                (
                    name.clone(),
                    RawCounterSample::new(data.total_received(), data.total_transmitted()),
                )
            })
            .collect())
    }

    fn resolve_identifiers(&self) -> anyhow::Result<HashMap<String, String>> {
        let networks = self
            .networks
            .lock()
            .map_err(|e| anyhow::anyhow!("sysinfo networks lock poisoned: {}", e))?;
        Ok(networks
            .list()
            .iter()
            .filter_map(|(name, data)| {
                let id = normalize_identifier(&data.mac_address().to_string());
                is_usable_identifier(&id).then(|| (name.clone(), id))
            })
            .collect())
    }
}

/// A 12-digit hardware address that is not all zeros.
pub(crate) fn is_usable_identifier(id: &str) -> bool {
    id.len() == 12 && id.bytes().any(|b| b != b'0')
}
