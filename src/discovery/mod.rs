// Interface discovery: enumerates adapters into InterfaceRecords for a grid refresh.

mod linux;

use crate::error::DiscoveryError;
use crate::models::{InterfaceRecord, epoch_millis, normalize_identifier};
use crate::stats_provider::is_usable_identifier;
use futures_util::future::BoxFuture;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use sysinfo::Networks;
use tracing::instrument;

/// Produces the current full interface list. Zero interfaces may be reported either
/// as `Ok(vec![])` or `Err(DiscoveryError::NoActiveInterfaces)`.
pub trait InterfaceDiscovery: Send + Sync {
    fn parse(&self) -> BoxFuture<'_, Result<Vec<InterfaceRecord>, DiscoveryError>>;
}

/// Netmask for an IPv4 prefix length; prefixes above 32 clamp to /32.
pub fn prefix_to_netmask(prefix: u8) -> Ipv4Addr {
    let prefix = u32::from(prefix.min(32));
    if prefix == 0 {
        return Ipv4Addr::UNSPECIFIED;
    }
    Ipv4Addr::from(u32::MAX << (32 - prefix))
}

pub fn broadcast_address(addr: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(addr) | !u32::from(netmask))
}

/// Discovery via `sysinfo::Networks`, with link state from sysfs on Linux.
pub struct SysinfoDiscovery {
    networks: Arc<Mutex<Networks>>,
}

impl Default for SysinfoDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoDiscovery {
    pub fn new() -> Self {
        Self {
            networks: Arc::new(Mutex::new(Networks::new_with_refreshed_list())),
        }
    }

    #[instrument(skip(self), fields(operation = "discover_interfaces"))]
    async fn discover(&self) -> Result<Vec<InterfaceRecord>, DiscoveryError> {
        let networks = self.networks.clone();
        let records = tokio::task::spawn_blocking(move || {
            let mut networks = networks
                .lock()
                .map_err(|e| DiscoveryError::Other(format!("sysinfo networks lock poisoned: {}", e)))?;
            networks.refresh(true);
            let now = epoch_millis();
            let mut records: Vec<InterfaceRecord> = networks
                .list()
                .iter()
                .filter_map(|(name, data)| {
                    let id = normalize_identifier(&data.mac_address().to_string());
                    if !is_usable_identifier(&id) {
                        return None;
                    }
                    let mut record = InterfaceRecord::new(&id, name.clone());
                    record.is_up = linux::read_is_up(name).unwrap_or(true);
                    record.is_running = linux::read_carrier(name).unwrap_or(record.is_up);
                    if let Some((addr, prefix)) = data.ip_networks().iter().find_map(|n| match n.addr {
                        IpAddr::V4(v4) => Some((v4, n.prefix)),
                        IpAddr::V6(_) => None,
                    }) {
                        let netmask = prefix_to_netmask(prefix);
                        record.ipv4 = Some(addr);
                        record.netmask = Some(netmask);
                        record.broadcast = Some(broadcast_address(addr, netmask));
                    }
                    record.last_seen_ms = now;
                    record.rx_bytes = data.total_received();
                    record.tx_bytes = data.total_transmitted();
                    Some(record)
                })
                .collect();
            records.sort_by(|a, b| a.name.cmp(&b.name));
            Ok::<_, DiscoveryError>(records)
        })
        .await
        .map_err(|e| DiscoveryError::Other(format!("discovery task join: {}", e)))??;

        if records.is_empty() {
            return Err(DiscoveryError::NoActiveInterfaces);
        }
        Ok(records)
    }
}

impl InterfaceDiscovery for SysinfoDiscovery {
    fn parse(&self) -> BoxFuture<'_, Result<Vec<InterfaceRecord>, DiscoveryError>> {
        Box::pin(self.discover())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netmask_from_prefix() {
        assert_eq!(prefix_to_netmask(24), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(prefix_to_netmask(20), Ipv4Addr::new(255, 255, 240, 0));
        assert_eq!(prefix_to_netmask(32), Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(prefix_to_netmask(40), Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(prefix_to_netmask(0), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn broadcast_from_netmask() {
        let addr = Ipv4Addr::new(192, 168, 1, 37);
        assert_eq!(
            broadcast_address(addr, prefix_to_netmask(24)),
            Ipv4Addr::new(192, 168, 1, 255)
        );
        assert_eq!(
            broadcast_address(Ipv4Addr::new(10, 0, 17, 4), prefix_to_netmask(20)),
            Ipv4Addr::new(10, 0, 31, 255)
        );
    }
}
