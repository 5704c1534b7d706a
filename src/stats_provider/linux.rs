// Linux counters: /proc/net/dev for bytes, /sys/class/net/<iface>/address for identifiers.

use super::{RawStatsProvider, is_usable_identifier};
use crate::models::{RawCounterSample, normalize_identifier};
use std::collections::HashMap;
use std::path::PathBuf;

/// Reads counters from procfs. Paths are configurable so tests can point at fixtures.
pub struct ProcNetDevProvider {
    proc_net_dev: PathBuf,
    sys_class_net: PathBuf,
}

impl Default for ProcNetDevProvider {
    fn default() -> Self {
        Self::with_paths("/proc/net/dev", "/sys/class/net")
    }
}

impl ProcNetDevProvider {
    pub fn with_paths(proc_net_dev: impl Into<PathBuf>, sys_class_net: impl Into<PathBuf>) -> Self {
        Self {
            proc_net_dev: proc_net_dev.into(),
            sys_class_net: sys_class_net.into(),
        }
    }
}

impl RawStatsProvider for ProcNetDevProvider {
    fn read_all(&self) -> anyhow::Result<HashMap<String, RawCounterSample>> {
        let content = std::fs::read_to_string(&self.proc_net_dev).map_err(|e| {
            anyhow::anyhow!("read {}: {}", self.proc_net_dev.display(), e)
        })?;
        Ok(parse_proc_net_dev(&content))
    }

    fn resolve_identifiers(&self) -> anyhow::Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        for entry in std::fs::read_dir(&self.sys_class_net)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(address) = std::fs::read_to_string(entry.path().join("address")) else {
                continue;
            };
            let id = normalize_identifier(address.trim());
            if is_usable_identifier(&id) {
                out.insert(name, id);
            }
        }
        Ok(out)
    }
}

/// Parses `/proc/net/dev`: two header lines, then `iface: rx_bytes ... (8 rx fields) tx_bytes ...`.
/// Malformed lines are skipped.
pub fn parse_proc_net_dev(content: &str) -> HashMap<String, RawCounterSample> {
    content
        .lines()
        .skip(2)
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let fields: Vec<&str> = rest.split_whitespace().collect();
            let rx = fields.first()?.parse::<u64>().ok()?;
            let tx = fields.get(8)?.parse::<u64>().ok()?;
            Some((name.trim().to_string(), RawCounterSample::new(rx, tx)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  123456     100    0    0    0     0          0         0   123456     100    0    0    0     0       0          0
  eth0: 9876543210  8000    0    0    0     0          0        12 1234567   6000    0    0    0     0       0          0
wlan0:1000 10 0 0 0 0 0 0 2000 20 0 0 0 0 0 0
garbage line without colon
  bad0: x y z
";

    #[test]
    fn parses_rx_and_tx_columns() {
        let stats = parse_proc_net_dev(SAMPLE);
        assert_eq!(stats.len(), 3);
        assert_eq!(stats["lo"], RawCounterSample::new(123456, 123456));
        assert_eq!(stats["eth0"], RawCounterSample::new(9876543210, 1234567));
        assert_eq!(stats["wlan0"], RawCounterSample::new(1000, 2000));
        assert!(!stats.contains_key("bad0"));
    }

    #[test]
    fn read_all_fails_on_missing_file() {
        let provider = ProcNetDevProvider::with_paths("/nonexistent/net/dev", "/nonexistent");
        let err = provider.read_all().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/net/dev"));
    }

    #[test]
    fn resolves_identifiers_from_sysfs_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        for (iface, addr) in [
            ("eth0", "AA:BB:CC:DD:EE:FF\n"),
            ("lo", "00:00:00:00:00:00\n"),
        ] {
            let p = dir.path().join(iface);
            std::fs::create_dir(&p).unwrap();
            std::fs::write(p.join("address"), addr).unwrap();
        }
        std::fs::create_dir(dir.path().join("noaddr")).unwrap();

        let provider = ProcNetDevProvider::with_paths("/proc/net/dev", dir.path());
        let ids = provider.resolve_identifiers().unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids["eth0"], "aabbccddeeff");
    }
}
