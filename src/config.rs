use crate::grid::{GridSettings, MAX_CELLS, SortStrategyId};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub grid: GridConfig,
    pub refresh: RefreshConfig,
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    pub rows: usize,
    pub cols: usize,
    /// Ask before moving the interface out of (or into) the top-left cell.
    #[serde(default = "default_show_best_network_warning")]
    pub show_best_network_warning: bool,
}

fn default_show_best_network_warning() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    pub refresh_interval_ms: u64,
    #[serde(default)]
    pub sort_strategy: SortStrategyId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub sample_interval_ms: u64,
    /// How often to log app stats (tracked interfaces, occupied cells, queued tasks) at INFO level.
    pub stats_log_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerConfig {
    /// 0 = available hardware parallelism.
    #[serde(default)]
    pub worker_threads: usize,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {}", path, e))?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn grid_settings(&self) -> GridSettings {
        GridSettings {
            rows: self.grid.rows,
            cols: self.grid.cols,
            refresh_interval_ms: self.refresh.refresh_interval_ms,
            sort_strategy: self.refresh.sort_strategy,
            show_best_network_warning: self.grid.show_best_network_warning,
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.grid.rows <= i32::MAX as usize,
            "grid.rows must fit in an i32, got {}",
            self.grid.rows
        );
        anyhow::ensure!(
            self.grid.cols <= i32::MAX as usize,
            "grid.cols must fit in an i32, got {}",
            self.grid.cols
        );
        anyhow::ensure!(
            self.grid
                .rows
                .checked_mul(self.grid.cols)
                .is_some_and(|cells| cells <= MAX_CELLS),
            "grid.rows * grid.cols must be at most {}, got {}x{}",
            MAX_CELLS,
            self.grid.rows,
            self.grid.cols
        );
        anyhow::ensure!(
            self.refresh.refresh_interval_ms > 0,
            "refresh.refresh_interval_ms must be > 0, got {}",
            self.refresh.refresh_interval_ms
        );
        anyhow::ensure!(
            self.monitoring.sample_interval_ms > 0,
            "monitoring.sample_interval_ms must be > 0, got {}",
            self.monitoring.sample_interval_ms
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[grid]
rows = 2
cols = 4

[refresh]
refresh_interval_ms = 5000

[monitoring]
sample_interval_ms = 1000
stats_log_interval_secs = 60
"#;

    #[test]
    fn defaults_fill_optional_keys() {
        let c = AppConfig::load_from_str(MINIMAL).unwrap();
        assert!(c.grid.show_best_network_warning);
        assert_eq!(c.refresh.sort_strategy, SortStrategyId::Throughput);
        assert_eq!(c.scheduler.worker_threads, 0);
        let s = c.grid_settings();
        assert_eq!((s.rows, s.cols, s.refresh_interval_ms), (2, 4, 5000));
    }

    #[test]
    fn oversized_grid_rejected() {
        let s = MINIMAL.replace("rows = 2", "rows = 100000");
        let err = AppConfig::load_from_str(&s).unwrap_err();
        assert!(err.to_string().contains("grid.rows * grid.cols"));
    }
}
