// Ranking strategies applied to a discovery result before it fills the grid.
// All sorts are stable: ties keep discovery order.

use crate::models::InterfaceRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub trait SortStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn rank(&self, records: &mut [InterfaceRecord]);
}

/// Built-in strategies, as named in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortStrategyId {
    #[default]
    Throughput,
    Recency,
    Name,
}

impl SortStrategyId {
    pub fn strategy(self) -> Arc<dyn SortStrategy> {
        match self {
            SortStrategyId::Throughput => Arc::new(ByThroughput),
            SortStrategyId::Recency => Arc::new(ByRecency),
            SortStrategyId::Name => Arc::new(ByName),
        }
    }
}

impl fmt::Display for SortStrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortStrategyId::Throughput => "throughput",
            SortStrategyId::Recency => "recency",
            SortStrategyId::Name => "name",
        })
    }
}

impl FromStr for SortStrategyId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "throughput" => Ok(SortStrategyId::Throughput),
            "recency" => Ok(SortStrategyId::Recency),
            "name" => Ok(SortStrategyId::Name),
            other => anyhow::bail!("unknown sort strategy: {}", other),
        }
    }
}

/// Busiest first (rx + tx bits/sec).
pub struct ByThroughput;

impl SortStrategy for ByThroughput {
    fn name(&self) -> &'static str {
        "throughput"
    }

    fn rank(&self, records: &mut [InterfaceRecord]) {
        records.sort_by_key(|r| std::cmp::Reverse(r.total_bps()));
    }
}

/// Most recently updated first.
pub struct ByRecency;

impl SortStrategy for ByRecency {
    fn name(&self) -> &'static str {
        "recency"
    }

    fn rank(&self, records: &mut [InterfaceRecord]) {
        records.sort_by_key(|r| std::cmp::Reverse(r.last_update_ms));
    }
}

pub struct ByName;

impl SortStrategy for ByName {
    fn name(&self) -> &'static str {
        "name"
    }

    fn rank(&self, records: &mut [InterfaceRecord]) {
        records.sort_by(|a, b| a.name.cmp(&b.name));
    }
}
