// Domain models: interface records, counter samples, grid positions

mod interface;
mod position;
mod telemetry;

pub use interface::{InterfaceRecord, normalize_identifier};
pub use position::Position;
pub use telemetry::{RawCounterSample, SpeedEvent};

/// Wall-clock milliseconds since the Unix epoch; 0 if the clock is before the epoch.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "epoch_millis", "system time error");
            0
        })
}
