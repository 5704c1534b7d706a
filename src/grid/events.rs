// Notifications published to grid observers

use crate::models::{InterfaceRecord, Position};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum GridEvent {
    /// The cell at `position` now holds `record` (None for an empty placeholder).
    #[serde(rename_all = "camelCase")]
    CellChanged {
        position: Position,
        record: Option<InterfaceRecord>,
    },
    GridDimensionsChanged { rows: usize, cols: usize },
    /// Every cell was cleared.
    GridReset,
}
