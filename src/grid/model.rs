// Grid cells and the identifier -> position index. Mutated only on the
// coordination thread; every mutation leaves the index in agreement with the cells.

use crate::error::GridError;
use crate::models::{InterfaceRecord, Position, SpeedEvent};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

/// Work held back while updates are paused, replayed in arrival order on resume.
/// The queue holds at most one layout (always first) and one speed per identifier.
#[derive(Debug, Clone)]
pub(crate) enum Deferred {
    Speed { event: SpeedEvent, at_ms: u64 },
    Layout(Vec<InterfaceRecord>),
}

#[derive(Debug, Default)]
pub struct GridModel {
    rows: usize,
    cols: usize,
    cells: Vec<Option<InterfaceRecord>>,
    index: HashMap<String, Position>,
    paused: bool,
    deferred: VecDeque<Deferred>,
}

/// A consistent copy of the grid taken under the model lock.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSnapshot {
    pub rows: usize,
    pub cols: usize,
    /// Row-major.
    pub cells: Vec<Option<InterfaceRecord>>,
    pub index: HashMap<String, Position>,
    pub paused: bool,
    /// Updates waiting for resume.
    pub deferred: usize,
}

impl GridSnapshot {
    pub fn cell(&self, position: Position) -> Option<&InterfaceRecord> {
        if !position.in_bounds(self.rows, self.cols) {
            return None;
        }
        self.cells[position.offset(self.cols)].as_ref()
    }

    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Every occupied cell is indexed at its own position and the index has no extras.
    pub fn is_consistent(&self) -> bool {
        index_matches(&self.cells, &self.index, self.cols)
    }
}

fn index_matches(
    cells: &[Option<InterfaceRecord>],
    index: &HashMap<String, Position>,
    cols: usize,
) -> bool {
    let mut occupied = 0;
    for (offset, cell) in cells.iter().enumerate() {
        if let Some(record) = cell {
            occupied += 1;
            if index.get(&record.identifier) != Some(&Position::from_offset(offset, cols)) {
                return false;
            }
        }
    }
    occupied == index.len()
}

impl GridModel {
    pub fn new(rows: usize, cols: usize) -> Self {
        let mut model = Self::default();
        model.reset(rows, cols);
        model
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn occupied(&self) -> usize {
        self.index.len()
    }

    /// Clears cells and index and reallocates an empty `rows` x `cols` grid.
    pub fn reset(&mut self, rows: usize, cols: usize) {
        self.cells = vec![None; rows.saturating_mul(cols)];
        self.rows = rows;
        self.cols = cols;
        self.index.clear();
    }

    pub fn cell(&self, position: Position) -> Option<&InterfaceRecord> {
        if !position.in_bounds(self.rows, self.cols) {
            return None;
        }
        self.cells[position.offset(self.cols)].as_ref()
    }

    pub fn position_of(&self, identifier: &str) -> Option<Position> {
        self.index.get(identifier).copied()
    }

    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.cells.len()).map(|offset| Position::from_offset(offset, self.cols))
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &String> {
        self.index.keys()
    }

    /// Replaces every cell with `records` in rank order. Records past capacity are
    /// discarded, as are repeats of an identifier already placed; remaining cells
    /// become empty. Returns the number placed.
    pub fn populate(&mut self, records: Vec<InterfaceRecord>) -> usize {
        let capacity = self.cells.len();
        let mut seen = HashSet::with_capacity(capacity);
        let mut placed: Vec<Option<InterfaceRecord>> = records
            .into_iter()
            .filter(|r| seen.insert(r.identifier.clone()))
            .take(capacity)
            .map(Some)
            .collect();
        let count = placed.len();
        placed.resize(capacity, None);
        self.cells = placed;
        self.rebuild_index();
        count
    }

    /// Updates the throughput of the cell holding `event.identifier`. None if unplaced.
    pub fn apply_speed(&mut self, event: &SpeedEvent, at_ms: u64) -> Option<Position> {
        let position = *self.index.get(&event.identifier)?;
        let record = self.cells[position.offset(self.cols)].as_mut()?;
        record.apply_speed(event.rx_bps, event.tx_bps, at_ms);
        Some(position)
    }

    /// Exchanges two cells (either may be empty). Ok(false) when `a == b`.
    pub fn swap(&mut self, a: Position, b: Position) -> Result<bool, GridError> {
        for p in [a, b] {
            if !p.in_bounds(self.rows, self.cols) {
                return Err(GridError::OutOfBounds {
                    position: p,
                    rows: self.rows,
                    cols: self.cols,
                });
            }
        }
        if a == b {
            return Ok(false);
        }
        self.cells.swap(a.offset(self.cols), b.offset(self.cols));
        for p in [a, b] {
            if let Some(record) = &self.cells[p.offset(self.cols)] {
                self.index.insert(record.identifier.clone(), p);
            }
        }
        Ok(true)
    }

    pub fn is_consistent(&self) -> bool {
        index_matches(&self.cells, &self.index, self.cols)
    }

    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            rows: self.rows,
            cols: self.cols,
            cells: self.cells.clone(),
            index: self.index.clone(),
            paused: self.paused,
            deferred: self.deferred.len(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Queues work while paused. A layout supersedes everything queued before it;
    /// a speed replaces the pending speed for the same identifier, and is dropped
    /// when replay could not place it anyway.
    pub(crate) fn defer(&mut self, work: Deferred) {
        match &work {
            Deferred::Layout(_) => self.deferred.clear(),
            Deferred::Speed { event, .. } => {
                if !self.placed_on_replay(&event.identifier) {
                    return;
                }
                self.deferred.retain(|queued| {
                    !matches!(queued, Deferred::Speed { event: e, .. } if e.identifier == event.identifier)
                });
            }
        }
        self.deferred.push_back(work);
    }

    fn placed_on_replay(&self, identifier: &str) -> bool {
        match self.deferred.front() {
            Some(Deferred::Layout(records)) => records.iter().any(|r| r.identifier == identifier),
            _ => self.index.contains_key(identifier),
        }
    }

    pub(crate) fn take_deferred(&mut self) -> VecDeque<Deferred> {
        std::mem::take(&mut self.deferred)
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (offset, cell) in self.cells.iter().enumerate() {
            if let Some(record) = cell {
                self.index.insert(
                    record.identifier.clone(),
                    Position::from_offset(offset, self.cols),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(n: u8) -> InterfaceRecord {
        InterfaceRecord::new(&format!("00000000000{:x}", n), format!("eth{}", n))
    }

    #[test]
    fn populate_fills_row_major_and_discards_overflow() {
        let mut m = GridModel::new(3, 3);
        let placed = m.populate((1..=5).map(rec).collect());
        assert_eq!(placed, 5);
        assert_eq!(m.cell(Position::new(0, 0)).unwrap().name, "eth1");
        assert_eq!(m.cell(Position::new(1, 1)).unwrap().name, "eth5");
        assert!(m.cell(Position::new(1, 2)).is_none());
        assert_eq!(m.occupied(), 5);
        assert!(m.is_consistent());

        let mut small = GridModel::new(2, 2);
        assert_eq!(small.populate((1..=7).map(rec).collect()), 4);
        assert!(small.position_of(&rec(5).identifier).is_none());
        assert!(small.is_consistent());
    }

    #[test]
    fn populate_skips_duplicate_identifiers() {
        let mut m = GridModel::new(1, 3);
        let mut dup = rec(1);
        dup.name = "eth1.100".into();
        assert_eq!(m.populate(vec![rec(1), dup, rec(2)]), 2);
        assert_eq!(m.cell(Position::new(0, 1)).unwrap().name, "eth2");
        assert!(m.is_consistent());
    }

    #[test]
    fn populate_replaces_previous_layout() {
        let mut m = GridModel::new(2, 2);
        m.populate((1..=4).map(rec).collect());
        m.populate(vec![rec(9)]);
        assert_eq!(m.occupied(), 1);
        assert!(m.position_of(&rec(1).identifier).is_none());
        assert!(m.is_consistent());
    }

    #[test]
    fn speed_updates_only_throughput_of_placed_record() {
        let mut m = GridModel::new(2, 2);
        m.populate(vec![rec(1), rec(2)]);
        let ev = SpeedEvent {
            identifier: rec(2).identifier,
            rx_bps: 800,
            tx_bps: 80,
        };
        assert_eq!(m.apply_speed(&ev, 5), Some(Position::new(0, 1)));
        let cell = m.cell(Position::new(0, 1)).unwrap();
        assert_eq!((cell.rx_bps, cell.tx_bps, cell.last_update_ms), (800, 80, 5));
        assert_eq!(cell.name, "eth2");

        let unplaced = SpeedEvent {
            identifier: "ffffffffffff".into(),
            rx_bps: 1,
            tx_bps: 1,
        };
        assert_eq!(m.apply_speed(&unplaced, 6), None);
    }

    #[test]
    fn swap_occupied_and_placeholder_cells() {
        let mut m = GridModel::new(2, 2);
        m.populate(vec![rec(1), rec(2), rec(3)]);
        assert_eq!(m.swap(Position::new(0, 0), Position::new(1, 0)), Ok(true));
        assert_eq!(m.position_of(&rec(1).identifier), Some(Position::new(1, 0)));
        assert_eq!(m.position_of(&rec(3).identifier), Some(Position::new(0, 0)));
        assert!(m.is_consistent());

        assert_eq!(m.swap(Position::new(0, 1), Position::new(1, 1)), Ok(true));
        assert!(m.cell(Position::new(0, 1)).is_none());
        assert_eq!(m.position_of(&rec(2).identifier), Some(Position::new(1, 1)));
        assert!(m.is_consistent());

        assert_eq!(m.swap(Position::new(1, 1), Position::new(1, 1)), Ok(false));
    }

    #[test]
    fn swap_out_of_bounds_leaves_grid_untouched() {
        let mut m = GridModel::new(2, 2);
        m.populate(vec![rec(1), rec(2)]);
        let before = m.snapshot();
        for bad in [Position::new(-1, 0), Position::new(2, 0), Position::new(0, 2)] {
            assert!(matches!(
                m.swap(bad, Position::new(0, 0)),
                Err(GridError::OutOfBounds { .. })
            ));
        }
        let after = m.snapshot();
        assert_eq!(before.cells, after.cells);
        assert_eq!(before.index, after.index);
    }

    #[test]
    fn reset_clears_cells_and_index() {
        let mut m = GridModel::new(2, 2);
        m.populate(vec![rec(1)]);
        m.reset(1, 4);
        assert_eq!((m.rows(), m.cols(), m.capacity(), m.occupied()), (1, 4, 4, 0));
        assert!(m.is_consistent());
    }

    fn speed(n: u8, rx_bps: i64) -> Deferred {
        Deferred::Speed {
            event: SpeedEvent {
                identifier: rec(n).identifier,
                rx_bps,
                tx_bps: 0,
            },
            at_ms: rx_bps as u64,
        }
    }

    #[test]
    fn deferred_speeds_keep_latest_per_identifier() {
        let mut m = GridModel::new(2, 2);
        m.populate(vec![rec(1), rec(2)]);
        m.set_paused(true);
        for rx in 1..=500 {
            m.defer(speed(1, rx));
            m.defer(speed(2, rx * 2));
        }
        m.defer(speed(9, 7));
        assert_eq!(m.snapshot().deferred, 2);

        let pending: Vec<(String, i64)> = m
            .take_deferred()
            .into_iter()
            .map(|work| match work {
                Deferred::Speed { event, .. } => (event.identifier, event.rx_bps),
                Deferred::Layout(_) => unreachable!("no layout queued"),
            })
            .collect();
        assert_eq!(pending, vec![(rec(1).identifier, 500), (rec(2).identifier, 1000)]);
    }

    #[test]
    fn deferred_layout_supersedes_earlier_work() {
        let mut m = GridModel::new(2, 2);
        m.populate(vec![rec(1)]);
        m.set_paused(true);
        m.defer(speed(1, 10));
        m.defer(Deferred::Layout(vec![rec(1), rec(2)]));
        m.defer(Deferred::Layout(vec![rec(3)]));
        m.defer(speed(1, 20));
        m.defer(speed(3, 30));
        m.defer(speed(3, 40));

        let pending = m.take_deferred();
        assert_eq!(pending.len(), 2);
        assert!(matches!(&pending[0], Deferred::Layout(records) if records.len() == 1 && records[0].name == "eth3"));
        assert!(matches!(&pending[1], Deferred::Speed { event, .. } if event.rx_bps == 40));
        assert_eq!(m.snapshot().deferred, 0);
    }

    #[test]
    fn zero_sized_grid_places_nothing() {
        let mut m = GridModel::new(0, 0);
        assert_eq!(m.populate(vec![rec(1)]), 0);
        assert!(m.is_consistent());
    }
}
