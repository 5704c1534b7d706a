// Grid coordinates

use serde::{Deserialize, Serialize};
use std::fmt;

/// A (row, col) cell coordinate. Signed so out-of-range requests such as
/// `(-1, 0)` can be expressed and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: i32,
    pub col: i32,
}

impl Position {
    /// The top-left "best network" cell.
    pub const BEST: Position = Position { row: 0, col: 0 };

    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    pub fn in_bounds(&self, rows: usize, cols: usize) -> bool {
        self.row >= 0 && self.col >= 0 && (self.row as usize) < rows && (self.col as usize) < cols
    }

    /// Row-major offset; caller has checked `in_bounds`.
    pub(crate) fn offset(&self, cols: usize) -> usize {
        self.row as usize * cols + self.col as usize
    }

    pub(crate) fn from_offset(offset: usize, cols: usize) -> Self {
        Self {
            row: (offset / cols) as i32,
            col: (offset % cols) as i32,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        assert!(Position::new(0, 0).in_bounds(3, 3));
        assert!(Position::new(2, 2).in_bounds(3, 3));
        assert!(!Position::new(-1, 0).in_bounds(3, 3));
        assert!(!Position::new(3, 0).in_bounds(3, 3));
        assert!(!Position::new(0, 3).in_bounds(3, 3));
        assert!(!Position::new(0, 0).in_bounds(0, 0));
    }

    #[test]
    fn offset_roundtrip() {
        let p = Position::new(1, 2);
        assert_eq!(p.offset(4), 6);
        assert_eq!(Position::from_offset(6, 4), p);
    }
}
