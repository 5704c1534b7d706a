// Typed errors for grid commands and interface discovery

use crate::models::Position;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("position {position} is outside the {rows}x{cols} grid")]
    OutOfBounds {
        position: Position,
        rows: usize,
        cols: usize,
    },
    #[error("invalid grid dimensions {rows}x{cols}")]
    InvalidDimensions { rows: i32, cols: i32 },
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no active interfaces")]
    NoActiveInterfaces,
    #[error("discovery I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("discovery failed: {0}")]
    Other(String),
}
