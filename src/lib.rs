// Library for the daemon and integration tests

pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod grid;
pub mod lock_table;
pub mod models;
pub mod network_monitor;
pub mod scheduler;
pub mod stats_provider;
pub mod version;
