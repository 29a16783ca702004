//! Concurrent reservation allocation over a shared, finite catalog.
//!
//! [`engine::Engine`] owns items and their reservations, persists every change
//! to a write-ahead log, and guarantees that no bounded item ever holds more
//! reservations than its capacity, under any interleaving of callers.

pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sweeper;
pub mod wal;
