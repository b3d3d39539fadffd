//! Shared test utilities and fixtures

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use claimgrid_engine::{BatchLimits, Coordinator};
use claimgrid_store::{GridStore, MemoryLedger, SqliteLedger};
use claimgrid_types::Username;

pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn memory_coordinator(size: u32, limit: u64) -> Coordinator {
    let store = GridStore::open(size, limit, Box::new(MemoryLedger::new())).unwrap();
    Coordinator::new(Arc::new(store), BatchLimits::default())
}

/// A coordinator over its own connection to the database at `path`, as a
/// separate process would see it.
pub fn sqlite_coordinator(path: &Path, size: u32, limit: u64) -> Coordinator {
    let ledger = SqliteLedger::open(path, size, BUSY_TIMEOUT).unwrap();
    let store = GridStore::open(size, limit, Box::new(ledger)).unwrap();
    Coordinator::new(Arc::new(store), BatchLimits::default())
}

/// `count` identifiers unique to `batch`.
pub fn batch(batch: usize, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("user-{batch}-{i}")).collect()
}

pub fn user(name: &str) -> Username {
    Username::new(name).unwrap()
}
