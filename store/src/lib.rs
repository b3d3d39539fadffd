//! Cell and claim storage for claimgrid.
//!
//! # Architecture
//!
//! ```text
//! GridStore
//! ├── cells: CellStore        (lock-free slot arena, skip-held reservation)
//! └── ledger: dyn ClaimLedger (claim existence, count, durable commit)
//!     ├── MemoryLedger
//!     └── SqliteLedger        (cells + claims tables, one transaction per claim)
//! ```
//!
//! A claim is committed in two steps that always pair up: the ledger's
//! `commit_claim` transaction, then settling the `CellReservation` the arena
//! handed out. A reservation that is not settled returns its cell to the pool
//! when dropped.

mod cells;
mod error;
mod grid;
mod ledger;
mod sqlite;
mod sqlite_util;

pub use cells::{CellReservation, CellStore};
pub use error::StoreError;
pub use grid::{AuditReport, AuditViolation, GridStore};
pub use ledger::{ClaimLedger, CommitOutcome, MemoryLedger};
pub use sqlite::SqliteLedger;
