//! Allocation engine for claimgrid.
//!
//! ```text
//! raw text ──parse_batch──▶ [Username] ──Coordinator::preview──▶ PreviewReport
//!                                │
//!                                └──Coordinator::confirm──▶ Allocator::allocate
//!                                                               │
//!                                            GridStore::claim_free_cell + commit
//! ```
//!
//! Each candidate is its own atomic unit: a failure on one candidate never
//! rolls back claims already committed earlier in the same batch.

mod allocator;
mod batch;
mod coordinator;
mod mask;
mod service;

use std::sync::Arc;

use anyhow::Context;
use claimgrid_config::{ClaimGridConfig, StorageBackend};
use claimgrid_store::{ClaimLedger, GridStore, MemoryLedger, SqliteLedger};

pub use allocator::{AllocateError, Allocator};
pub use batch::{BatchLimits, normalize_batch, parse_batch};
pub use coordinator::{Coordinator, CoordinatorError};
pub use mask::{apply_mask, load_bitmap, project_mask};
pub use service::{ClaimService, ServiceError};

/// Open the configured backend and hydrate a store from it.
pub fn open_grid(config: &ClaimGridConfig) -> anyhow::Result<GridStore> {
    let size = config.grid.size;
    let ledger: Box<dyn ClaimLedger> = match config.storage.backend {
        StorageBackend::Memory => Box::new(MemoryLedger::new()),
        StorageBackend::Sqlite => {
            let path = config
                .storage
                .resolved_path()
                .context("no database path configured and no platform data directory")?;
            let ledger = SqliteLedger::open(&path, size, config.storage.busy_timeout())
                .with_context(|| format!("failed to open grid database at {}", path.display()))?;
            tracing::info!(path = %path.display(), size, "grid database opened");
            Box::new(ledger)
        }
    };
    GridStore::open(size, config.grid.limit, ledger).context("failed to load grid cells")
}

/// Build a coordinator over the configured store.
pub fn open_coordinator(config: &ClaimGridConfig) -> anyhow::Result<Coordinator> {
    let store = open_grid(config)?;
    Ok(Coordinator::new(
        Arc::new(store),
        BatchLimits::from(&config.batch),
    ))
}
