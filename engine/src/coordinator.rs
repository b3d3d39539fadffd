//! Preview/Confirm workflow.
//!
//! ```text
//! Submitted ──preview──▶ Previewed ──confirm──▶ Confirmed
//!                            │
//!                            └──(report dropped)──▶ Abandoned
//! ```
//!
//! A preview only reads. Confirm never trusts it: the identifiers are
//! normalized again and the full allocation pass re-checks existence,
//! capacity and free cells, so a stale report is always safe to confirm.

use std::collections::BTreeSet;
use std::sync::Arc;

use claimgrid_store::{GridStore, StoreError};
use claimgrid_types::{AllocationOutcome, CapacityStatus, PreviewReport, Username, ValidationError};
use thiserror::Error;

use crate::allocator::{AllocateError, Allocator};
use crate::batch::{BatchLimits, normalize_batch, parse_batch};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid batch: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Allocate(#[from] AllocateError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct Coordinator {
    store: Arc<GridStore>,
    allocator: Allocator,
    limits: BatchLimits,
}

impl Coordinator {
    #[must_use]
    pub fn new(store: Arc<GridStore>, limits: BatchLimits) -> Self {
        Self {
            allocator: Allocator::new(Arc::clone(&store)),
            store,
            limits,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<GridStore> {
        &self.store
    }

    /// Classify raw newline/comma separated input without mutating anything.
    pub fn preview(&self, raw: &str) -> Result<PreviewReport, CoordinatorError> {
        let batch = parse_batch(raw, self.limits)?;
        self.classify(batch)
    }

    /// Classify already-split identifiers without mutating anything.
    pub fn preview_identifiers<S: AsRef<str>>(
        &self,
        identifiers: &[S],
    ) -> Result<PreviewReport, CoordinatorError> {
        let batch = normalize_batch(identifiers, self.limits)?;
        self.classify(batch)
    }

    /// Allocate `identifiers`, typically a previous report's `ready_to_insert`.
    pub fn confirm<S: AsRef<str>>(
        &self,
        identifiers: &[S],
    ) -> Result<AllocationOutcome, CoordinatorError> {
        let batch = normalize_batch(identifiers, self.limits)?;
        Ok(self.allocator.allocate(&batch)?)
    }

    /// Allocate raw newline/comma separated input directly.
    pub fn confirm_raw(&self, raw: &str) -> Result<AllocationOutcome, CoordinatorError> {
        let batch = parse_batch(raw, self.limits)?;
        Ok(self.allocator.allocate(&batch)?)
    }

    /// Confirm a report's eligible set. An empty set allocates nothing.
    pub fn confirm_preview(
        &self,
        report: &PreviewReport,
    ) -> Result<AllocationOutcome, CoordinatorError> {
        if report.ready_to_insert.is_empty() {
            return Ok(AllocationOutcome::default());
        }
        self.confirm(&report.ready_to_insert)
    }

    pub fn capacity_status(&self) -> Result<CapacityStatus, CoordinatorError> {
        Ok(self.store.capacity_status()?)
    }

    fn classify(&self, batch: Vec<Username>) -> Result<PreviewReport, CoordinatorError> {
        let mut already_exists = BTreeSet::new();
        let mut ready_to_insert = Vec::new();
        for username in batch {
            if self.store.exists(&username)? {
                already_exists.insert(username);
            } else {
                ready_to_insert.push(username);
            }
        }
        let capacity = self.store.capacity_status()?;
        tracing::debug!(
            existing = already_exists.len(),
            ready = ready_to_insert.len(),
            used = capacity.used,
            "preview classified batch"
        );
        Ok(PreviewReport {
            already_exists,
            ready_to_insert,
            capacity,
        })
    }
}
