//! Allocation Engine.
//!
//! Candidates are processed strictly in input order, one transaction each:
//!
//! 1. stop if the running claim count has reached the limit
//! 2. skip candidates that already hold a claim
//! 3. reserve a free cell, stopping if none is available
//! 4. commit claim + filled flag; a concurrent duplicate releases the cell and skips
//!
//! A candidate's transaction never spans another candidate, so a storage
//! failure rolls back only the candidate in flight. Everything committed
//! before it stays committed.

use std::sync::Arc;

use claimgrid_store::{CommitOutcome, GridStore, StoreError};
use claimgrid_types::{AllocationOutcome, StopReason, Username};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocateError {
    /// Storage could not be reached before any candidate was attempted.
    #[error("storage unreachable: {0}")]
    Unreachable(#[source] StoreError),
    /// Storage failed mid-batch. `partial` holds what was already committed.
    #[error("storage failed while allocating {candidate}: {source}")]
    Candidate {
        partial: AllocationOutcome,
        candidate: Username,
        #[source]
        source: StoreError,
    },
}

impl AllocateError {
    /// Outcome committed before the failure, if any candidate was attempted.
    #[must_use]
    pub fn partial(&self) -> Option<&AllocationOutcome> {
        match self {
            AllocateError::Unreachable(_) => None,
            AllocateError::Candidate { partial, .. } => Some(partial),
        }
    }
}

/// How a single candidate's unit ended.
enum Placement {
    Committed,
    Conflict,
    CapacityReached,
    GridFull,
}

#[derive(Clone)]
pub struct Allocator {
    store: Arc<GridStore>,
}

impl Allocator {
    #[must_use]
    pub fn new(store: Arc<GridStore>) -> Self {
        Self { store }
    }

    /// Allocate cells to `batch`, which must already be normalized and
    /// deduplicated. Earlier entries win scarce cells and capacity.
    pub fn allocate(&self, batch: &[Username]) -> Result<AllocationOutcome, AllocateError> {
        let limit = self.store.limit();
        // Authoritative at batch start; afterwards tracked locally. The ledger
        // re-checks the limit inside every commit, so concurrent batches
        // cannot overshoot it.
        let mut used = self.store.count().map_err(AllocateError::Unreachable)?;
        let mut outcome = AllocationOutcome::default();

        for (position, candidate) in batch.iter().enumerate() {
            if used >= limit {
                stop(&mut outcome, StopReason::CapacityReached, batch.len() - position);
                break;
            }

            match self.store.exists(candidate) {
                Ok(true) => {
                    tracing::debug!(user = %candidate, "already claimed, skipping");
                    outcome.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    if defer(&mut outcome, candidate, &err) {
                        continue;
                    }
                    return Err(fail(outcome, candidate, err));
                }
            }

            let placement = match self.place(candidate) {
                Ok(placement) => placement,
                Err(err) => {
                    if defer(&mut outcome, candidate, &err) {
                        continue;
                    }
                    return Err(fail(outcome, candidate, err));
                }
            };

            match placement {
                Placement::Committed => {
                    outcome.allocated += 1;
                    used += 1;
                }
                Placement::Conflict => {
                    tracing::warn!(user = %candidate, "claimed concurrently, skipping");
                    outcome.skipped += 1;
                }
                Placement::CapacityReached => {
                    stop(&mut outcome, StopReason::CapacityReached, batch.len() - position);
                    break;
                }
                Placement::GridFull => {
                    stop(&mut outcome, StopReason::GridFull, batch.len() - position);
                    break;
                }
            }
        }

        tracing::info!(
            requested = batch.len(),
            allocated = outcome.allocated,
            skipped = outcome.skipped,
            deferred = outcome.deferred.len(),
            stop = ?outcome.stop,
            "allocation pass finished"
        );
        Ok(outcome)
    }

    /// One candidate's unit: reserve a cell and commit. Retries with another
    /// cell only when a different writer filled the reserved one first.
    fn place(&self, candidate: &Username) -> Result<Placement, StoreError> {
        loop {
            let Some(reservation) = self.store.claim_free_cell() else {
                return Ok(Placement::GridFull);
            };
            let cell = reservation.cell_id();
            match self.store.commit(reservation, candidate)? {
                CommitOutcome::Committed => {
                    tracing::debug!(user = %candidate, %cell, "claim committed");
                    return Ok(Placement::Committed);
                }
                CommitOutcome::CellTaken => {
                    tracing::debug!(%cell, "cell filled by another writer, retrying");
                }
                CommitOutcome::Conflict => return Ok(Placement::Conflict),
                CommitOutcome::CapacityReached => return Ok(Placement::CapacityReached),
            }
        }
    }
}

/// Record a retryable failure. Returns false when the error is fatal.
fn defer(outcome: &mut AllocationOutcome, candidate: &Username, err: &StoreError) -> bool {
    if !err.is_retryable() {
        return false;
    }
    tracing::warn!(user = %candidate, error = %err, "transaction timed out, deferring");
    outcome.deferred.push(candidate.clone());
    true
}

fn stop(outcome: &mut AllocationOutcome, reason: StopReason, remaining: usize) {
    tracing::debug!(?reason, remaining, "stopping allocation pass");
    outcome.stop = Some(reason);
    outcome.skipped += remaining;
}

fn fail(partial: AllocationOutcome, candidate: &Username, source: StoreError) -> AllocateError {
    tracing::error!(user = %candidate, error = %source, "storage failure, aborting batch");
    AllocateError::Candidate {
        partial,
        candidate: candidate.clone(),
        source,
    }
}
