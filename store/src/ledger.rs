//! Claim Ledger - the authoritative record of username -> cell bindings.
//!
//! A durable ledger also persists cell rows because a claim insert and the
//! cell's filled flag have to commit together. `commit_claim` is that atomic
//! unit. `MemoryLedger` keeps no cell rows and leaves them to the arena.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use claimgrid_types::{Cell, CellId, Claim, Username};

use crate::StoreError;

/// Result of one attempted claim commit. None of these are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Claim inserted and cell marked filled.
    Committed,
    /// The username was claimed concurrently. Nothing was written.
    Conflict,
    /// Committed claims already reached the limit. Nothing was written.
    CapacityReached,
    /// The cell was filled by another writer sharing the database.
    CellTaken,
}

pub trait ClaimLedger: Send + Sync {
    /// Persisted cell rows. Empty means a fresh grid with nothing stored yet.
    fn load_cells(&self) -> Result<Vec<Cell>, StoreError>;

    fn exists(&self, username: &Username) -> Result<bool, StoreError>;

    /// Committed claims only; in-flight reservations are not counted.
    fn count(&self) -> Result<u64, StoreError>;

    /// Atomically check the limit, insert the claim and mark `cell` filled.
    fn commit_claim(
        &self,
        username: &Username,
        cell: CellId,
        limit: u64,
    ) -> Result<CommitOutcome, StoreError>;

    fn set_mask(&self, cell: CellId, masked: bool) -> Result<(), StoreError>;

    /// Every committed claim, ordered by cell id.
    fn claims(&self) -> Result<Vec<Claim>, StoreError>;

    /// Persisted cells and committed claims as of one point in time.
    fn snapshot(&self) -> Result<(Vec<Cell>, Vec<Claim>), StoreError> {
        Ok((self.load_cells()?, self.claims()?))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    claims: HashMap<Username, CellId>,
    filled: HashSet<CellId>,
}

/// Process-local ledger. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClaimLedger for MemoryLedger {
    fn load_cells(&self) -> Result<Vec<Cell>, StoreError> {
        Ok(Vec::new())
    }

    fn exists(&self, username: &Username) -> Result<bool, StoreError> {
        Ok(self.lock().claims.contains_key(username))
    }

    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.lock().claims.len() as u64)
    }

    fn commit_claim(
        &self,
        username: &Username,
        cell: CellId,
        limit: u64,
    ) -> Result<CommitOutcome, StoreError> {
        let mut state = self.lock();
        if state.claims.len() as u64 >= limit {
            return Ok(CommitOutcome::CapacityReached);
        }
        if state.claims.contains_key(username) {
            return Ok(CommitOutcome::Conflict);
        }
        if !state.filled.insert(cell) {
            return Ok(CommitOutcome::CellTaken);
        }
        state.claims.insert(username.clone(), cell);
        Ok(CommitOutcome::Committed)
    }

    /// No cell rows are kept here; masks live only in the arena.
    fn set_mask(&self, _cell: CellId, _masked: bool) -> Result<(), StoreError> {
        Ok(())
    }

    fn claims(&self) -> Result<Vec<Claim>, StoreError> {
        let mut claims: Vec<Claim> = self
            .lock()
            .claims
            .iter()
            .map(|(username, cell_id)| Claim {
                username: username.clone(),
                cell_id: *cell_id,
            })
            .collect();
        claims.sort_by_key(|claim| claim.cell_id);
        Ok(claims)
    }
}
