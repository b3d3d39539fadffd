use std::collections::HashMap;

use claimgrid_types::{CapacityStatus, Cell, CellId, Claim, GridCoord, Username};
use serde::Serialize;

use crate::cells::{CellReservation, CellStore};
use crate::ledger::{ClaimLedger, CommitOutcome};
use crate::StoreError;

/// The cell arena and a claim ledger, kept in step.
///
/// The arena answers "which cell next" without blocking; the ledger is the
/// source of truth for claim existence, the claim count and durability.
pub struct GridStore {
    cells: CellStore,
    ledger: Box<dyn ClaimLedger>,
    limit: u64,
}

impl GridStore {
    /// Pair `ledger` with an arena hydrated from its persisted cell rows.
    pub fn open(size: u32, limit: u64, ledger: Box<dyn ClaimLedger>) -> Result<Self, StoreError> {
        let persisted = ledger.load_cells()?;
        let cells = if persisted.is_empty() {
            CellStore::new(size)
        } else {
            CellStore::from_cells(size, &persisted)?
        };
        tracing::debug!(
            size,
            limit,
            filled = cells.filled_count(),
            "grid store opened"
        );
        Ok(Self {
            cells,
            ledger,
            limit,
        })
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.cells.size()
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn exists(&self, username: &Username) -> Result<bool, StoreError> {
        self.ledger.exists(username)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        self.ledger.count()
    }

    pub fn capacity_status(&self) -> Result<CapacityStatus, StoreError> {
        Ok(CapacityStatus {
            used: self.ledger.count()?,
            limit: self.limit,
        })
    }

    #[must_use]
    pub fn claim_free_cell(&self) -> Option<CellReservation<'_>> {
        self.cells.claim_free_cell()
    }

    /// Run the claim's atomic unit and settle the reservation accordingly.
    ///
    /// The reservation is filled on `Committed`, and also on `CellTaken`
    /// because another writer already owns that cell. Every other exit,
    /// errors included, releases the cell.
    pub fn commit(
        &self,
        reservation: CellReservation<'_>,
        username: &Username,
    ) -> Result<CommitOutcome, StoreError> {
        let cell = reservation.cell_id();
        let outcome = self.ledger.commit_claim(username, cell, self.limit)?;
        match outcome {
            CommitOutcome::Committed | CommitOutcome::CellTaken => reservation.mark_filled(),
            CommitOutcome::Conflict | CommitOutcome::CapacityReached => reservation.release(),
        }
        Ok(outcome)
    }

    pub fn set_mask(&self, coord: GridCoord, masked: bool) -> Result<(), StoreError> {
        let id = coord.cell_id(self.cells.size());
        self.ledger.set_mask(id, masked)?;
        self.cells.set_mask(coord, masked)?;
        Ok(())
    }

    pub fn cell(&self, id: CellId) -> Result<Cell, StoreError> {
        self.cells.cell(id)
    }

    #[must_use]
    pub fn cells(&self) -> Vec<Cell> {
        self.cells.cells()
    }

    pub fn claims(&self) -> Result<Vec<Claim>, StoreError> {
        self.ledger.claims()
    }

    /// Check the filled-cell/claim bijection and the capacity cap.
    ///
    /// Filled flags come from the ledger's persisted rows when it keeps any,
    /// so writers in other processes are accounted for. The arena is the
    /// fallback and the source of in-flight reservations.
    pub fn audit(&self) -> Result<AuditReport, StoreError> {
        let (persisted, claims) = self.ledger.snapshot()?;
        let cells = if persisted.is_empty() {
            self.cells.cells()
        } else {
            persisted
        };
        let mut violations = Vec::new();

        let mut by_cell: HashMap<CellId, Vec<&Username>> = HashMap::new();
        for claim in &claims {
            by_cell
                .entry(claim.cell_id)
                .or_default()
                .push(&claim.username);
        }

        for (cell_id, owners) in &by_cell {
            if owners.len() > 1 {
                violations.push(AuditViolation::CellClaimedTwice {
                    cell: *cell_id,
                    usernames: owners.iter().map(|name| (*name).clone()).collect(),
                });
            }
            match cells.get(cell_id.index()) {
                // A reserved cell may be between its ledger commit and `mark_filled`.
                Some(cell) if !cell.filled && !self.cells.is_reserved(*cell_id) => {
                    for owner in owners {
                        violations.push(AuditViolation::ClaimOnFreeCell {
                            username: (*owner).clone(),
                            cell: *cell_id,
                        });
                    }
                }
                Some(_) => {}
                None => {
                    for owner in owners {
                        violations.push(AuditViolation::ClaimOnUnknownCell {
                            username: (*owner).clone(),
                            cell: *cell_id,
                        });
                    }
                }
            }
        }

        for cell in cells.iter().filter(|cell| cell.filled) {
            if !by_cell.contains_key(&cell.id) {
                violations.push(AuditViolation::FilledWithoutClaim { cell: cell.id });
            }
        }

        let used = claims.len() as u64;
        if used > self.limit {
            violations.push(AuditViolation::OverCapacity {
                used,
                limit: self.limit,
            });
        }
        violations.sort_by_key(AuditViolation::cell);

        Ok(AuditReport {
            claims: claims.len(),
            filled_cells: cells.iter().filter(|cell| cell.filled).count(),
            reserved_cells: self.cells.reserved_count(),
            limit: self.limit,
            violations,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditViolation {
    FilledWithoutClaim { cell: CellId },
    ClaimOnFreeCell { username: Username, cell: CellId },
    ClaimOnUnknownCell { username: Username, cell: CellId },
    CellClaimedTwice { cell: CellId, usernames: Vec<Username> },
    OverCapacity { used: u64, limit: u64 },
}

impl AuditViolation {
    fn cell(&self) -> Option<CellId> {
        match self {
            AuditViolation::FilledWithoutClaim { cell }
            | AuditViolation::ClaimOnFreeCell { cell, .. }
            | AuditViolation::ClaimOnUnknownCell { cell, .. }
            | AuditViolation::CellClaimedTwice { cell, .. } => Some(*cell),
            AuditViolation::OverCapacity { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub claims: usize,
    pub filled_cells: usize,
    /// Cells held by in-flight transactions at the time of the audit.
    pub reserved_cells: usize,
    pub limit: u64,
    pub violations: Vec<AuditViolation>,
}

impl AuditReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}
