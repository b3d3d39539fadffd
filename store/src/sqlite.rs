//! SQLite-backed claim ledger.
//!
//! Two tables: `cells`, pre-populated with one row per grid cell on first
//! open, and `claims`, whose primary key is the normalized username. Each
//! `commit_claim` runs in its own `BEGIN IMMEDIATE` transaction, so one
//! candidate's failure never unwinds another's commit.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use claimgrid_types::{Cell, CellId, Claim, GridCoord, Username};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::ledger::{ClaimLedger, CommitOutcome};
use crate::sqlite_util::{now_iso8601, open_secure_db};
use crate::StoreError;

pub struct SqliteLedger {
    db: Mutex<Connection>,
    size: u32,
}

impl SqliteLedger {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS cells (
            cell_id INTEGER PRIMARY KEY,
            x INTEGER NOT NULL,
            y INTEGER NOT NULL,
            filled INTEGER NOT NULL DEFAULT 0,
            is_mask INTEGER NOT NULL DEFAULT 0,
            UNIQUE (x, y)
        );

        CREATE TABLE IF NOT EXISTS claims (
            username TEXT PRIMARY KEY,
            cell_id INTEGER NOT NULL UNIQUE REFERENCES cells(cell_id),
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_cells_free
        ON cells(cell_id) WHERE filled = 0;
    ";

    /// Open or create the ledger at `path`, seeding `size * size` cells on first use.
    pub fn open(path: impl AsRef<Path>, size: u32, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = open_secure_db(path)?;
        db.busy_timeout(busy_timeout)?;
        tracing::debug!(path = %path.display(), size, "opening sqlite ledger");
        Self::initialize(db, size)
    }

    /// Open an in-memory ledger (for testing).
    pub fn open_in_memory(size: u32) -> Result<Self, StoreError> {
        let db = Connection::open_in_memory()?;
        Self::initialize(db, size)
    }

    fn initialize(mut db: Connection, size: u32) -> Result<Self, StoreError> {
        db.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )?;
        db.execute_batch(Self::SCHEMA)?;

        let expected = i64::from(size) * i64::from(size);
        let existing: i64 = db.query_row("SELECT COUNT(*) FROM cells", [], |row| row.get(0))?;
        if existing == 0 {
            seed_cells(&mut db, size)?;
            tracing::info!(size, cells = expected, "seeded grid cells");
        } else if existing != expected {
            return Err(StoreError::Corrupt(format!(
                "database holds {existing} cells but a {size}x{size} grid needs {expected}"
            )));
        }

        Ok(Self {
            db: Mutex::new(db),
            size,
        })
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn seed_cells(db: &mut Connection, size: u32) -> Result<(), StoreError> {
    let tx = db.transaction()?;
    {
        let mut stmt =
            tx.prepare("INSERT INTO cells (cell_id, x, y, filled, is_mask) VALUES (?1, ?2, ?3, 0, 0)")?;
        for y in 1..=size {
            for x in 1..=size {
                let id = i64::from(y - 1) * i64::from(size) + i64::from(x);
                stmt.execute(params![id, x, y])?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

impl ClaimLedger for SqliteLedger {
    fn load_cells(&self) -> Result<Vec<Cell>, StoreError> {
        read_cells(&self.lock(), self.size)
    }

    fn exists(&self, username: &Username) -> Result<bool, StoreError> {
        let found = self
            .lock()
            .query_row(
                "SELECT 1 FROM claims WHERE username = ?1",
                [username.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM claims", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn commit_claim(
        &self,
        username: &Username,
        cell: CellId,
        limit: u64,
    ) -> Result<CommitOutcome, StoreError> {
        let mut db = self.lock();
        // Dropping `tx` on any early return rolls the unit back.
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let used: i64 = tx.query_row("SELECT COUNT(*) FROM claims", [], |row| row.get(0))?;
        if used as u64 >= limit {
            return Ok(CommitOutcome::CapacityReached);
        }

        let taken = tx
            .query_row(
                "SELECT 1 FROM claims WHERE username = ?1",
                [username.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        if taken.is_some() {
            return Ok(CommitOutcome::Conflict);
        }

        let updated = tx.execute(
            "UPDATE cells SET filled = 1 WHERE cell_id = ?1 AND filled = 0",
            [cell.value()],
        )?;
        if updated == 0 {
            let known = tx
                .query_row("SELECT 1 FROM cells WHERE cell_id = ?1", [cell.value()], |_| {
                    Ok(())
                })
                .optional()?;
            if known.is_none() {
                return Err(StoreError::UnknownCell(cell));
            }
            return Ok(CommitOutcome::CellTaken);
        }

        tx.execute(
            "INSERT INTO claims (username, cell_id, created_at) VALUES (?1, ?2, ?3)",
            params![username.as_str(), cell.value(), now_iso8601()],
        )?;
        tx.commit()?;
        Ok(CommitOutcome::Committed)
    }

    fn set_mask(&self, cell: CellId, masked: bool) -> Result<(), StoreError> {
        let updated = self.lock().execute(
            "UPDATE cells SET is_mask = ?1 WHERE cell_id = ?2",
            params![masked, cell.value()],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownCell(cell));
        }
        Ok(())
    }

    fn claims(&self) -> Result<Vec<Claim>, StoreError> {
        read_claims(&self.lock())
    }

    fn snapshot(&self) -> Result<(Vec<Cell>, Vec<Claim>), StoreError> {
        let mut db = self.lock();
        // One read transaction, so a concurrent commit lands in both lists or neither.
        let tx = db.transaction()?;
        let cells = read_cells(&tx, self.size)?;
        let claims = read_claims(&tx)?;
        tx.commit()?;
        Ok((cells, claims))
    }
}

fn read_cells(db: &Connection, size: u32) -> Result<Vec<Cell>, StoreError> {
    let mut stmt =
        db.prepare("SELECT cell_id, x, y, filled, is_mask FROM cells ORDER BY cell_id ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, u32>(1)?,
            row.get::<_, u32>(2)?,
            row.get::<_, bool>(3)?,
            row.get::<_, bool>(4)?,
        ))
    })?;

    let mut cells = Vec::new();
    for row in rows {
        let (id, x, y, filled, is_mask) = row?;
        let coord = GridCoord::new(x, y, size)
            .map_err(|e| StoreError::Corrupt(format!("cell {id}: {e}")))?;
        let id = CellId::new(id);
        if coord.cell_id(size) != id {
            return Err(StoreError::Corrupt(format!(
                "cell {id} is stored at {coord}, which maps to cell {}",
                coord.cell_id(size)
            )));
        }
        cells.push(Cell {
            id,
            coord,
            filled,
            is_mask,
        });
    }
    Ok(cells)
}

fn read_claims(db: &Connection) -> Result<Vec<Claim>, StoreError> {
    let mut stmt = db.prepare("SELECT username, cell_id FROM claims ORDER BY cell_id ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut claims = Vec::new();
    for row in rows {
        let (username, cell_id) = row?;
        let username = Username::from_stored(&username)
            .map_err(|e| StoreError::Corrupt(format!("stored username {username:?}: {e}")))?;
        claims.push(Claim {
            username,
            cell_id: CellId::new(cell_id),
        });
    }
    Ok(claims)
}
