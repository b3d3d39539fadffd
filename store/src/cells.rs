//! Cell Store - the fixed arena of grid cells.
//!
//! Each slot carries an atomic state word. Reservation is a single
//! `Free -> Reserved` compare-and-swap, so concurrent allocators never wait on
//! one another: a slot another caller holds is simply skipped and the scan
//! moves on to the next candidate.
//!
//! ```text
//!   Free ──claim_free_cell──▶ Reserved ──mark_filled──▶ Filled
//!    ▲                           │
//!    └──────── drop (release) ───┘
//! ```
//!
//! `Filled` is terminal. The low-water `free_hint` only ever advances past
//! filled slots, so every slot below it is filled.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use claimgrid_types::{Cell, CellId, GridCoord};

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum SlotState {
    Free = 0,
    Reserved = 1,
    Filled = 2,
}

impl SlotState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => SlotState::Free,
            1 => SlotState::Reserved,
            _ => SlotState::Filled,
        }
    }
}

#[derive(Debug)]
struct Slot {
    state: AtomicU8,
    mask: AtomicBool,
}

impl Slot {
    fn new(filled: bool, is_mask: bool) -> Self {
        let state = if filled {
            SlotState::Filled
        } else {
            SlotState::Free
        };
        Self {
            state: AtomicU8::new(state as u8),
            mask: AtomicBool::new(is_mask),
        }
    }

    fn state(&self) -> SlotState {
        SlotState::from_raw(self.state.load(Ordering::Acquire))
    }
}

#[derive(Debug)]
pub struct CellStore {
    size: u32,
    slots: Box<[Slot]>,
    free_hint: AtomicUsize,
    filled: AtomicUsize,
}

impl CellStore {
    /// A fresh grid with every cell free and unmasked.
    #[must_use]
    pub fn new(size: u32) -> Self {
        let len = size as usize * size as usize;
        let slots = (0..len).map(|_| Slot::new(false, false)).collect();
        Self {
            size,
            slots,
            free_hint: AtomicUsize::new(0),
            filled: AtomicUsize::new(0),
        }
    }

    /// Rebuild the arena from persisted cell rows.
    ///
    /// Every cell of the grid must be present exactly once.
    pub fn from_cells(size: u32, cells: &[Cell]) -> Result<Self, StoreError> {
        let len = size as usize * size as usize;
        if cells.len() != len {
            return Err(StoreError::Corrupt(format!(
                "expected {len} cells for a {size}x{size} grid, found {}",
                cells.len()
            )));
        }

        let mut rows: Vec<Option<(bool, bool)>> = vec![None; len];
        for cell in cells {
            let index = cell.id.index();
            if cell.id.value() < 1 || index >= len {
                return Err(StoreError::UnknownCell(cell.id));
            }
            if rows[index].replace((cell.filled, cell.is_mask)).is_some() {
                return Err(StoreError::Corrupt(format!("cell {} listed twice", cell.id)));
            }
        }

        let slots: Box<[Slot]> = rows
            .into_iter()
            .map(|row| {
                let (filled, is_mask) = row.unwrap_or_default();
                Slot::new(filled, is_mask)
            })
            .collect();
        let filled = slots
            .iter()
            .filter(|slot| slot.state() == SlotState::Filled)
            .count();
        let hint = slots
            .iter()
            .position(|slot| slot.state() != SlotState::Filled)
            .unwrap_or(len);

        Ok(Self {
            size,
            slots,
            free_hint: AtomicUsize::new(hint),
            filled: AtomicUsize::new(filled),
        })
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn filled_count(&self) -> usize {
        self.filled.load(Ordering::Acquire)
    }

    /// Reserve one free cell without waiting on cells other callers hold.
    ///
    /// Returns `None` when no unreserved free cell exists right now. That
    /// includes the case where free cells exist but are all reserved by
    /// in-flight transactions; the caller may retry later.
    #[must_use]
    pub fn claim_free_cell(&self) -> Option<CellReservation<'_>> {
        let start = self.free_hint.load(Ordering::Acquire).min(self.slots.len());
        for index in start..self.slots.len() {
            let slot = &self.slots[index];
            match slot.state.compare_exchange(
                SlotState::Free as u8,
                SlotState::Reserved as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(CellReservation {
                        store: self,
                        index,
                        settled: false,
                    });
                }
                Err(raw) if SlotState::from_raw(raw) == SlotState::Filled => {
                    // Only moves if every slot below `index` is already filled.
                    let _ = self.free_hint.compare_exchange(
                        index,
                        index + 1,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                }
                Err(_) => {}
            }
        }
        None
    }

    pub fn set_mask(&self, coord: GridCoord, masked: bool) -> Result<CellId, StoreError> {
        let id = coord.cell_id(self.size);
        let slot = self.slot(id)?;
        slot.mask.store(masked, Ordering::Release);
        Ok(id)
    }

    pub fn cell(&self, id: CellId) -> Result<Cell, StoreError> {
        let slot = self.slot(id)?;
        Ok(self.snapshot(id.index(), slot))
    }

    /// Point-in-time copy of every cell. Reserved cells read as free.
    #[must_use]
    pub fn cells(&self) -> Vec<Cell> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| self.snapshot(index, slot))
            .collect()
    }

    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state() == SlotState::Reserved)
            .count()
    }

    /// Whether an in-flight transaction currently holds `id`.
    #[must_use]
    pub fn is_reserved(&self, id: CellId) -> bool {
        self.slot(id).is_ok_and(|slot| slot.state() == SlotState::Reserved)
    }

    fn slot(&self, id: CellId) -> Result<&Slot, StoreError> {
        if id.value() < 1 {
            return Err(StoreError::UnknownCell(id));
        }
        self.slots.get(id.index()).ok_or(StoreError::UnknownCell(id))
    }

    fn snapshot(&self, index: usize, slot: &Slot) -> Cell {
        let id = CellId::from_index(index);
        let coord = GridCoord::from_cell_id(id, self.size)
            .expect("arena length is size * size, so every index maps to a coordinate");
        Cell {
            id,
            coord,
            filled: slot.state() == SlotState::Filled,
            is_mask: slot.mask.load(Ordering::Acquire),
        }
    }
}

/// Exclusive hold on one reserved cell.
///
/// Dropping the reservation without calling [`CellReservation::mark_filled`]
/// returns the cell to the free pool.
#[derive(Debug)]
pub struct CellReservation<'a> {
    store: &'a CellStore,
    index: usize,
    settled: bool,
}

impl CellReservation<'_> {
    #[must_use]
    pub fn cell_id(&self) -> CellId {
        CellId::from_index(self.index)
    }

    /// Commit the reservation. Must only follow a committed claim for this cell.
    pub fn mark_filled(mut self) {
        self.store.slots[self.index]
            .state
            .store(SlotState::Filled as u8, Ordering::Release);
        self.store.filled.fetch_add(1, Ordering::AcqRel);
        self.settled = true;
    }

    /// Return the cell to the free pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for CellReservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.store.slots[self.index]
                .state
                .store(SlotState::Free as u8, Ordering::Release);
        }
    }
}
