use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Stable identity of one grid cell.
///
/// Ids are 1-based and row-major: the cell at `(x, y)` on a grid of side
/// `size` has id `(y - 1) * size + x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(i64);

impl CellId {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(self) -> i64 {
        self.0
    }

    /// Zero-based slot index for arena addressing.
    #[must_use]
    pub fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(index as i64 + 1)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 1-based coordinate on the square grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCoord {
    x: u32,
    y: u32,
}

impl GridCoord {
    pub fn new(x: u32, y: u32, size: u32) -> Result<Self, ValidationError> {
        if x == 0 || y == 0 || x > size || y > size {
            return Err(ValidationError::CoordinateOutOfRange { x, y, size });
        }
        Ok(Self { x, y })
    }

    #[must_use]
    pub fn x(self) -> u32 {
        self.x
    }

    #[must_use]
    pub fn y(self) -> u32 {
        self.y
    }

    #[must_use]
    pub fn cell_id(self, size: u32) -> CellId {
        CellId::new(i64::from(self.y - 1) * i64::from(size) + i64::from(self.x))
    }

    /// Inverse of [`GridCoord::cell_id`]. Returns `None` for ids outside the grid.
    #[must_use]
    pub fn from_cell_id(id: CellId, size: u32) -> Option<Self> {
        let size = i64::from(size);
        let value = id.value();
        if value < 1 || value > size * size {
            return None;
        }
        let zero = value - 1;
        Some(Self {
            x: (zero % size + 1) as u32,
            y: (zero / size + 1) as u32,
        })
    }
}

impl fmt::Display for GridCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}
