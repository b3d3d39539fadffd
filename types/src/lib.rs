//! Core domain types for claimgrid.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod ids;
pub use ids::{CellId, GridCoord};

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("identifier must not be empty")]
    EmptyIdentifier,
    #[error("identifier is {len} characters, maximum is {max}")]
    IdentifierTooLong { len: usize, max: usize },
    #[error("identifier contains a control character")]
    ControlCharacter,
    #[error("batch contains no identifiers")]
    EmptyBatch,
    #[error("batch has {len} identifiers, maximum is {max}")]
    BatchTooLarge { len: usize, max: usize },
    #[error("coordinate ({x}, {y}) is outside a {size}x{size} grid")]
    CoordinateOutOfRange { x: u32, y: u32, size: u32 },
}

// ============================================================================
// Username
// ============================================================================

/// A normalized claim identifier: trimmed, lowercased, non-empty.
///
/// Two raw inputs that differ only in case or surrounding whitespace produce
/// equal `Username`s, which is what makes the ledger case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    pub const DEFAULT_MAX_LEN: usize = 64;

    pub fn new(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        Self::parse(raw, Self::DEFAULT_MAX_LEN)
    }

    pub fn parse(raw: impl AsRef<str>, max_len: usize) -> Result<Self, ValidationError> {
        let normalized = raw.as_ref().trim().to_lowercase();
        if normalized.is_empty() {
            return Err(ValidationError::EmptyIdentifier);
        }
        if normalized.chars().any(char::is_control) {
            return Err(ValidationError::ControlCharacter);
        }
        let len = normalized.chars().count();
        if len > max_len {
            return Err(ValidationError::IdentifierTooLong { len, max: max_len });
        }
        Ok(Self(normalized))
    }

    /// Rebuild an identifier accepted earlier, e.g. a ledger row.
    ///
    /// Normalization and the character checks still apply, but not the length
    /// cap: the limit in force at insert time may have exceeded the default.
    pub fn from_stored(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        Self::parse(raw, usize::MAX)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Used by serde, so previously stored identifiers of any length round-trip.
impl TryFrom<String> for Username {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_stored(value)
    }
}

impl TryFrom<&str> for Username {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl std::ops::Deref for Username {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Grid Records
// ============================================================================

/// One addressable unit of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub coord: GridCoord,
    pub filled: bool,
    pub is_mask: bool,
}

/// A permanent binding of one username to one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub username: Username,
    pub cell_id: CellId,
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityStatus {
    pub used: u64,
    pub limit: u64,
}

impl CapacityStatus {
    #[must_use]
    pub fn remaining(self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    #[must_use]
    pub fn is_exhausted(self) -> bool {
        self.used >= self.limit
    }
}

/// Why an allocation pass stopped before reaching the end of its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    CapacityReached,
    GridFull,
}

/// Result of one allocation pass over a batch.
///
/// `deferred` holds candidates whose transaction timed out; they are counted
/// as neither allocated nor skipped and must be re-submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub allocated: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deferred: Vec<Username>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopReason>,
}

impl AllocationOutcome {
    /// Candidates the pass accounted for, excluding deferred ones.
    #[must_use]
    pub fn settled(&self) -> usize {
        self.allocated + self.skipped
    }
}

/// Non-mutating classification of a batch against the ledger.
///
/// Advisory only: a later confirm re-validates everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewReport {
    pub already_exists: BTreeSet<Username>,
    pub ready_to_insert: Vec<Username>,
    pub capacity: CapacityStatus,
}
