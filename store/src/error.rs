use std::io;
use std::path::PathBuf;

use claimgrid_types::CellId;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The database stayed locked past the busy timeout. Retryable.
    #[error("storage busy: transaction timed out waiting for a lock")]
    Busy,
    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("store is inconsistent: {0}")]
    Corrupt(String),
    #[error("cell {0} does not exist")]
    UnknownCell(CellId),
}

impl StoreError {
    /// Whether the failed unit may succeed if re-submitted unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Busy)
    }

    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err
            && matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            )
        {
            return StoreError::Busy;
        }
        StoreError::Sqlite(err)
    }
}
