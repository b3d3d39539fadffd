//! Async facade for request handlers.
//!
//! The engine is synchronous and may block on the store's busy timeout, so
//! every call hops onto tokio's blocking pool.

use std::sync::Arc;

use claimgrid_types::{AllocationOutcome, CapacityStatus, PreviewReport, Username};
use thiserror::Error;
use tokio::task::JoinError;

use crate::coordinator::{Coordinator, CoordinatorError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("engine task failed: {0}")]
    Join(#[from] JoinError),
}

#[derive(Clone)]
pub struct ClaimService {
    coordinator: Arc<Coordinator>,
}

impl ClaimService {
    #[must_use]
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub async fn preview(&self, raw: String) -> Result<PreviewReport, ServiceError> {
        let coordinator = Arc::clone(&self.coordinator);
        let report = tokio::task::spawn_blocking(move || coordinator.preview(&raw)).await??;
        Ok(report)
    }

    pub async fn confirm(
        &self,
        identifiers: Vec<Username>,
    ) -> Result<AllocationOutcome, ServiceError> {
        let coordinator = Arc::clone(&self.coordinator);
        let outcome =
            tokio::task::spawn_blocking(move || coordinator.confirm(&identifiers)).await??;
        Ok(outcome)
    }

    pub async fn confirm_raw(&self, raw: String) -> Result<AllocationOutcome, ServiceError> {
        let coordinator = Arc::clone(&self.coordinator);
        let outcome = tokio::task::spawn_blocking(move || coordinator.confirm_raw(&raw)).await??;
        Ok(outcome)
    }

    pub async fn capacity_status(&self) -> Result<CapacityStatus, ServiceError> {
        let coordinator = Arc::clone(&self.coordinator);
        let status = tokio::task::spawn_blocking(move || coordinator.capacity_status()).await??;
        Ok(status)
    }
}
