//! Concurrent batches against one shared grid.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use claimgrid_engine::{BatchLimits, ClaimService, Coordinator};
use claimgrid_store::{GridStore, MemoryLedger, SqliteLedger};
use claimgrid_types::AllocationOutcome;

use crate::common::{BUSY_TIMEOUT, batch, memory_coordinator, sqlite_coordinator, user};

fn run_concurrently(coordinators: &[Coordinator], batches: &[Vec<String>]) -> Vec<AllocationOutcome> {
    let barrier = Barrier::new(batches.len());
    thread::scope(|scope| {
        let handles: Vec<_> = batches
            .iter()
            .enumerate()
            .map(|(i, batch)| {
                let coordinator = &coordinators[i % coordinators.len()];
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    coordinator.confirm(batch).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn disjoint_batches_allocate_exactly_what_was_requested() {
    let coordinator = memory_coordinator(16, 256);
    let batches: Vec<_> = (0..8).map(|i| batch(i, 24)).collect();

    let outcomes = run_concurrently(std::slice::from_ref(&coordinator), &batches);

    for outcome in &outcomes {
        assert_eq!(outcome.allocated, 24);
        assert_eq!(outcome.skipped, 0);
        assert!(outcome.stop.is_none());
    }

    let store = coordinator.store();
    let claims = store.claims().unwrap();
    assert_eq!(claims.len(), 8 * 24);
    let cells: HashSet<_> = claims.iter().map(|claim| claim.cell_id).collect();
    assert_eq!(cells.len(), claims.len(), "two claims share a cell");

    let audit = store.audit().unwrap();
    assert!(audit.is_consistent(), "{:?}", audit.violations);
    assert_eq!(audit.filled_cells, 8 * 24);
    assert_eq!(audit.reserved_cells, 0);
}

#[test]
fn same_identifier_in_racing_batches_is_claimed_once() {
    let coordinator = memory_coordinator(8, 64);
    let mut batches: Vec<_> = (0..6).map(|i| batch(i, 4)).collect();
    for batch in &mut batches {
        batch.insert(2, "contested".to_string());
    }

    let outcomes = run_concurrently(std::slice::from_ref(&coordinator), &batches);

    let allocated: usize = outcomes.iter().map(|o| o.allocated).sum();
    let skipped: usize = outcomes.iter().map(|o| o.skipped).sum();
    assert_eq!(allocated, 6 * 4 + 1);
    assert_eq!(skipped, 5);

    let contested: Vec<_> = coordinator
        .store()
        .claims()
        .unwrap()
        .into_iter()
        .filter(|claim| claim.username == user("contested"))
        .collect();
    assert_eq!(contested.len(), 1);
    assert!(coordinator.store().audit().unwrap().is_consistent());
}

#[test]
fn concurrent_batches_never_exceed_the_limit() {
    let coordinator = memory_coordinator(16, 50);
    let batches: Vec<_> = (0..8).map(|i| batch(i, 20)).collect();

    let outcomes = run_concurrently(std::slice::from_ref(&coordinator), &batches);

    let allocated: usize = outcomes.iter().map(|o| o.allocated).sum();
    assert_eq!(allocated, 50);
    for outcome in &outcomes {
        assert_eq!(outcome.settled() + outcome.deferred.len(), 20);
    }
    assert_eq!(coordinator.capacity_status().unwrap().used, 50);

    let audit = coordinator.store().audit().unwrap();
    assert!(audit.is_consistent(), "{:?}", audit.violations);
    assert_eq!(audit.filled_cells, 50);
}

#[test]
fn contention_for_the_last_cells_fills_the_grid_without_overlap() {
    let coordinator = memory_coordinator(4, 100);
    let batches: Vec<_> = (0..4).map(|i| batch(i, 10)).collect();

    let outcomes = run_concurrently(std::slice::from_ref(&coordinator), &batches);

    let allocated: usize = outcomes.iter().map(|o| o.allocated).sum();
    let settled: usize = outcomes.iter().map(AllocationOutcome::settled).sum();
    assert_eq!(allocated, 16);
    assert_eq!(settled, 40);

    let audit = coordinator.store().audit().unwrap();
    assert!(audit.is_consistent(), "{:?}", audit.violations);
    assert_eq!(audit.filled_cells, 16);
}

#[test]
fn separate_connections_share_one_database_safely() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.db");
    let coordinators: Vec<_> = (0..3).map(|_| sqlite_coordinator(&path, 8, 40)).collect();
    let batches: Vec<_> = (0..6).map(|i| batch(i, 10)).collect();

    let outcomes = run_concurrently(&coordinators, &batches);

    let allocated: usize = outcomes.iter().map(|o| o.allocated).sum();
    let deferred: usize = outcomes.iter().map(|o| o.deferred.len()).sum();
    assert_eq!(deferred, 0);
    assert_eq!(allocated, 40);

    // A fresh process sees the committed state.
    let ledger = SqliteLedger::open(&path, 8, BUSY_TIMEOUT).unwrap();
    let store = GridStore::open(8, 40, Box::new(ledger)).unwrap();
    let audit = store.audit().unwrap();
    assert!(audit.is_consistent(), "{:?}", audit.violations);
    assert_eq!(audit.claims, 40);
    assert_eq!(audit.filled_cells, 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn service_tasks_race_without_double_assignment() {
    let store = GridStore::open(10, 100, Box::new(MemoryLedger::new())).unwrap();
    let service = ClaimService::new(Coordinator::new(Arc::new(store), BatchLimits::default()));

    let mut handles = Vec::new();
    for i in 0..12 {
        let service = service.clone();
        let raw = batch(i % 6, 12).join(",");
        handles.push(tokio::spawn(async move { service.confirm_raw(raw).await }));
    }

    let mut allocated = 0;
    for handle in handles {
        allocated += handle.await.unwrap().unwrap().allocated;
    }
    // Six distinct batches, each submitted twice.
    assert_eq!(allocated, 72);

    let audit = service.coordinator().store().audit().unwrap();
    assert!(audit.is_consistent(), "{:?}", audit.violations);
    assert_eq!(audit.claims, 72);
}
