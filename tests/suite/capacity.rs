//! Running out of free cells and running into the claim limit.

use claimgrid_types::StopReason;

use crate::common::{batch, memory_coordinator, user};

#[test]
fn few_free_cells_allocate_in_input_order() {
    // 3x3 grid with six cells taken leaves three free.
    let coordinator = memory_coordinator(3, 100);
    coordinator.confirm(&batch(0, 6)).unwrap();

    let candidates = batch(1, 6);
    let outcome = coordinator.confirm(&candidates).unwrap();
    assert_eq!(outcome.allocated, 3);
    assert_eq!(outcome.skipped, 3);
    assert_eq!(outcome.stop, Some(StopReason::GridFull));

    let store = coordinator.store();
    for (i, name) in candidates.iter().enumerate() {
        let holds = store.exists(&user(name)).unwrap();
        assert_eq!(holds, i < 3, "{name}");
    }
    assert_eq!(store.audit().unwrap().filled_cells, 9);
}

#[test]
fn limit_stops_the_batch_before_the_grid_fills() {
    let coordinator = memory_coordinator(10, 12);
    coordinator.confirm(&batch(0, 10)).unwrap();

    let outcome = coordinator.confirm(&batch(1, 5)).unwrap();
    assert_eq!(outcome.allocated, 2);
    assert_eq!(outcome.skipped, 3);
    assert_eq!(outcome.stop, Some(StopReason::CapacityReached));
    assert_eq!(coordinator.capacity_status().unwrap().used, 12);
}

#[test]
fn batch_at_the_limit_allocates_nothing() {
    let coordinator = memory_coordinator(4, 4);
    coordinator.confirm(&batch(0, 4)).unwrap();

    let outcome = coordinator.confirm(&batch(1, 7)).unwrap();
    assert_eq!(outcome.allocated, 0);
    assert_eq!(outcome.skipped, 7);
    assert_eq!(outcome.stop, Some(StopReason::CapacityReached));
    assert!(coordinator.capacity_status().unwrap().is_exhausted());
}

#[test]
fn existing_claims_are_skipped_without_consuming_capacity() {
    let coordinator = memory_coordinator(4, 3);
    coordinator.confirm(&["a", "b"]).unwrap();

    let outcome = coordinator.confirm(&["a", "b", "c"]).unwrap();
    assert_eq!(outcome.allocated, 1);
    assert_eq!(outcome.skipped, 2);
    assert!(outcome.stop.is_none());
}
