//! The two-phase preview/confirm workflow.

use claimgrid_types::StopReason;

use crate::common::{memory_coordinator, sqlite_coordinator, user};

#[test]
fn preview_reports_existing_and_ready_identifiers() {
    let coordinator = memory_coordinator(5, 25);
    coordinator.confirm_raw("ada\ngrace").unwrap();

    let report = coordinator
        .preview("username\nGrace\nlinus\n\"ken\", ada\nlinus")
        .unwrap();

    let existing: Vec<_> = report.already_exists.iter().map(|u| u.as_str()).collect();
    let ready: Vec<_> = report.ready_to_insert.iter().map(|u| u.as_str()).collect();
    assert_eq!(existing, ["ada", "grace"]);
    assert_eq!(ready, ["linus", "ken"]);
    assert_eq!(report.capacity.used, 2);
    assert_eq!(report.capacity.remaining(), 23);
}

#[test]
fn confirm_after_concurrent_claim_skips_the_stale_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.db");
    let ours = sqlite_coordinator(&path, 4, 16);
    let theirs = sqlite_coordinator(&path, 4, 16);

    let report = ours.preview("a\nb\nc\nd").unwrap();
    assert_eq!(report.ready_to_insert.len(), 4);

    // Between our preview and confirm, another process claims "c".
    theirs.confirm(&["c"]).unwrap();

    let outcome = ours.confirm_preview(&report).unwrap();
    assert_eq!(outcome.allocated, 3);
    assert_eq!(outcome.skipped, 1);
    assert!(outcome.stop.is_none());

    let audit = ours.store().audit().unwrap();
    assert_eq!(audit.claims, 4);
    assert!(ours.store().exists(&user("c")).unwrap());
}

#[test]
fn stale_capacity_in_preview_does_not_bind_confirm() {
    let coordinator = memory_coordinator(5, 3);
    let report = coordinator.preview("a,b,c").unwrap();
    assert_eq!(report.capacity.remaining(), 3);

    coordinator.confirm(&["x", "y"]).unwrap();

    let outcome = coordinator.confirm_preview(&report).unwrap();
    assert_eq!(outcome.allocated, 1);
    assert_eq!(outcome.skipped, 2);
    assert_eq!(outcome.stop, Some(StopReason::CapacityReached));
}

#[test]
fn abandoned_preview_leaves_no_trace() {
    let coordinator = memory_coordinator(3, 9);
    for _ in 0..3 {
        coordinator.preview("a\nb\nc").unwrap();
    }
    let audit = coordinator.store().audit().unwrap();
    assert_eq!(audit.claims, 0);
    assert_eq!(audit.filled_cells, 0);
    assert_eq!(audit.reserved_cells, 0);
}
