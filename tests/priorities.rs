// Priority surface: spawn/set/get round-trips, range enforcement at the
// -20/+20 bounds, re-basing a parked task, and the stats snapshot. The
// parked task is kept at non-urgent priorities until the very end so a
// quantum expiry in the middle of the test cannot dispatch it early.

use fibros::KernelError;
use fibros::task::{self, TaskId, TaskState};

#[test]
fn priorities_round_trip_and_enforce_bounds() {
    fibros::init().unwrap();

    let parked = task::spawn_with_priority("parked", 5, || {}).unwrap();
    assert_eq!(task::base_priority(parked), Ok(5));

    // set followed by get returns the new base priority; +20 is legal.
    task::set_priority(parked, 20).unwrap();
    assert_eq!(task::base_priority(parked), Ok(20));

    // One past either bound fails and leaves the priority untouched.
    assert_eq!(task::set_priority(parked, 21), Err(KernelError::InvalidArgument));
    assert_eq!(task::set_priority(parked, -21), Err(KernelError::InvalidArgument));
    assert_eq!(task::base_priority(parked), Ok(20));

    // Spawning outside the range fails too.
    assert_eq!(
        task::spawn_with_priority("bad", 21, || {}).err(),
        Some(KernelError::InvalidArgument)
    );

    // Unknown targets.
    assert_eq!(task::set_priority(TaskId(4096), 0), Err(KernelError::NotFound));
    assert_eq!(task::base_priority(TaskId(4096)), Err(KernelError::NotFound));

    // Re-basing the executing task needs no queue surgery.
    task::set_priority(task::current_id(), 3).unwrap();
    assert_eq!(task::base_priority(task::current_id()), Ok(3));

    // Stats cover every live task.
    let stats = task::stats().unwrap();
    let names: Vec<&str> = stats.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"main"));
    assert!(names.contains(&"dispatcher"));
    assert!(names.contains(&"parked"));
    let parked_stats = stats.iter().find(|s| s.id == parked).unwrap();
    assert_eq!(parked_stats.state, TaskState::Ready);
    assert_eq!(parked_stats.base_priority, 20);

    // -20 is legal; the task is now the most urgent and may be dispatched
    // the moment we are preempted, so only the join result is checked.
    task::set_priority(parked, -20).unwrap();
    match task::join(parked) {
        Ok(0) => {}
        // Already dispatched, finished and reaped between the two calls.
        Err(KernelError::NotFound) => {}
        other => panic!("unexpected join outcome: {other:?}"),
    }
}
