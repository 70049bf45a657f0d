// Semaphore mutual exclusion under preemption: 30 tasks hammer an
// unsynchronized counter, each increment guarded by a semaphore token
// that main releases once. Every read-modify-write happens with the
// token held, so the final value is exact. Also: destroy wakes blocked
// waiters into an error, and later calls keep failing.

mod common;

use core::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use fibros::KernelError;
use fibros::sync::Semaphore;
use fibros::task;

const TASKS: usize = 30;
const INCREMENTS: usize = 10_000;

struct SharedCounter(UnsafeCell<u64>);
// All tasks run on the one runtime thread; the semaphore serializes the
// read-modify-write.
unsafe impl Sync for SharedCounter {}

static COUNTER: SharedCounter = SharedCounter(UnsafeCell::new(0));
static DONE: AtomicUsize = AtomicUsize::new(0);
static WAITER_FAILED: AtomicUsize = AtomicUsize::new(0);

#[test]
fn semaphore_guards_a_shared_counter() {
    fibros::init().unwrap();

    let gate = Semaphore::create(0).unwrap();
    for i in 0..TASKS {
        task::spawn(&format!("inc{i}"), move || {
            for _ in 0..INCREMENTS {
                gate.down().unwrap();
                // Unsynchronized on purpose; the token is the only guard.
                unsafe {
                    let slot = COUNTER.0.get();
                    *slot += 1;
                }
                gate.up().unwrap();
            }
            DONE.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    // Let every task park on the semaphore, then release the one token.
    task::sleep_ms(20);
    gate.up().unwrap();

    common::wait_until(|| DONE.load(Ordering::SeqCst) == TASKS, 60_000);
    assert_eq!(
        unsafe { *COUNTER.0.get() },
        (TASKS * INCREMENTS) as u64
    );
    gate.destroy().unwrap();

    // Destroy wakes parked waiters into an error.
    let doomed = Semaphore::create(0).unwrap();
    task::spawn("blocked", move || {
        assert_eq!(doomed.down(), Err(KernelError::Destroyed));
        WAITER_FAILED.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    task::sleep_ms(10);
    doomed.destroy().unwrap();
    common::wait_until(|| WAITER_FAILED.load(Ordering::SeqCst) == 1, 2_000);

    // The tombstone keeps failing.
    assert_eq!(doomed.down(), Err(KernelError::Destroyed));
    assert_eq!(doomed.up(), Err(KernelError::Destroyed));
    assert_eq!(doomed.destroy(), Err(KernelError::Destroyed));
}
