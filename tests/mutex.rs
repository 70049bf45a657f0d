// Mutex semantics: ownership errors (unlock while not held, recursive
// lock), mutual exclusion over an unsynchronized counter under
// contention, and destroy waking parked waiters into an error.

mod common;

use core::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use fibros::KernelError;
use fibros::sync::Mutex;
use fibros::task;

const TASKS: usize = 5;
const INCREMENTS: usize = 1_000;

struct SharedCounter(UnsafeCell<u64>);
unsafe impl Sync for SharedCounter {}

static COUNTER: SharedCounter = SharedCounter(UnsafeCell::new(0));
static DONE: AtomicUsize = AtomicUsize::new(0);
static WAITER_FAILED: AtomicUsize = AtomicUsize::new(0);

#[test]
fn mutex_enforces_ownership_and_exclusion() {
    fibros::init().unwrap();

    let m = Mutex::create().unwrap();

    // Not held yet: unlock is a state error.
    assert_eq!(m.unlock(), Err(KernelError::InvalidState));

    m.lock().unwrap();
    assert_eq!(m.lock(), Err(KernelError::InvalidState));

    for i in 0..TASKS {
        task::spawn(&format!("lk{i}"), move || {
            for _ in 0..INCREMENTS {
                m.lock().unwrap();
                unsafe {
                    let slot = COUNTER.0.get();
                    *slot += 1;
                }
                m.unlock().unwrap();
            }
            DONE.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    // Let the workers queue up behind us, then hand the mutex over.
    task::sleep_ms(10);
    m.unlock().unwrap();

    common::wait_until(|| DONE.load(Ordering::SeqCst) == TASKS, 30_000);
    assert_eq!(unsafe { *COUNTER.0.get() }, (TASKS * INCREMENTS) as u64);

    // Destroy while a waiter is parked behind the owner.
    let doomed = Mutex::create().unwrap();
    doomed.lock().unwrap();
    task::spawn("blocked", move || {
        assert_eq!(doomed.lock(), Err(KernelError::Destroyed));
        WAITER_FAILED.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    task::sleep_ms(10);
    doomed.destroy().unwrap();
    common::wait_until(|| WAITER_FAILED.load(Ordering::SeqCst) == 1, 2_000);

    assert_eq!(doomed.lock(), Err(KernelError::Destroyed));
    assert_eq!(doomed.unlock(), Err(KernelError::Destroyed));
}
