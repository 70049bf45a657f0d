// join() delivers exit codes: explicit exit_current codes, the implicit
// 0 of a closure that returns, FIFO delivery to several joiners, and the
// error cases (self-join, unknown task, already-reaped task).

mod common;

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use fibros::KernelError;
use fibros::task::{self, TaskId};

static FIRST: AtomicI32 = AtomicI32::new(-1);
static SECOND: AtomicI32 = AtomicI32::new(-1);
static JOINED: AtomicUsize = AtomicUsize::new(0);

#[test]
fn join_delivers_exit_codes() {
    fibros::init().unwrap();

    // Explicit exit code.
    let child = task::spawn("answer", || task::exit_current(42)).unwrap();
    assert_eq!(task::join(child), Ok(42));

    // Implicit exit on closure return.
    let quiet = task::spawn("quiet", || {}).unwrap();
    assert_eq!(task::join(quiet), Ok(0));

    // The child was reaped after finishing; its id is gone.
    assert_eq!(task::join(child), Err(KernelError::NotFound));

    // Self-join and unknown targets fail.
    assert_eq!(task::join(task::current_id()), Err(KernelError::InvalidArgument));
    assert_eq!(task::join(TaskId(4096)), Err(KernelError::NotFound));

    // Several joiners all receive the same exit code, FIFO.
    let sleeper = task::spawn("sleeper", || {
        task::sleep_ms(30);
        task::exit_current(7);
    })
    .unwrap();
    task::spawn("w1", move || {
        FIRST.store(task::join(sleeper).unwrap(), Ordering::SeqCst);
        JOINED.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    task::spawn("w2", move || {
        SECOND.store(task::join(sleeper).unwrap(), Ordering::SeqCst);
        JOINED.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    common::wait_until(|| JOINED.load(Ordering::SeqCst) == 2, 2_000);
    assert_eq!(FIRST.load(Ordering::SeqCst), 7);
    assert_eq!(SECOND.load(Ordering::SeqCst), 7);
}
