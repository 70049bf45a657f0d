/*
 * fibros: a user-space cooperative-multitasking kernel
 *
 * fibros multiplexes a single host thread across many logical tasks, each
 * with its own private 64 KiB stack. Machine-context save/restore (POSIX
 * ucontext) is the switching primitive; a periodic 1 ms signal-driven timer
 * provides preemptive time slicing on top of a priority-aging scheduler.
 * Blocking primitives (join, sleep, mutex, semaphore, barrier, message
 * queue) share one suspend/wake protocol mediated by a dispatcher task.
 *
 * The crate is a library. A program calls `fibros::init()` from the thread
 * that will host the runtime; that caller becomes task 0 and then drives
 * the task and sync APIs. Everything runs on that one thread; tasks are
 * concurrent, never parallel.
 *
 * ```no_run
 * fibros::init().unwrap();
 *
 * let child = fibros::task::spawn("worker", || {
 *     fibros::task::sleep_ms(10);
 * }).unwrap();
 *
 * fibros::task::join(child).unwrap();
 * ```
 */

pub mod ports;
pub mod scheduler;
pub mod sync;
pub mod utils;

pub use scheduler::task;
pub use scheduler::{KernelError, Result};

/// Bring up the runtime on the calling thread.
///
/// The caller becomes task 0 (main), the dispatcher task is created, and
/// the periodic tick timer is armed. Fails with [`KernelError::InvalidState`]
/// if the runtime is already up.
pub fn init() -> Result<()> {
    scheduler::init()
}
