/*
 * Synchronization Primitives
 *
 * Mutex, counting semaphore, reusable barrier and bounded message queue,
 * all built on the same two-step protocol: a blocking call appends the
 * caller to the primitive's FIFO waiter list and parks it via the
 * scheduler; the releasing side removes a waiter from the list and moves
 * it back to the ready queue.
 *
 * Primitives live in crate-global registries and are referred to by
 * small Copy handles, so tasks can share them freely. Destroying a
 * primitive wakes every waiter into a `Destroyed` error and leaves a
 * tombstone entry behind: later calls observe the finished state and
 * fail the same way.
 *
 * All counter mutations run with preemption disabled (the registries are
 * spin-locked, and the tick handler must never force a yield out of a
 * critical section).
 */

pub mod barrier;
pub mod mqueue;
pub mod mutex;
pub mod semaphore;

pub use barrier::Barrier;
pub use mqueue::MessageQueue;
pub use mutex::Mutex;
pub use semaphore::Semaphore;
