/*
 * Counting Semaphore
 *
 * down() takes a credit, parking the caller FIFO while none are
 * available; up() wakes the head waiter (if any) and then adds a credit.
 * A woken waiter re-tests under the preemption guard: the wakeup does
 * not transfer the credit, so a waiter that loses the race simply parks
 * again, and a waiter woken by destroy() observes the finished state and
 * fails.
 */

use core::mem;
use std::collections::VecDeque;

use spin::Mutex as SpinMutex;

use crate::scheduler::task::{self, TaskId};
use crate::scheduler::{self, KernelError, PreemptGuard, Result};

/// Handle to a registry-backed semaphore. Copy it freely between tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Semaphore(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SemState {
    Active,
    Finished,
}

struct SemEntry {
    state: SemState,
    credits: i64,
    waiters: VecDeque<TaskId>,
}

static SEMAPHORES: SpinMutex<Vec<SemEntry>> = SpinMutex::new(Vec::new());

impl Semaphore {
    /// Create a semaphore holding `initial` credits.
    pub fn create(initial: i64) -> Result<Semaphore> {
        if initial < 0 {
            return Err(KernelError::InvalidArgument);
        }
        let _guard = PreemptGuard::new();
        let mut registry = SEMAPHORES.lock();
        let id = registry.len();
        registry.push(SemEntry {
            state: SemState::Active,
            credits: initial,
            waiters: VecDeque::new(),
        });
        log::debug!("semaphore {id} created with {initial} credits");
        Ok(Semaphore(id))
    }

    /// Take a credit, blocking while none are available. Fails with
    /// `Destroyed` if the semaphore is (or becomes) destroyed.
    pub fn down(self) -> Result<()> {
        if !scheduler::is_started() {
            return Err(KernelError::Uninitialized);
        }
        let me = task::current_id();
        loop {
            let _guard = PreemptGuard::new();
            {
                let mut registry = SEMAPHORES.lock();
                let sem = registry.get_mut(self.0).ok_or(KernelError::NotFound)?;
                if sem.state == SemState::Finished {
                    return Err(KernelError::Destroyed);
                }
                if sem.credits > 0 {
                    sem.credits -= 1;
                    return Ok(());
                }
                sem.waiters.push_back(me);
            }
            task::block_current_on_sync()?;
            // Re-test on resume: destroy may have woken us, or another
            // task may have consumed the credit first.
        }
    }

    /// Release a credit, waking the head waiter if one is parked.
    pub fn up(self) -> Result<()> {
        let _guard = PreemptGuard::new();
        let waiter = {
            let mut registry = SEMAPHORES.lock();
            let sem = registry.get_mut(self.0).ok_or(KernelError::NotFound)?;
            if sem.state == SemState::Finished {
                return Err(KernelError::Destroyed);
            }
            let waiter = sem.waiters.pop_front();
            sem.credits += 1;
            waiter
        };
        if let Some(id) = waiter {
            task::wake_sync_waiter(id)?;
        }
        Ok(())
    }

    /// Destroy the semaphore. Every parked waiter resumes with
    /// `Destroyed`, as does every later call.
    pub fn destroy(self) -> Result<()> {
        let _guard = PreemptGuard::new();
        let waiters = {
            let mut registry = SEMAPHORES.lock();
            let sem = registry.get_mut(self.0).ok_or(KernelError::NotFound)?;
            if sem.state == SemState::Finished {
                return Err(KernelError::Destroyed);
            }
            sem.state = SemState::Finished;
            mem::take(&mut sem.waiters)
        };
        let woken = waiters.len();
        for id in waiters {
            task::wake_sync_waiter(id)?;
        }
        log::debug!("semaphore {} destroyed, {} waiters woken", self.0, woken);
        Ok(())
    }
}
