/*
 * Task Mutex
 *
 * Ownership-tracked blocking mutex. unlock() hands the mutex directly to
 * the head waiter: a parked task resumes already owning it, so there is
 * no barging window between release and wakeup. Recursive locking and
 * unlocking by a non-owner are state errors.
 */

use core::mem;
use std::collections::VecDeque;

use spin::Mutex as SpinMutex;

use crate::scheduler::task::{self, TaskId};
use crate::scheduler::{self, KernelError, PreemptGuard, Result};

/// Handle to a registry-backed mutex. Copy it freely between tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutex(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MutexState {
    Active,
    Finished,
}

struct MutexEntry {
    state: MutexState,
    owner: Option<TaskId>,
    waiters: VecDeque<TaskId>,
}

static MUTEXES: SpinMutex<Vec<MutexEntry>> = SpinMutex::new(Vec::new());

impl Mutex {
    pub fn create() -> Result<Mutex> {
        let _guard = PreemptGuard::new();
        let mut registry = MUTEXES.lock();
        let id = registry.len();
        registry.push(MutexEntry {
            state: MutexState::Active,
            owner: None,
            waiters: VecDeque::new(),
        });
        Ok(Mutex(id))
    }

    /// Acquire the mutex, blocking FIFO behind the current owner.
    /// Fails with `InvalidState` on a recursive acquire and with
    /// `Destroyed` if the mutex is (or becomes) destroyed.
    pub fn lock(self) -> Result<()> {
        if !scheduler::is_started() {
            return Err(KernelError::Uninitialized);
        }
        let me = task::current_id();
        let _guard = PreemptGuard::new();
        {
            let mut registry = MUTEXES.lock();
            let entry = registry.get_mut(self.0).ok_or(KernelError::NotFound)?;
            if entry.state == MutexState::Finished {
                return Err(KernelError::Destroyed);
            }
            match entry.owner {
                None => {
                    entry.owner = Some(me);
                    return Ok(());
                }
                Some(owner) if owner == me => return Err(KernelError::InvalidState),
                Some(_) => entry.waiters.push_back(me),
            }
        }
        task::block_current_on_sync()?;

        // Resumed: either unlock() handed the mutex over, or destroy()
        // woke everyone.
        let registry = MUTEXES.lock();
        let entry = registry.get(self.0).ok_or(KernelError::NotFound)?;
        if entry.state == MutexState::Finished {
            return Err(KernelError::Destroyed);
        }
        debug_assert_eq!(entry.owner, Some(me));
        Ok(())
    }

    /// Release the mutex. Fails with `InvalidState` if the caller does
    /// not hold it.
    pub fn unlock(self) -> Result<()> {
        let me = task::current_id();
        let _guard = PreemptGuard::new();
        let handoff = {
            let mut registry = MUTEXES.lock();
            let entry = registry.get_mut(self.0).ok_or(KernelError::NotFound)?;
            if entry.state == MutexState::Finished {
                return Err(KernelError::Destroyed);
            }
            if entry.owner != Some(me) {
                return Err(KernelError::InvalidState);
            }
            match entry.waiters.pop_front() {
                Some(next) => {
                    entry.owner = Some(next);
                    Some(next)
                }
                None => {
                    entry.owner = None;
                    None
                }
            }
        };
        if let Some(next) = handoff {
            task::wake_sync_waiter(next)?;
        }
        Ok(())
    }

    /// Destroy the mutex. Every parked waiter resumes with `Destroyed`.
    pub fn destroy(self) -> Result<()> {
        let _guard = PreemptGuard::new();
        let waiters = {
            let mut registry = MUTEXES.lock();
            let entry = registry.get_mut(self.0).ok_or(KernelError::NotFound)?;
            if entry.state == MutexState::Finished {
                return Err(KernelError::Destroyed);
            }
            entry.state = MutexState::Finished;
            entry.owner = None;
            mem::take(&mut entry.waiters)
        };
        for id in waiters {
            task::wake_sync_waiter(id)?;
        }
        Ok(())
    }
}
