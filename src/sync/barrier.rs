/*
 * Reusable Barrier
 *
 * join() counts the caller in; the task that brings the count to zero
 * releases every parked waiter and the count is restored while doing so,
 * leaving the barrier armed for the next round of the same size.
 */

use core::mem;
use std::collections::VecDeque;

use spin::Mutex as SpinMutex;

use crate::scheduler::task::{self, TaskId};
use crate::scheduler::{self, KernelError, PreemptGuard, Result};

/// Handle to a registry-backed barrier. Copy it freely between tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BarrierState {
    Active,
    Finished,
}

struct BarrierEntry {
    state: BarrierState,
    remaining: i64,
    waiters: VecDeque<TaskId>,
}

static BARRIERS: SpinMutex<Vec<BarrierEntry>> = SpinMutex::new(Vec::new());

impl Barrier {
    /// Create a barrier for `parties` joiners per round.
    pub fn create(parties: usize) -> Result<Barrier> {
        if parties == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let _guard = PreemptGuard::new();
        let mut registry = BARRIERS.lock();
        let id = registry.len();
        registry.push(BarrierEntry {
            state: BarrierState::Active,
            remaining: parties as i64,
            waiters: VecDeque::new(),
        });
        Ok(Barrier(id))
    }

    /// Arrive at the barrier; the last arrival of the round releases
    /// everyone. Waiters parked when destroy() runs fail with `Destroyed`.
    pub fn join(self) -> Result<()> {
        if !scheduler::is_started() {
            return Err(KernelError::Uninitialized);
        }
        let me = task::current_id();
        let _guard = PreemptGuard::new();
        let release = {
            let mut registry = BARRIERS.lock();
            let barrier = registry.get_mut(self.0).ok_or(KernelError::NotFound)?;
            if barrier.state == BarrierState::Finished {
                return Err(KernelError::Destroyed);
            }
            barrier.remaining -= 1;
            if barrier.remaining <= 0 {
                let waiters = mem::take(&mut barrier.waiters);
                // Restore the count per released waiter (plus the one
                // passing through) so the barrier is reusable as-is.
                barrier.remaining += waiters.len() as i64 + 1;
                Some(waiters)
            } else {
                barrier.waiters.push_back(me);
                None
            }
        };

        match release {
            Some(waiters) => {
                for id in waiters {
                    task::wake_sync_waiter(id)?;
                }
                Ok(())
            }
            None => {
                task::block_current_on_sync()?;
                let registry = BARRIERS.lock();
                let barrier = registry.get(self.0).ok_or(KernelError::NotFound)?;
                if barrier.state == BarrierState::Finished {
                    return Err(KernelError::Destroyed);
                }
                Ok(())
            }
        }
    }

    /// Destroy the barrier. Every parked waiter resumes with `Destroyed`.
    pub fn destroy(self) -> Result<()> {
        let _guard = PreemptGuard::new();
        let waiters = {
            let mut registry = BARRIERS.lock();
            let barrier = registry.get_mut(self.0).ok_or(KernelError::NotFound)?;
            if barrier.state == BarrierState::Finished {
                return Err(KernelError::Destroyed);
            }
            barrier.state = BarrierState::Finished;
            mem::take(&mut barrier.waiters)
        };
        for id in waiters {
            task::wake_sync_waiter(id)?;
        }
        Ok(())
    }
}
