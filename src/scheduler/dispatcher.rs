/*
 * Dispatcher
 *
 * The dispatcher is itself a task (id 1, System kind, own 64 KiB stack)
 * and sits between every context switch. A suspending task records its
 * new state and swaps directly into the dispatcher context; the
 * dispatcher then:
 *
 *   1. removes itself from the ready queue if its last directed switch
 *      left it there,
 *   2. reconciles the outgoing task (Ready -> ready queue; Suspended ->
 *      already parked on a waiter list; Finished -> wake joiners, log
 *      accounting, reap stack and table entry),
 *   3. wakes sleepers whose deadline has passed,
 *   4. asks the policy for a candidate and performs the directed switch.
 *
 * When no candidate exists but sleepers or suspended tasks remain, it
 * naps briefly on the host (ticks keep advancing system time, and the
 * dispatcher is the only code that can requeue sleepers). When nothing
 * remains anywhere, it logs its own accounting and terminates the
 * process.
 *
 * The dispatcher always runs with the preemption flag raised: every
 * transfer into it happens under the suspending task's guard, and that
 * guard is only dropped when the suspending task resumes. Its System
 * kind additionally exempts it from quantum preemption.
 */

use core::sync::atomic::Ordering;
use core::time::Duration;

use super::task::{Residence, TaskId, TaskState};
use super::{DISPATCHER_TASK, Kernel, fatal, with_kernel};
use crate::scheduler;
use crate::utils::timer;

enum Decision {
    Run(TaskId),
    Idle,
    Shutdown,
}

pub(crate) extern "C" fn dispatcher_main() {
    log::debug!("dispatcher up");

    loop {
        let decision = with_kernel(|kernel| {
            if let Some(disp) = kernel.tasks.get_mut(DISPATCHER_TASK) {
                disp.state = TaskState::Running;
            }
            if kernel.ready.contains(DISPATCHER_TASK) {
                if let Err(e) = kernel.ready.remove(DISPATCHER_TASK, &mut kernel.tasks) {
                    fatal(&format!("dispatcher self-removal: {e}"));
                }
            }

            let prev = TaskId(scheduler::PREV_TASK_ID.load(Ordering::Relaxed));
            if prev != DISPATCHER_TASK {
                reconcile_outgoing(kernel, prev);
                // Idle cycles must not reconcile the same task twice.
                scheduler::PREV_TASK_ID.store(DISPATCHER_TASK.0, Ordering::Relaxed);
            }

            wake_sleepers(kernel, timer::uptime_ms());

            let pick = {
                let Kernel {
                    ref mut policy,
                    ref mut tasks,
                    ref ready,
                    ..
                } = *kernel;
                policy.pick_next(tasks, ready)
            };

            match pick {
                Some(candidate) => Ok(Decision::Run(candidate)),
                None if kernel.ready.is_empty()
                    && kernel.sleeping.is_empty()
                    && kernel.suspended_count == 0 =>
                {
                    Ok(Decision::Shutdown)
                }
                None => Ok(Decision::Idle),
            }
        })
        .unwrap_or_else(|e| fatal(&format!("dispatcher lost the runtime: {e}")));

        match decision {
            Decision::Run(candidate) => {
                if let Err(e) = super::task::switch_to(candidate) {
                    fatal(&format!("dispatch of {candidate} failed: {e}"));
                }
                // Control returns here once some task transfers back.
            }
            Decision::Idle => {
                // Only sleepers/suspended remain. Ticks still advance
                // system time, so nap instead of spinning on the lock.
                std::thread::sleep(Duration::from_micros(500));
            }
            Decision::Shutdown => break,
        }
    }

    let (activations, dispatches) = with_kernel(|kernel| {
        let activations = kernel
            .tasks
            .get(DISPATCHER_TASK)
            .map(|t| t.activations)
            .unwrap_or(0);
        Ok((activations, kernel.dispatch_count))
    })
    .unwrap_or((0, 0));

    log::info!(
        "task 1 'dispatcher' exit: execution {} ms, cpu {} ms, {} activations",
        timer::uptime_ms(),
        scheduler::current_cpu_ms(),
        activations,
    );
    log::info!("no runnable or pending tasks remain after {dispatches} dispatches; terminating");
    std::process::exit(0);
}

/// Apply the outgoing task's post-switch state. The suspending side only
/// records the state; the dispatcher owns the queues.
fn reconcile_outgoing(kernel: &mut Kernel, prev: TaskId) {
    let state = match kernel.tasks.get(prev) {
        Some(task) => task.state,
        None => fatal(&format!("outgoing {prev} has no table entry")),
    };
    match state {
        TaskState::Ready => {
            if let Err(e) = kernel.ready.insert(prev, &mut kernel.tasks) {
                fatal(&format!("cannot requeue outgoing {prev}: {e}"));
            }
        }
        // Already parked on a join/sync/sleep list by the suspending side.
        TaskState::Suspended => {}
        TaskState::Finished => reap(kernel, prev),
        TaskState::Running => fatal(&format!("outgoing {prev} still marked running")),
    }
}

/// Retire a finished task: log its accounting, deliver its exit code to
/// every joiner (FIFO) and drop its table entry, stack included.
fn reap(kernel: &mut Kernel, id: TaskId) {
    let done = match kernel.tasks.remove(id) {
        Some(task) => task,
        None => fatal(&format!("finished {id} has no table entry")),
    };
    debug_assert_eq!(done.residence, Residence::Detached);

    let wall = timer::uptime_ms().saturating_sub(done.spawn_time_ms);
    log::info!(
        "task {} '{}' exit: execution {} ms, cpu {} ms, {} activations",
        done.id.0,
        done.name,
        wall,
        done.cpu_time_ms,
        done.activations,
    );

    for joiner in done.joiners {
        let task = match kernel.tasks.get_mut(joiner) {
            Some(task) => task,
            None => fatal(&format!("joiner {joiner} of {id} vanished")),
        };
        debug_assert_eq!(task.residence, Residence::JoinWait);
        task.join_result = done.exit_code;
        task.residence = Residence::Detached;
        task.state = TaskState::Ready;
        if let Err(e) = kernel.ready.insert(joiner, &mut kernel.tasks) {
            fatal(&format!("cannot wake joiner {joiner}: {e}"));
        }
        kernel.suspended_count -= 1;
    }
}

/// Requeue every sleeper whose deadline has passed. The sleep queue is
/// ordered by deadline, so the walk stops at the first future deadline.
fn wake_sleepers(kernel: &mut Kernel, now: u64) {
    while let Some(front) = kernel.sleeping.front() {
        let deadline = match kernel.tasks.get(front) {
            Some(task) => task.sleep_deadline_ms,
            None => fatal(&format!("sleeper {front} has no table entry")),
        };
        if deadline > now {
            break;
        }
        if let Err(e) = kernel.sleeping.remove(front, &mut kernel.tasks) {
            fatal(&format!("cannot dequeue sleeper {front}: {e}"));
        }
        let task = kernel.tasks.get_mut(front).expect("sleeper exists");
        task.sleep_deadline_ms = 0;
        task.state = TaskState::Ready;
        if let Err(e) = kernel.ready.insert(front, &mut kernel.tasks) {
            fatal(&format!("cannot requeue sleeper {front}: {e}"));
        }
        kernel.suspended_count -= 1;
        log::trace!("sleeper {front} woke at {now} ms");
    }
    scheduler::note_sleepers(kernel.sleeping.len());
}
