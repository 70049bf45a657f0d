/*
 * Tasks
 *
 * The task control block, the task table that owns every block, and the
 * public task API: spawn, yield, directed switch, exit, join, sleep,
 * priorities and stats. Blocking primitives in the sync module reuse the
 * crate-internal suspend/wake pair defined here.
 *
 * Every transfer of control funnels through the dispatcher: a suspending
 * task records its new state and swaps straight into the dispatcher
 * context; the dispatcher reconciles queues, wakes expired sleepers, asks
 * the policy for a candidate and performs the directed switch.
 */

use core::fmt;
use core::sync::atomic::Ordering;

use super::context::TaskContext;
use super::{
    DISPATCHER_TASK, KernelError, PRIO_HIGHEST, PRIO_LOWEST, PreemptGuard, QUANTUM_TICKS, Result,
    STACK_SIZE, fatal, with_kernel,
};
use crate::scheduler;
use crate::utils::timer;

/// Task identifier, monotonically assigned from 0 (0 = main caller,
/// 1 = dispatcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Suspended,
    Finished,
}

/// System tasks (only the dispatcher) are exempt from quantum preemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    User,
    System,
}

/// Which queue, if any, a task currently inhabits. The arena rendering of
/// the one-queue-at-a-time invariant: queues check and stamp this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Residence {
    Detached,
    Ready,
    Sleeping,
    JoinWait,
    SyncWait,
}

/// Task control block. Owned by the runtime's task table; queues refer to
/// tasks by id only.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) state: TaskState,
    pub(crate) kind: TaskKind,
    pub(crate) context: TaskContext,
    /// None for the main task, which runs on the host-provided stack.
    pub(crate) stack: Option<Box<[u8]>>,
    /// Entry closure, taken exactly once by the trampoline.
    pub(crate) entry: Option<Box<dyn FnOnce() + Send>>,
    /// Static priority set at spawn or by set_priority.
    pub(crate) base_priority: i32,
    /// Varies through aging; reset to base when the task is chosen.
    pub(crate) current_priority: i32,
    pub(crate) quantum_left: i32,
    pub(crate) cpu_time_ms: u64,
    pub(crate) last_dispatch_ms: u64,
    /// Absolute wake deadline; 0 unless sleeping.
    pub(crate) sleep_deadline_ms: u64,
    /// Number of times this task was switched to.
    pub(crate) activations: u64,
    pub(crate) spawn_time_ms: u64,
    pub(crate) exit_code: i32,
    /// Tasks blocked in join() on this task, FIFO.
    pub(crate) joiners: Vec<TaskId>,
    /// Exit code delivered by the task this one joined.
    pub(crate) join_result: i32,
    pub(crate) residence: Residence,
}

impl Task {
    pub(crate) fn new(id: TaskId, name: &str, kind: TaskKind, priority: i32) -> Self {
        Self {
            id,
            name: name.to_string(),
            state: TaskState::Ready,
            kind,
            context: TaskContext::empty(),
            stack: None,
            entry: None,
            base_priority: priority,
            current_priority: priority,
            quantum_left: QUANTUM_TICKS,
            cpu_time_ms: 0,
            last_dispatch_ms: 0,
            sleep_deadline_ms: 0,
            activations: 0,
            spawn_time_ms: timer::uptime_ms(),
            exit_code: 0,
            joiners: Vec::new(),
            join_result: 0,
            residence: Residence::Detached,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("prio", &self.current_priority)
            .finish()
    }
}

/// Owner of every task control block, keyed by id.
pub(crate) struct TaskTable {
    entries: Vec<Task>,
}

impl TaskTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, task: Task) {
        self.entries.push(task);
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<&Task> {
        self.entries.iter().find(|t| t.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.entries.iter_mut().find(|t| t.id == id)
    }

    pub(crate) fn remove(&mut self, id: TaskId) -> Option<Task> {
        let pos = self.entries.iter().position(|t| t.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Task> {
        self.entries.iter()
    }
}

/// Per-task snapshot returned by [`stats`].
#[derive(Debug, Clone)]
pub struct TaskStats {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub kind: TaskKind,
    pub base_priority: i32,
    pub current_priority: i32,
    pub cpu_time_ms: u64,
    pub activations: u64,
}

pub(crate) fn alloc_stack() -> Result<Box<[u8]>> {
    let mut buf: Vec<u8> = Vec::new();
    if buf.try_reserve_exact(STACK_SIZE).is_err() {
        return Err(KernelError::OutOfMemory);
    }
    buf.resize(STACK_SIZE, 0);
    Ok(buf.into_boxed_slice())
}

/// Id of the task invoking this call.
pub fn current_id() -> TaskId {
    scheduler::current_task_id()
}

/// Spawn a task at the default priority (0).
pub fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> Result<TaskId> {
    spawn_with_priority(name, 0, f)
}

/// Spawn a task with an explicit base priority in [-20, +20]; lower values
/// run first. The task starts Ready; it runs once the scheduler picks it.
/// Returning from the closure is an implicit `exit_current(0)`.
pub fn spawn_with_priority(
    name: &str,
    priority: i32,
    f: impl FnOnce() + Send + 'static,
) -> Result<TaskId> {
    if !(PRIO_HIGHEST..=PRIO_LOWEST).contains(&priority) {
        return Err(KernelError::InvalidArgument);
    }

    let mut stack = alloc_stack()?;
    with_kernel(|kernel| {
        let id = TaskId(kernel.next_task_id);
        kernel.next_task_id += 1;

        let mut task = Task::new(id, name, TaskKind::User, priority);
        task.context.prepare(&mut stack, task_trampoline);
        task.stack = Some(stack);
        task.entry = Some(Box::new(f));
        kernel.tasks.insert(task);

        if let Err(e) = kernel.ready.insert(id, &mut kernel.tasks) {
            fatal(&format!("cannot enqueue spawned {id}: {e}"));
        }
        log::debug!("spawned {id} '{name}' prio {priority}");
        Ok(id)
    })
}

/// Give up the CPU: transfer to the dispatcher with state Ready. The
/// caller is re-inserted into the ready queue and resumes once picked
/// again. Also the path taken by the tick handler on quantum expiry.
pub fn yield_now() {
    if !scheduler::is_started() {
        return;
    }
    transfer_to_dispatcher(TaskState::Ready);
}

/// Directed switch to `target`, which must not be the caller. The target
/// leaves the ready queue (it is fatal for it to be missing, except for
/// the dispatcher, which removes itself at loop top); the caller becomes
/// Ready and enters the ready queue.
pub fn switch_to(target: TaskId) -> Result<()> {
    if !scheduler::is_started() {
        return Err(KernelError::Uninitialized);
    }
    let _guard = PreemptGuard::new();
    let (from, to) = with_kernel(|kernel| {
        let current = scheduler::current_task_id();
        if target == current {
            return Err(KernelError::InvalidArgument);
        }
        {
            let task = kernel.tasks.get_mut(target).ok_or(KernelError::NotFound)?;
            if task.state == TaskState::Finished {
                return Err(KernelError::InvalidState);
            }
            task.activations += 1;
        }
        kernel.dispatch_count += 1;

        match kernel.ready.remove(target, &mut kernel.tasks) {
            Ok(()) => {}
            // The dispatcher switches away before re-entering the ready
            // queue, so it may legitimately be absent.
            Err(_) if target == DISPATCHER_TASK => {}
            Err(e) => fatal(&format!("switch target {target} not ready: {e}")),
        }

        scheduler::save_current_accounting(kernel);
        {
            let outgoing = kernel.tasks.get_mut(current).ok_or(KernelError::NotFound)?;
            outgoing.state = TaskState::Ready;
        }
        if let Err(e) = kernel.ready.insert(current, &mut kernel.tasks) {
            fatal(&format!("cannot re-queue outgoing {current}: {e}"));
        }
        let from = kernel
            .tasks
            .get_mut(current)
            .expect("outgoing exists")
            .context
            .as_ptr();

        let task = kernel.tasks.get_mut(target).expect("target exists");
        task.state = TaskState::Running;
        let to = task.context.as_ptr();
        scheduler::install_accounting(task);
        log::trace!("switch {current} -> {target}");
        Ok((from, to))
    })?;

    // Safety: both contexts live in the task table, which outlives this
    // switch; the kernel lock is released.
    unsafe { TaskContext::swap(from, to) };
    Ok(())
}

/// Terminate the calling task with `code`, waking its joiners. Never
/// returns; the dispatcher reaps the stack and table entry.
pub fn exit_current(code: i32) -> ! {
    if !scheduler::is_started() {
        fatal("exit_current before init");
    }
    let _guard = PreemptGuard::new();
    let outcome = with_kernel(|kernel| {
        let current = scheduler::current_task_id();
        let task = kernel.tasks.get_mut(current).ok_or(KernelError::NotFound)?;
        task.exit_code = code;
        Ok(())
    });
    if let Err(e) = outcome {
        fatal(&format!("exit_current: {e}"));
    }
    transfer_to_dispatcher(TaskState::Finished);
    fatal("finished task was resumed");
}

/// Wait for `target` to finish and return its exit code. Fails if the
/// target is unknown (never existed, or already reaped) or has already
/// finished. Joiners are woken FIFO.
pub fn join(target: TaskId) -> Result<i32> {
    if !scheduler::is_started() {
        return Err(KernelError::Uninitialized);
    }
    let me = current_id();
    if target == me {
        return Err(KernelError::InvalidArgument);
    }

    let _guard = PreemptGuard::new();
    with_kernel(|kernel| {
        let task = kernel.tasks.get_mut(target).ok_or(KernelError::NotFound)?;
        if task.state == TaskState::Finished {
            return Err(KernelError::InvalidState);
        }
        task.joiners.push(me);
        let caller = kernel.tasks.get_mut(me).ok_or(KernelError::NotFound)?;
        debug_assert_eq!(caller.residence, Residence::Detached);
        caller.residence = Residence::JoinWait;
        kernel.suspended_count += 1;
        Ok(())
    })?;
    transfer_to_dispatcher(TaskState::Suspended);

    with_kernel(|kernel| {
        let caller = kernel.tasks.get(me).ok_or(KernelError::NotFound)?;
        Ok(caller.join_result)
    })
}

/// Sleep for at least `ms` milliseconds of system time. `sleep_ms(0)`
/// yields and becomes eligible again on the next dispatcher pass.
pub fn sleep_ms(ms: u64) {
    if !scheduler::is_started() {
        return;
    }
    let _guard = PreemptGuard::new();
    let outcome = with_kernel(|kernel| {
        let me = scheduler::current_task_id();
        let deadline = timer::uptime_ms() + ms;
        let task = kernel.tasks.get_mut(me).ok_or(KernelError::NotFound)?;
        task.sleep_deadline_ms = deadline;
        if let Err(e) = kernel.sleeping.insert(me, &mut kernel.tasks) {
            fatal(&format!("cannot enqueue sleeper {me}: {e}"));
        }
        kernel.suspended_count += 1;
        scheduler::note_sleepers(kernel.sleeping.len());
        Ok(())
    });
    if outcome.is_err() {
        return;
    }
    transfer_to_dispatcher(TaskState::Suspended);
}

/// Base (static) priority of `target`.
pub fn base_priority(target: TaskId) -> Result<i32> {
    with_kernel(|kernel| {
        let task = kernel.tasks.get(target).ok_or(KernelError::NotFound)?;
        Ok(task.base_priority)
    })
}

/// Re-base `target` to priority `priority`, preserving its aging progress
/// relative to the new baseline. Re-sorts the target's ready-queue entry
/// when it has one.
pub fn set_priority(target: TaskId, priority: i32) -> Result<()> {
    if !(PRIO_HIGHEST..=PRIO_LOWEST).contains(&priority) {
        return Err(KernelError::InvalidArgument);
    }
    with_kernel(|kernel| {
        let current = scheduler::current_task_id();
        let task = kernel.tasks.get_mut(target).ok_or(KernelError::NotFound)?;
        let aging = task.base_priority - task.current_priority;
        task.base_priority = priority;
        task.current_priority = (priority - aging).max(PRIO_HIGHEST);
        let requeue = target != current && task.residence == Residence::Ready;
        if requeue {
            if let Err(e) = kernel.ready.remove(target, &mut kernel.tasks) {
                fatal(&format!("re-sort remove of {target}: {e}"));
            }
            if let Err(e) = kernel.ready.insert(target, &mut kernel.tasks) {
                fatal(&format!("re-sort insert of {target}: {e}"));
            }
        }
        Ok(())
    })
}

/// Snapshot of every live task, CPU time of the executing task included
/// up to the last tick.
pub fn stats() -> Result<Vec<TaskStats>> {
    with_kernel(|kernel| {
        let current = scheduler::current_task_id();
        Ok(kernel
            .tasks
            .iter()
            .map(|t| TaskStats {
                id: t.id,
                name: t.name.clone(),
                state: t.state,
                kind: t.kind,
                base_priority: t.base_priority,
                current_priority: t.current_priority,
                cpu_time_ms: if t.id == current {
                    scheduler::current_cpu_ms()
                } else {
                    t.cpu_time_ms
                },
                activations: t.activations,
            })
            .collect())
    })
}

/// First half of the blocking protocol used by the sync primitives: the
/// caller has already been appended to a primitive's waiter list (under
/// its registry lock, with preemption disabled); park it until
/// [`wake_sync_waiter`] runs.
pub(crate) fn block_current_on_sync() -> Result<()> {
    with_kernel(|kernel| {
        let me = scheduler::current_task_id();
        let task = kernel.tasks.get_mut(me).ok_or(KernelError::NotFound)?;
        debug_assert_eq!(task.residence, Residence::Detached);
        task.residence = Residence::SyncWait;
        kernel.suspended_count += 1;
        Ok(())
    })?;
    transfer_to_dispatcher(TaskState::Suspended);
    Ok(())
}

/// Second half of the blocking protocol: move a parked waiter (already
/// removed from its primitive's list) back into the ready queue.
pub(crate) fn wake_sync_waiter(id: TaskId) -> Result<()> {
    with_kernel(|kernel| {
        let task = kernel.tasks.get_mut(id).ok_or(KernelError::NotFound)?;
        if task.residence != Residence::SyncWait {
            return Err(KernelError::InvalidState);
        }
        task.residence = Residence::Detached;
        task.state = TaskState::Ready;
        if let Err(e) = kernel.ready.insert(id, &mut kernel.tasks) {
            fatal(&format!("cannot wake waiter {id}: {e}"));
        }
        kernel.suspended_count -= 1;
        Ok(())
    })
}

/// Record the caller's new state and swap into the dispatcher context.
/// Queue reconciliation for the outgoing task happens on the dispatcher
/// side. The preemption flag stays raised across the swap; the matching
/// guard drops when this task eventually resumes.
pub(crate) fn transfer_to_dispatcher(new_state: TaskState) {
    let _guard = PreemptGuard::new();
    let result = with_kernel(|kernel| {
        let current = scheduler::current_task_id();
        scheduler::save_current_accounting(kernel);
        let task = kernel.tasks.get_mut(current).ok_or(KernelError::NotFound)?;
        task.state = new_state;
        let from = task.context.as_ptr();
        scheduler::PREV_TASK_ID.store(current.0, Ordering::Relaxed);

        kernel.dispatch_count += 1;
        let disp = kernel
            .tasks
            .get_mut(DISPATCHER_TASK)
            .ok_or(KernelError::NotFound)?;
        disp.activations += 1;
        let to = disp.context.as_ptr();
        scheduler::install_accounting(disp);
        Ok((from, to))
    });
    match result {
        // Safety: both contexts are table-resident and the lock is
        // released; the dispatcher context always holds a resumable state.
        Ok((from, to)) => unsafe { TaskContext::swap(from, to) },
        Err(e) => fatal(&format!("transfer to dispatcher: {e}")),
    }
}

/// Initial frame of every spawned task: run the entry closure, then exit.
extern "C" fn task_trampoline() {
    // The first dispatch arrives with the preemption flag raised by
    // whichever task suspended to let us run; lower it before user code.
    let entry = with_kernel(|kernel| {
        let me = scheduler::current_task_id();
        Ok(kernel.tasks.get_mut(me).and_then(|t| t.entry.take()))
    })
    .unwrap_or(None);
    scheduler::enable_preemption();

    match entry {
        Some(f) => f(),
        None => log::warn!("task {} started without an entry", current_id()),
    }
    exit_current(0);
}
