/*
 * Task Runtime Core
 *
 * Global state and entry points for the fibros runtime. The runtime
 * multiplexes one host thread across many green tasks; everything here is
 * shared between ordinary task context and the SIGALRM tick handler, so
 * the state is split the same way an IRQ-safe kernel splits it:
 *
 * 1. KERNEL singleton: task table, ready/sleep queues, scheduling policy.
 *    Guarded by a spin mutex, only ever touched with preemption disabled.
 * 2. Atomic mirrors: everything the tick handler reads or writes (current
 *    task, quantum, CPU-time accounting, preemption flag). The handler is
 *    fully lock-free; it may force a yield, but the yield path re-enters
 *    the runtime through the normal locked API.
 *
 * The preemption-disable flag is the single protection for every critical
 * section: it is raised (save/restore, so sections nest) before any lock
 * is taken, and the handler consults it before forcing a yield. Tasks
 * never run in parallel, so this is sufficient.
 */

pub mod context;
pub mod dispatcher;
pub mod policies;
pub mod queue;
pub mod task;

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use crate::utils::timer;
use policies::{PriorityAging, SchedPolicy};
use queue::{QueueDiscipline, TaskQueue};
use task::{Residence, Task, TaskId, TaskKind, TaskState, TaskTable};

/// Per-task stack size (64 KiB). The main task keeps the host stack.
pub const STACK_SIZE: usize = 64 * 1024;

/// Ticks a user task may run before the tick handler forces a yield.
pub const QUANTUM_TICKS: i32 = 20;

/// Tick period of the preemption timer, in milliseconds.
pub const TICK_PERIOD_MS: u64 = 1;

/// Most urgent priority. The ready queue sorts ascending, so -20 runs first.
pub const PRIO_HIGHEST: i32 = -20;

/// Least urgent priority.
pub const PRIO_LOWEST: i32 = 20;

/// Task id of the caller of `init()`.
pub const MAIN_TASK: TaskId = TaskId(0);

/// Task id of the dispatcher.
pub const DISPATCHER_TASK: TaskId = TaskId(1);

/// Errors surfaced by the runtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The runtime has not been initialized in this process.
    Uninitialized,
    /// An argument was out of range or otherwise unusable.
    InvalidArgument,
    /// The operation is not legal in the current state (e.g. double init,
    /// joining a finished task, unlocking a mutex that is not held).
    InvalidState,
    /// The referenced task or primitive does not exist (or was reaped).
    NotFound,
    /// The primitive was destroyed; waiters are woken into this error.
    Destroyed,
    /// Stack allocation failed; no partial task state remains.
    OutOfMemory,
    /// The host refused a timer or signal operation.
    HostFailure,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Uninitialized => write!(f, "runtime not initialized"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::InvalidState => write!(f, "invalid state"),
            KernelError::NotFound => write!(f, "no such task or primitive"),
            KernelError::Destroyed => write!(f, "primitive destroyed"),
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::HostFailure => write!(f, "host timer/signal failure"),
        }
    }
}

impl core::error::Error for KernelError {}

pub type Result<T> = core::result::Result<T, KernelError>;

/// The runtime singleton. Only reachable through [`with_kernel`], which
/// raises the preemption flag before locking.
pub(crate) struct Kernel {
    pub(crate) tasks: TaskTable,
    pub(crate) ready: TaskQueue,
    pub(crate) sleeping: TaskQueue,
    pub(crate) policy: Box<dyn SchedPolicy>,
    /// Tasks parked on some waiter list (join, sync primitive or sleep).
    pub(crate) suspended_count: usize,
    pub(crate) next_task_id: usize,
    /// Total context transfers performed (sum of all task activations).
    pub(crate) dispatch_count: u64,
}

static KERNEL: Mutex<Option<Kernel>> = Mutex::new(None);

/// Set once `init()` has fully wired the runtime and armed the timer.
static KERNEL_STARTED: AtomicBool = AtomicBool::new(false);

/// Id of the task currently executing (atomic for handler safety).
static CURRENT_TASK_ID: AtomicUsize = AtomicUsize::new(0);

/// Whether the executing task is a System task (exempt from preemption).
static CURRENT_IS_SYSTEM: AtomicBool = AtomicBool::new(false);

/// When true the tick handler will not force a yield. Raised around every
/// runtime critical section; save/restore semantics via [`PreemptGuard`].
static PREEMPTION_DISABLED: AtomicBool = AtomicBool::new(false);

/// Remaining quantum of the executing task, decremented per tick.
static QUANTUM_LEFT: AtomicI32 = AtomicI32::new(QUANTUM_TICKS);

/// System time at which the executing task was last charged.
static LAST_DISPATCH_MS: AtomicU64 = AtomicU64::new(0);

/// Accumulated CPU time of the executing task.
static CURRENT_CPU_MS: AtomicU64 = AtomicU64::new(0);

/// Mirror of the sleep-queue length; the tick handler must drive a yield
/// whenever sleepers are pending, since only the dispatcher wakes them.
static SLEEPERS_PENDING: AtomicUsize = AtomicUsize::new(0);

/// The task that most recently transferred into the dispatcher.
pub(crate) static PREV_TASK_ID: AtomicUsize = AtomicUsize::new(0);

/// RAII critical-section marker. Saves and restores the previous flag
/// value so sections nest, including across a context switch: the guard
/// of a suspended task is dropped when that task resumes.
pub(crate) struct PreemptGuard {
    prev: bool,
}

impl PreemptGuard {
    pub(crate) fn new() -> Self {
        Self {
            prev: PREEMPTION_DISABLED.swap(true, Ordering::SeqCst),
        }
    }
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        PREEMPTION_DISABLED.store(self.prev, Ordering::SeqCst);
    }
}

pub(crate) fn is_started() -> bool {
    KERNEL_STARTED.load(Ordering::Relaxed)
}

/// Lower the preemption flag outright. Used by the task trampoline, whose
/// first activation inherits a raised flag from the task that suspended.
pub(crate) fn enable_preemption() {
    PREEMPTION_DISABLED.store(false, Ordering::SeqCst);
}

/// CPU time charged to the executing task so far.
pub(crate) fn current_cpu_ms() -> u64 {
    CURRENT_CPU_MS.load(Ordering::Relaxed)
}

pub(crate) fn current_task_id() -> TaskId {
    TaskId(CURRENT_TASK_ID.load(Ordering::Relaxed))
}

/// Run `f` against the runtime with preemption disabled and the kernel
/// lock held. Fails with `Uninitialized` before `init()`.
pub(crate) fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> Result<R>) -> Result<R> {
    let _guard = PreemptGuard::new();
    let mut slot = KERNEL.lock();
    match slot.as_mut() {
        Some(kernel) => f(kernel),
        None => Err(KernelError::Uninitialized),
    }
}

/// Abort on a broken runtime invariant (queue corruption, impossible
/// state transition). These are bugs, not recoverable conditions.
pub(crate) fn fatal(msg: &str) -> ! {
    log::error!("runtime invariant violated: {msg}");
    std::process::exit(1);
}

/// Bring up the runtime: adopt the caller as task 0, create the
/// dispatcher task and arm the periodic tick timer.
pub fn init() -> Result<()> {
    {
        let _guard = PreemptGuard::new();
        let mut slot = KERNEL.lock();
        if slot.is_some() {
            return Err(KernelError::InvalidState);
        }

        let mut kernel = Kernel {
            tasks: TaskTable::new(),
            ready: TaskQueue::new(
                "ready",
                Residence::Ready,
                QueueDiscipline::Ascending(|t| t.current_priority as i64),
            ),
            sleeping: TaskQueue::new(
                "sleep",
                Residence::Sleeping,
                QueueDiscipline::Ascending(|t| t.sleep_deadline_ms as i64),
            ),
            policy: Box::new(PriorityAging),
            suspended_count: 0,
            next_task_id: 0,
            dispatch_count: 0,
        };

        // The caller becomes task 0. It already runs on the host stack;
        // its context slot is filled the first time it switches out.
        let mut main = Task::new(TaskId(kernel.next_task_id), "main", TaskKind::User, 0);
        kernel.next_task_id += 1;
        main.state = TaskState::Running;
        kernel.tasks.insert(main);

        // The dispatcher is an ordinary task with its own stack; it enters
        // the ready queue like any spawned task and removes itself at the
        // top of its loop.
        let mut stack = task::alloc_stack()?;
        let mut disp = Task::new(
            TaskId(kernel.next_task_id),
            "dispatcher",
            TaskKind::System,
            0,
        );
        kernel.next_task_id += 1;
        disp.context.prepare(&mut stack, dispatcher::dispatcher_main);
        disp.stack = Some(stack);
        kernel.tasks.insert(disp);
        if let Err(e) = kernel.ready.insert(DISPATCHER_TASK, &mut kernel.tasks) {
            fatal(&format!("cannot enqueue dispatcher: {e}"));
        }
        log::info!("scheduler policy: {}", kernel.policy.name());

        CURRENT_TASK_ID.store(MAIN_TASK.0, Ordering::Relaxed);
        CURRENT_IS_SYSTEM.store(false, Ordering::Relaxed);
        QUANTUM_LEFT.store(QUANTUM_TICKS, Ordering::Relaxed);
        LAST_DISPATCH_MS.store(0, Ordering::Relaxed);
        CURRENT_CPU_MS.store(0, Ordering::Relaxed);
        PREV_TASK_ID.store(MAIN_TASK.0, Ordering::Relaxed);

        *slot = Some(kernel);
    }

    crate::ports::install_tick_timer()?;
    KERNEL_STARTED.store(true, Ordering::SeqCst);
    log::info!(
        "runtime up: tick {TICK_PERIOD_MS} ms, quantum {QUANTUM_TICKS} ticks, stack {STACK_SIZE} B"
    );
    Ok(())
}

/// Quantum accountant, invoked from the SIGALRM handler on every tick.
///
/// Lock-free by construction: it advances system time, charges CPU time
/// to the executing task through the atomic mirrors, and only then
/// consults the System/preemption gates to decide whether to force a
/// yield. Charging therefore happens even inside critical sections.
pub(crate) fn on_tick() {
    let now = timer::advance_ms(TICK_PERIOD_MS);
    if !KERNEL_STARTED.load(Ordering::Relaxed) {
        return;
    }

    let last = LAST_DISPATCH_MS.load(Ordering::Relaxed);
    if last != 0 {
        CURRENT_CPU_MS.fetch_add(now.saturating_sub(last), Ordering::Relaxed);
    }
    LAST_DISPATCH_MS.store(now, Ordering::Relaxed);

    if CURRENT_IS_SYSTEM.load(Ordering::Relaxed) || PREEMPTION_DISABLED.load(Ordering::SeqCst) {
        return;
    }

    let quantum = QUANTUM_LEFT.fetch_sub(1, Ordering::Relaxed) - 1;

    // Sleepers can only be woken by the dispatcher, so a non-empty sleep
    // queue forces a yield each tick even while quantum remains.
    if quantum <= 0 || SLEEPERS_PENDING.load(Ordering::Relaxed) > 0 {
        task::yield_now();
    }
}

/// Flush the atomic accounting mirrors back into the executing task's
/// table entry. Must run before the mirrors are repointed at another task.
pub(crate) fn save_current_accounting(kernel: &mut Kernel) {
    let current = current_task_id();
    if let Some(task) = kernel.tasks.get_mut(current) {
        task.cpu_time_ms = CURRENT_CPU_MS.load(Ordering::Relaxed);
        task.last_dispatch_ms = LAST_DISPATCH_MS.load(Ordering::Relaxed);
        task.quantum_left = QUANTUM_LEFT.load(Ordering::Relaxed);
    }
}

/// Point the accounting mirrors at `task`, which is about to execute.
pub(crate) fn install_accounting(task: &Task) {
    CURRENT_TASK_ID.store(task.id.0, Ordering::Relaxed);
    CURRENT_IS_SYSTEM.store(task.kind == TaskKind::System, Ordering::Relaxed);
    LAST_DISPATCH_MS.store(timer::uptime_ms(), Ordering::Relaxed);
    CURRENT_CPU_MS.store(task.cpu_time_ms, Ordering::Relaxed);
    QUANTUM_LEFT.store(task.quantum_left, Ordering::Relaxed);
}

/// Keep the handler-visible sleep-queue length in sync.
pub(crate) fn note_sleepers(count: usize) {
    SLEEPERS_PENDING.store(count, Ordering::Relaxed);
}
