/*
 * Unix Port: Tick Timer
 *
 * Arms the 1 ms preemption tick: a SIGALRM handler that runs the quantum
 * accountant, fed by a periodic POSIX timer. The timer is created with
 * SIGEV_THREAD_ID so the signal is always delivered to the thread that
 * initialized the runtime (the only thread on which task contexts may be
 * switched), no matter how many other threads the host process runs.
 *
 * The handler executes on the interrupted task's stack (no SA_ONSTACK),
 * which is what permits the accountant to force a yield from inside the
 * handler: the swap saves the handler frame on the task's own stack, and
 * the saved signal mask travels with the context.
 */

use core::mem;

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

use crate::scheduler::{self, KernelError, Result, TICK_PERIOD_MS};

/// SIGALRM entry point: one tick of the quantum accountant.
extern "C" fn tick_handler(_signal: libc::c_int) {
    scheduler::on_tick();
}

/// Install the SIGALRM handler and arm the periodic tick timer on the
/// calling thread. Invoked once, from `init()`.
pub(crate) fn install_tick_timer() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(tick_handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // Safety: the handler only touches atomics and may swap contexts,
    // which the runtime's preemption protocol is built around.
    if let Err(e) = unsafe { sigaction(Signal::SIGALRM, &action) } {
        log::error!("sigaction(SIGALRM) failed: {e}");
        return Err(KernelError::HostFailure);
    }

    // Safety: plain POSIX timer setup; sigevent/itimerspec are zeroed
    // before the fields the kernel reads are filled in.
    unsafe {
        let mut event: libc::sigevent = mem::zeroed();
        event.sigev_notify = libc::SIGEV_THREAD_ID;
        event.sigev_signo = libc::SIGALRM;
        event.sigev_notify_thread_id = libc::gettid();

        let mut timer_id: libc::timer_t = mem::zeroed();
        if libc::timer_create(libc::CLOCK_MONOTONIC, &mut event, &mut timer_id) != 0 {
            log::error!("timer_create failed: {}", std::io::Error::last_os_error());
            return Err(KernelError::HostFailure);
        }

        let period = libc::timespec {
            tv_sec: 0,
            tv_nsec: (TICK_PERIOD_MS * 1_000_000) as libc::c_long,
        };
        let timing = libc::itimerspec {
            it_interval: period,
            it_value: period,
        };
        if libc::timer_settime(timer_id, 0, &timing, core::ptr::null_mut()) != 0 {
            log::error!("timer_settime failed: {}", std::io::Error::last_os_error());
            return Err(KernelError::HostFailure);
        }
    }

    log::debug!("tick timer armed: {TICK_PERIOD_MS} ms period");
    Ok(())
}
