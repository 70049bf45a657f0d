/*
 * Host Platform Ports
 *
 * Everything the runtime needs from the host lives behind this seam: a
 * machine-context facility (see scheduler::context) and a periodic
 * signal-driven tick timer. Only the Unix port exists today.
 */

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod unix;
        pub(crate) use unix::install_tick_timer;
    } else {
        compile_error!("fibros requires a Linux host (ucontext + POSIX per-thread timers)");
    }
}
