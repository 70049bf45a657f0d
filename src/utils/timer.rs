/*
 * System Time
 *
 * Global uptime tracking in milliseconds since runtime initialization.
 * The counter is advanced exclusively by the tick handler (one increment
 * per 1 ms tick) and read from arbitrary task context, so it lives in an
 * atomic rather than behind a lock.
 */

use core::sync::atomic::{AtomicU64, Ordering};

/// Milliseconds elapsed since `fibros::init()`, advanced by the tick timer.
static UPTIME_MS: AtomicU64 = AtomicU64::new(0);

/// Current system uptime in milliseconds.
///
/// Resolution is one timer tick (1 ms). Before the runtime is initialized
/// this is 0.
pub fn uptime_ms() -> u64 {
    UPTIME_MS.load(Ordering::Relaxed)
}

/// Advance the uptime counter and return the new value.
///
/// Called exactly once per tick from the timer signal handler; must stay
/// async-signal-safe (atomics only).
pub(crate) fn advance_ms(delta: u64) -> u64 {
    UPTIME_MS.fetch_add(delta, Ordering::Relaxed) + delta
}
