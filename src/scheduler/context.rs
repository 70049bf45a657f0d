/*
 * Machine Contexts
 *
 * Thin seam over the host's ucontext facility: capture the current
 * execution state, build a context that starts a fresh entry point on a
 * caller-supplied stack, and atomically swap from one context to another.
 * Each context is boxed so its address stays stable while task records
 * move inside the table.
 *
 * ucontext saves and restores the signal mask with the rest of the
 * machine state, which is what makes a swap out of the tick handler (and
 * the eventual swap back into it) well-formed.
 */

use core::mem;

use super::fatal;

pub(crate) struct TaskContext {
    ucp: Box<libc::ucontext_t>,
}

// Contexts live inside the global task table behind a lock, but the
// runtime itself is single-threaded: every context is created, swapped
// and dropped on the one thread that called init().
unsafe impl Send for TaskContext {}

impl TaskContext {
    /// A zeroed context slot, filled on the owner's first switch-out.
    pub(crate) fn empty() -> Self {
        Self {
            // Safety: ucontext_t is plain old data as far as the host is
            // concerned; getcontext/swapcontext overwrite it fully before
            // it is ever resumed.
            ucp: Box::new(unsafe { mem::zeroed() }),
        }
    }

    /// Arrange for this context to begin executing `entry` on `stack`
    /// when first resumed. `entry` must never return.
    pub(crate) fn prepare(&mut self, stack: &mut [u8], entry: extern "C" fn()) {
        // Safety: the stack buffer outlives the context (both live in the
        // same task record) and getcontext initializes every field that
        // makecontext requires.
        unsafe {
            if libc::getcontext(&mut *self.ucp) != 0 {
                fatal("getcontext failed");
            }
            self.ucp.uc_stack.ss_sp = stack.as_mut_ptr().cast::<libc::c_void>();
            self.ucp.uc_stack.ss_size = stack.len();
            self.ucp.uc_stack.ss_flags = 0;
            self.ucp.uc_link = core::ptr::null_mut();
            libc::makecontext(&mut *self.ucp, entry, 0);
        }
    }

    /// Raw pointer to the underlying ucontext, stable across table moves.
    pub(crate) fn as_ptr(&mut self) -> *mut libc::ucontext_t {
        &mut *self.ucp
    }

    /// Save the running state into `from` and resume `to`.
    ///
    /// # Safety
    ///
    /// Both pointers must refer to live boxed contexts, `to` must hold a
    /// resumable state (prepared or previously saved), and the caller must
    /// not hold any lock across the switch.
    pub(crate) unsafe fn swap(from: *mut libc::ucontext_t, to: *mut libc::ucontext_t) {
        // Safety: contract delegated to the caller.
        if unsafe { libc::swapcontext(from, to) } != 0 {
            fatal("swapcontext failed");
        }
    }
}
