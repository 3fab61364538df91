//! Panic/unwind helpers, mirroring `rayon-core`'s own `unwind` module.
//!
//! Worker threads are not allowed to unwind out of the scheduler's own
//! bookkeeping (only user tasks, whose panics are expected to kill the
//! worker thread per SPEC_FULL.md's failure semantics, are allowed to
//! unwind at all). [`AbortIfPanic`] is a scope guard: if it is still alive
//! when a panic unwinds past it, the process aborts instead of unwinding
//! further, because at that point the scheduler's own invariants (queue
//! locks, detector maps) may be in an inconsistent state.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

/// Aborts the process if dropped while unwinding.
///
/// Call [`std::mem::forget`] on the guard once the protected region
/// completes normally.
pub(crate) struct AbortIfPanic;

impl Drop for AbortIfPanic {
    fn drop(&mut self) {
        eprintln!("mn: panic inside runtime bookkeeping, aborting");
        ::std::process::abort();
    }
}

/// Runs `f`, catching any panic and returning it as an `Err` instead of
/// propagating. Used to run a worker's `main_loop` so an uncaught task
/// panic reaches the fabric's `panic_handler`/abort logic instead of
/// silently unwinding off the end of the spawned thread.
pub(crate) fn halt_unwinding<F, R>(func: F) -> thread::Result<R>
where
    F: FnOnce() -> R,
{
    panic::catch_unwind(AssertUnwindSafe(func))
}
