//! Blocking hooks (SPEC_FULL.md §6): `worker_block_ahead`/`worker_block_clear`
//! bracket every kernel-level wait a task can fall into (mutex contention,
//! condvar sleeps, channel suspension, waitgroup waits, or an external
//! blocking syscall), so the sysmon thread can tell a cooperatively
//! blocked worker from one genuinely stuck mid-job.

use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

thread_local! {
    static BLOCK_START: Cell<*const AtomicU64> = Cell::new(ptr::null());
}

/// Called once by a worker's main loop on startup, installing a pointer to
/// its own `block_start_millis` timestamp so the free functions below know
/// where to write.
///
/// # Safety
/// `ptr` must stay valid for as long as this thread keeps calling
/// `worker_block_ahead`/`worker_block_clear` — in practice, the lifetime of
/// the owning `Worker`, which outlives its own OS thread.
pub(crate) unsafe fn install_block_timestamp(ptr: *const AtomicU64) {
    BLOCK_START.with(|cell| cell.set(ptr));
}

pub(crate) fn uninstall_block_timestamp() {
    BLOCK_START.with(|cell| cell.set(ptr::null()));
}

/// Milliseconds since an arbitrary, process-wide fixed epoch. Only ever
/// compared to other values from this same function, never rendered as a
/// wall-clock time.
pub(crate) fn now_millis() -> u64 {
    static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u64
}

/// Marks the calling thread as about to block on something external to the
/// scheduler (a contended mutex, a full/empty channel, a condvar wait, an
/// external syscall the caller knows will block). No-op off a worker
/// thread.
pub fn worker_block_ahead() {
    BLOCK_START.with(|cell| {
        let ptr = cell.get();
        if !ptr.is_null() {
            // SAFETY: non-null only while installed by a live worker for
            // the duration of this thread's run, see `install_block_timestamp`.
            unsafe { (*ptr).store(now_millis(), Ordering::SeqCst) };
        }
    });
}

/// Clears the cooperative-block timestamp set by `worker_block_ahead`.
pub fn worker_block_clear() {
    BLOCK_START.with(|cell| {
        let ptr = cell.get();
        if !ptr.is_null() {
            // SAFETY: see `worker_block_ahead`.
            unsafe { (*ptr).store(0, Ordering::SeqCst) };
        }
    });
}

/// Brackets a spin-until-`predicate` loop in `worker_block_ahead`/`clear`,
/// for subsystems that must wait on an external event with no condvar to
/// wait on (a file lock, a socket poll, a domain-socket accept).
pub fn worker_block_on(mut predicate: impl FnMut() -> bool) {
    worker_block_ahead();
    while !predicate() {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    worker_block_clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_without_installed_worker() {
        // Just must not panic off a worker thread.
        worker_block_ahead();
        worker_block_clear();
    }

    #[test]
    fn records_and_clears_timestamp() {
        let ts = AtomicU64::new(0);
        unsafe { install_block_timestamp(&ts) };
        worker_block_ahead();
        assert_ne!(ts.load(Ordering::SeqCst), 0);
        worker_block_clear();
        assert_eq!(ts.load(Ordering::SeqCst), 0);
        uninstall_block_timestamp();
    }
}
