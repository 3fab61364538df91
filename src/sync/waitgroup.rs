//! Counted rendezvous (SPEC_FULL.md §4.E).
//!
//! Open Question resolved: wake strategy (a), a `Mutex<i32>` + `Condvar`
//! rendezvous rather than a raw futex syscall, mirroring the teacher's own
//! `LockLatch` (a `Mutex`+`Condvar` pair used for the exact same
//! "block until a counter condition holds" shape) for portability across
//! non-Linux targets. See DESIGN.md.

use crate::sync::CondVar;
use std::sync::Mutex;

/// A counted rendezvous: `add` increments, `done` decrements, `wait` blocks
/// until the count returns to zero. Reusable across cycles.
pub struct Waitgroup {
    count: Mutex<i32>,
    zero: CondVar,
}

impl Waitgroup {
    pub fn new() -> Self {
        Waitgroup {
            count: Mutex::new(0),
            zero: CondVar::new(),
        }
    }

    /// Increments the counter by `n`. `n` must be positive.
    pub fn add(&self, n: i32) {
        assert!(n > 0, "mn: Waitgroup::add requires a positive delta");
        let mut count = self.count.lock().unwrap();
        *count += n;
    }

    /// Decrements the counter by one. Panics if this would make the
    /// counter negative (SPEC_FULL.md §4.E, §7).
    pub fn done(&self) {
        let mut count = self.count.lock().unwrap();
        *count -= 1;
        assert!(
            *count >= 0,
            "mn: Waitgroup::done called more times than add (counter underflow)"
        );
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// Blocks until the counter reaches zero. Returns immediately if it
    /// already is.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count != 0 {
            count = self.zero.wait(count);
        }
    }
}

impl Default for Waitgroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_immediately_at_zero() {
        let wg = Waitgroup::new();
        wg.wait();
    }

    #[test]
    fn rendezvous() {
        let wg = Arc::new(Waitgroup::new());
        let n = Arc::new(std::sync::atomic::AtomicI32::new(0));

        wg.add(1);
        let wg2 = Arc::clone(&wg);
        let n2 = Arc::clone(&n);
        thread::spawn(move || {
            n2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            wg2.done();
        });
        wg.wait();
        assert_eq!(n.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "counter underflow")]
    fn underflow_panics() {
        let wg = Waitgroup::new();
        wg.done();
    }

    #[test]
    fn reusable_across_cycles() {
        let wg = Waitgroup::new();
        wg.add(1);
        wg.done();
        wg.wait();
        wg.add(2);
        wg.done();
        wg.done();
        wg.wait();
    }
}
