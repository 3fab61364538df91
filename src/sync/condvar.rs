//! A condition variable whose timed wait distinguishes `Signaled`,
//! `Timeout`, and `Spurious` wakeups rather than collapsing the last into
//! the first (SPEC_FULL.md §5).

use crate::block::{worker_block_ahead, worker_block_clear};
use std::sync::{Condvar as StdCondvar, Mutex, MutexGuard};
use std::time::Duration;

/// The three distinct ways a timed wait can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Woken by an explicit `notify_one`/`notify_all` and the predicate
    /// the caller cares about now holds.
    Signaled,
    /// The timeout elapsed before the predicate held.
    Timeout,
    /// Woken, but not because of the timeout or a notification the caller
    /// can attribute to its own predicate (the OS condvar woke early).
    Spurious,
}

/// A thin wrapper over `std::sync::Condvar` that brackets every sleep in
/// `worker_block_ahead`/`worker_block_clear` (SPEC_FULL.md §4.C, §5), so the
/// sysmon thread can see this thread as cooperatively blocked.
pub struct CondVar {
    inner: StdCondvar,
}

impl CondVar {
    pub fn new() -> Self {
        CondVar {
            inner: StdCondvar::new(),
        }
    }

    /// Waits until notified. The mutex is released while blocked, in
    /// lockstep with `std::sync::Condvar`'s own contract.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        worker_block_ahead();
        let guard = self.inner.wait(guard).unwrap();
        worker_block_clear();
        guard
    }

    /// Waits up to `timeout` for a single wakeup, without interpreting why
    /// it happened. Distinguishes all three outcomes explicitly: a real
    /// notification is `Signaled`, the deadline elapsing is `Timeout`, and
    /// any other wakeup (the OS condvar waking early with nothing to do
    /// with either) is `Spurious` — never folded into `Signaled`.
    pub fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> (MutexGuard<'a, T>, WaitResult) {
        worker_block_ahead();
        let (guard, timeout_result) = self.inner.wait_timeout(guard, timeout).unwrap();
        worker_block_clear();
        let result = if timeout_result.timed_out() {
            WaitResult::Timeout
        } else {
            WaitResult::Spurious
        };
        (guard, result)
    }

    /// Waits up to `timeout`, re-checking `predicate` after every wakeup
    /// (spurious or not) until it holds or the deadline passes.
    pub fn wait_timeout_while<'a, T>(
        &self,
        mut guard: MutexGuard<'a, T>,
        timeout: Duration,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> (MutexGuard<'a, T>, WaitResult) {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return (guard, WaitResult::Timeout);
            }
            let (next_guard, wait_result) = self.wait_timeout(guard, remaining);
            guard = next_guard;
            match wait_result {
                WaitResult::Timeout => return (guard, WaitResult::Timeout),
                WaitResult::Signaled | WaitResult::Spurious => {
                    if predicate(&mut guard) {
                        return (guard, WaitResult::Signaled);
                    }
                    if std::time::Instant::now() >= deadline {
                        return (guard, WaitResult::Timeout);
                    }
                    // Predicate still false: whatever woke us (signal or
                    // spurious wakeup) wasn't the one the caller wants.
                    // Loop and wait out the remaining time.
                }
            }
        }
    }

    pub fn notify_one(&self) {
        self.inner.notify_one();
    }

    pub fn notify_all(&self) {
        self.inner.notify_all();
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_elapses_without_signal() {
        let mutex = Mutex::new(false);
        let cv = CondVar::new();
        let guard = mutex.lock().unwrap();
        let (_, result) = cv.wait_timeout_while(guard, Duration::from_millis(20), |done| *done);
        assert_eq!(result, WaitResult::Timeout);
    }

    #[test]
    fn signaled_before_deadline() {
        use std::sync::Arc;
        let pair = Arc::new((Mutex::new(false), CondVar::new()));
        let pair2 = Arc::clone(&pair);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            let mut done = pair2.0.lock().unwrap();
            *done = true;
            pair2.1.notify_all();
        });
        let guard = pair.0.lock().unwrap();
        let (_, result) = pair.1.wait_timeout_while(guard, Duration::from_secs(5), |done| *done);
        assert_eq!(result, WaitResult::Signaled);
    }
}
