//! Bounded, closable, reference-counted channel (SPEC_FULL.md §3, §4.F).
//!
//! One mutex guards a `VecDeque<T>` ring; two condition variables — one for
//! readers, one for writers — wake the two sides independently, matching
//! the teacher's own habit of giving each distinct wait condition its own
//! condvar rather than overloading a single one (`registry.rs`'s
//! `Sleep` keeps separate wake paths for "new injected job" versus "no work
//! found"). Both condvars are the crate's own [`CondVar`], so a worker
//! suspended on a full/empty channel is visible to sysmon exactly like a
//! worker blocked on a mutex.

use crate::log::{Event, Logger};
use crate::sync::CondVar;
use crate::{TryRecvError, TrySendError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

struct Inner<T> {
    state: Mutex<State<T>>,
    readers: CondVar,
    writers: CondVar,
}

struct State<T> {
    ring: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

/// A bounded, closable, reference-counted FIFO channel.
///
/// `Chan` is cheap to clone (it is a thin `Arc` handle, the Rust-idiomatic
/// stand-in for the spec's explicit `chan_ref`/`chan_unref`); the backing
/// ring and its primitives are freed once the last clone drops.
pub struct Chan<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Chan {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Chan<T> {
    /// Creates a channel with room for `capacity` buffered values.
    ///
    /// # Panics
    /// Panics if `capacity` is `0` — unbuffered channels are not supported;
    /// approximate one with capacity `1`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "mn: Chan capacity must be at least 1");
        Chan {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    ring: VecDeque::with_capacity(capacity),
                    capacity,
                    closed: false,
                }),
                readers: CondVar::new(),
                writers: CondVar::new(),
            }),
        }
    }

    /// Sends `value`, blocking while the channel is full and open.
    ///
    /// # Panics
    /// Panics if the channel is already closed — sending on a closed
    /// channel is a caller bug, not a recoverable condition (SPEC_FULL.md
    /// §7).
    pub fn send(&self, value: T) {
        let mut state = self.inner.state.lock().unwrap();
        loop {
            assert!(!state.closed, "mn: send on a closed channel");
            if state.ring.len() < state.capacity {
                state.ring.push_back(value);
                self.inner.readers.notify_one();
                return;
            }
            state = self.inner.writers.wait(state);
        }
    }

    /// Non-blocking send: fails immediately instead of suspending.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.inner.state.lock().unwrap();
        if state.closed {
            return Err(TrySendError::Closed(value));
        }
        if state.ring.len() >= state.capacity {
            return Err(TrySendError::Full(value));
        }
        state.ring.push_back(value);
        self.inner.readers.notify_one();
        Ok(())
    }

    /// Receives a value, blocking while the channel is empty and open.
    ///
    /// Returns `(value, true)` on a real receive, or `(None, false)` once
    /// the channel is closed and drained — mirroring the spec's
    /// `(default, false)` sentinel pair without requiring `T: Default`.
    pub fn recv(&self) -> (Option<T>, bool) {
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if let Some(v) = state.ring.pop_front() {
                self.inner.writers.notify_one();
                return (Some(v), true);
            }
            if state.closed {
                return (None, false);
            }
            state = self.inner.readers.wait(state);
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(v) = state.ring.pop_front() {
            self.inner.writers.notify_one();
            return Ok(v);
        }
        if state.closed {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Marks the channel closed. Idempotent. Wakes every blocked sender and
    /// receiver; senders will now panic, receivers drain remaining values
    /// then observe `more == false`.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;
        let capacity = state.capacity;
        drop(state);
        self.inner.readers.notify_all();
        self.inner.writers.notify_all();
        Logger::new().log(|| Event::ChannelClosed { capacity });
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().unwrap().closed
    }

    pub fn capacity(&self) -> usize {
        self.inner.state.lock().unwrap().capacity
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An iterator that yields values until the channel closes and drains,
    /// equivalent to calling `recv` in a loop while `more` holds.
    pub fn iter(&self) -> RecvIter<'_, T> {
        RecvIter { chan: self }
    }
}

/// Yields values from a [`Chan`] until it closes and drains.
pub struct RecvIter<'a, T> {
    chan: &'a Chan<T>,
}

impl<'a, T> Iterator for RecvIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.chan.recv() {
            (Some(v), true) => Some(v),
            _ => None,
        }
    }
}

impl<'a, T> IntoIterator for &'a Chan<T> {
    type Item = T;
    type IntoIter = RecvIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    #[should_panic]
    fn new_with_zero_capacity_panics() {
        let _: Chan<i32> = Chan::new(0);
    }

    #[test]
    fn send_recv_fifo() {
        let chan = Chan::new(4);
        chan.send(1);
        chan.send(2);
        chan.send(3);
        assert_eq!(chan.recv(), (Some(1), true));
        assert_eq!(chan.recv(), (Some(2), true));
        assert_eq!(chan.recv(), (Some(3), true));
    }

    #[test]
    fn try_send_full_and_try_recv_empty() {
        let chan = Chan::new(1);
        chan.try_send(1).unwrap();
        assert_eq!(chan.try_send(2), Err(TrySendError::Full(2)));
        assert_eq!(chan.try_recv(), Ok(1));
        assert_eq!(chan.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn close_drains_then_reports_not_more() {
        let chan = Chan::new(4);
        chan.send(1);
        chan.close();
        assert_eq!(chan.recv(), (Some(1), true));
        assert_eq!(chan.recv(), (None, false));
    }

    #[test]
    #[should_panic(expected = "closed channel")]
    fn send_after_close_panics() {
        let chan = Chan::new(1);
        chan.close();
        chan.send(1);
    }

    #[test]
    fn try_send_after_close_is_closed_error() {
        let chan = Chan::new(1);
        chan.close();
        assert_eq!(chan.try_send(1), Err(TrySendError::Closed(1)));
    }

    #[test]
    fn close_is_idempotent() {
        let chan: Chan<i32> = Chan::new(1);
        chan.close();
        chan.close();
        assert!(chan.is_closed());
    }

    #[test]
    fn clone_shares_the_same_ring() {
        let a = Chan::new(4);
        let b = a.clone();
        a.send(42);
        assert_eq!(b.recv(), (Some(42), true));
    }

    #[test]
    fn blocking_producer_consumer_across_threads() {
        let chan = Chan::new(1);
        let producer = chan.clone();
        let handle = thread::spawn(move || {
            for i in 0..100 {
                producer.send(i);
            }
            producer.close();
        });
        let sum: i32 = chan.iter().sum();
        handle.join().unwrap();
        assert_eq!(sum, (0..100).sum());
    }
}
