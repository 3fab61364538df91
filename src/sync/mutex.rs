//! Named exclusive and reader/writer mutexes wired into the deadlock
//! detector and the worker blocking hooks (SPEC_FULL.md §4.C).

use crate::block::{worker_block_ahead, worker_block_clear};
use crate::error::TryLockError;
use crate::sync::deadlock;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex as StdMutex};

fn mutex_id<T>(addr: *const T) -> deadlock::MutexId {
    addr as usize
}

/// An exclusive lock with a display name, observed by the deadlock
/// detector on every acquire/release.
pub struct Mutex<T> {
    name: &'static str,
    locked: AtomicBool,
    gate: StdMutex<()>,
    condvar: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        Mutex {
            name,
            locked: AtomicBool::new(false),
            gate: StdMutex::new(()),
            condvar: Condvar::new(),
            data: UnsafeCell::new(value),
        }
    }

    fn id(&self) -> deadlock::MutexId {
        mutex_id(self)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquires the lock, blocking the calling worker if necessary.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        deadlock::register_name(self.id(), self.name);

        // Fast path: an uncontended non-blocking acquire.
        if !self.locked.swap(true, Ordering::Acquire) {
            deadlock::set_exclusive_owner(self.id());
            return MutexGuard { mutex: self };
        }

        worker_block_ahead();
        deadlock::mark_waiting_for(self.id());
        let mut guard = self.gate.lock().unwrap();
        while self.locked.swap(true, Ordering::Acquire) {
            guard = self.condvar.wait(guard).unwrap();
        }
        drop(guard);
        deadlock::set_exclusive_owner(self.id());
        deadlock::clear_waiting(self.id());
        worker_block_clear();

        MutexGuard { mutex: self }
    }

    /// Tries to acquire the lock without blocking.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, TryLockError> {
        if !self.locked.swap(true, Ordering::Acquire) {
            deadlock::register_name(self.id(), self.name);
            deadlock::set_exclusive_owner(self.id());
            Ok(MutexGuard { mutex: self })
        } else {
            Err(TryLockError { name: self.name })
        }
    }

    fn unlock(&self) {
        // The detector must be told the lock is released *before* the
        // kernel-level primitive actually releases it, per SPEC_FULL.md
        // §4.C, so that no other thread can observe "unowned" ownership
        // state racing ahead of the real unlock.
        deadlock::unset_owner(self.id());
        let _guard = self.gate.lock().unwrap();
        self.locked.store(false, Ordering::Release);
        self.condvar.notify_one();
    }
}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        deadlock::unregister(self.id());
    }
}

/// RAII guard returned by [`Mutex::lock`]/[`Mutex::try_lock`]; releases the
/// mutex on drop.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

enum RwState {
    Idle,
    Reading(usize),
    Writing,
}

/// A reader/writer mutex: one writer xor many readers. Recursive shared
/// locking by the same thread is unsupported, per SPEC_FULL.md §4.C.
pub struct RwMutex<T> {
    name: &'static str,
    gate: StdMutex<RwState>,
    readers_cv: Condvar,
    writers_cv: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RwMutex<T> {}
unsafe impl<T: Send + Sync> Sync for RwMutex<T> {}

impl<T> RwMutex<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        RwMutex {
            name,
            gate: StdMutex::new(RwState::Idle),
            readers_cv: Condvar::new(),
            writers_cv: Condvar::new(),
            data: UnsafeCell::new(value),
        }
    }

    fn id(&self) -> deadlock::MutexId {
        mutex_id(self)
    }

    pub fn read_lock(&self) -> RwMutexReadGuard<'_, T> {
        deadlock::register_name(self.id(), self.name);
        let mut state = self.gate.lock().unwrap();
        if !matches!(*state, RwState::Idle | RwState::Reading(_)) {
            worker_block_ahead();
            deadlock::mark_waiting_for(self.id());
            while matches!(*state, RwState::Writing) {
                state = self.readers_cv.wait(state).unwrap();
            }
            deadlock::clear_waiting(self.id());
            worker_block_clear();
        }
        match &mut *state {
            RwState::Idle => *state = RwState::Reading(1),
            RwState::Reading(n) => *n += 1,
            RwState::Writing => unreachable!(),
        }
        deadlock::add_shared_owner(self.id());
        RwMutexReadGuard { lock: self }
    }

    pub fn write_lock(&self) -> RwMutexWriteGuard<'_, T> {
        deadlock::register_name(self.id(), self.name);
        let mut state = self.gate.lock().unwrap();
        if !matches!(*state, RwState::Idle) {
            worker_block_ahead();
            deadlock::mark_waiting_for(self.id());
            while !matches!(*state, RwState::Idle) {
                state = self.writers_cv.wait(state).unwrap();
            }
            deadlock::clear_waiting(self.id());
            worker_block_clear();
        }
        *state = RwState::Writing;
        deadlock::set_exclusive_owner(self.id());
        RwMutexWriteGuard { lock: self }
    }

    fn read_unlock(&self) {
        deadlock::remove_shared_owner(self.id());
        let mut state = self.gate.lock().unwrap();
        match &mut *state {
            RwState::Reading(n) => {
                *n -= 1;
                if *n == 0 {
                    *state = RwState::Idle;
                    self.writers_cv.notify_one();
                }
            }
            _ => unreachable!("mn: read_unlock called while not in Reading state"),
        }
    }

    fn write_unlock(&self) {
        deadlock::unset_owner(self.id());
        let mut state = self.gate.lock().unwrap();
        *state = RwState::Idle;
        self.writers_cv.notify_one();
        self.readers_cv.notify_all();
    }
}

impl<T> Drop for RwMutex<T> {
    fn drop(&mut self) {
        deadlock::unregister(self.id());
    }
}

pub struct RwMutexReadGuard<'a, T> {
    lock: &'a RwMutex<T>,
}

impl<'a, T> Deref for RwMutexReadGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> Drop for RwMutexReadGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.read_unlock();
    }
}

pub struct RwMutexWriteGuard<'a, T> {
    lock: &'a RwMutex<T>,
}

impl<'a, T> Deref for RwMutexWriteGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for RwMutexWriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for RwMutexWriteGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.write_unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn exclusive_excludes() {
        let m = Arc::new(Mutex::new("test", 0i32));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&m);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *m.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*m.lock(), 8000);
    }

    #[test]
    fn try_lock_fails_when_held() {
        let m = Mutex::new("test", 0i32);
        let guard = m.lock();
        assert!(m.try_lock().is_err());
        drop(guard);
        assert!(m.try_lock().is_ok());
    }

    #[test]
    fn rw_allows_concurrent_readers() {
        let rw = Arc::new(RwMutex::new("test", 42i32));
        let r1 = rw.read_lock();
        let r2 = rw.read_lock();
        assert_eq!(*r1, 42);
        assert_eq!(*r2, 42);
    }
}
