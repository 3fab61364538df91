//! Synchronization primitives (SPEC_FULL.md §4.C, §4.D, §4.E): named
//! mutexes wired into the process-wide deadlock detector, a condition
//! variable distinguishing spurious wakeups from real ones, and a
//! waitgroup.

pub mod deadlock;

mod condvar;
mod mutex;
mod semaphore;
mod waitgroup;

pub use condvar::{CondVar, WaitResult};
pub use mutex::{Mutex, MutexGuard, RwMutex, RwMutexReadGuard, RwMutexWriteGuard};
pub use semaphore::Semaphore;
pub use waitgroup::Waitgroup;
