//! `mn` is a small collection of systems primitives meant to sit where a
//! `std` runtime usually does: a pluggable allocator stack, a work-stealing
//! task fabric with preemption-by-replacement, and channels/mutexes wired
//! into a process-wide deadlock detector.
//!
//! Everything outside this crate's four corners — string/buffer/map
//! containers, a regex VM, a JSON parser, socket/file wrappers, path
//! utilities, hot-reload — is intentionally absent. This crate only
//! specifies the narrow interfaces (see [`hotreload`]) that such
//! collaborators would consume.

#[macro_use]
mod log;

mod unwind;

pub mod alloc;
pub mod block;
pub mod channel;
pub mod compute;
pub mod context;
pub mod error;
pub mod fabric;
pub mod hotreload;
pub mod sync;
pub mod task;
pub mod worker;

pub use crate::alloc::{Allocator, Block};
pub use crate::channel::{Chan, RecvIter};
pub use crate::compute::{compute, compute_sized, Dim3};
pub use crate::context::Context;
pub use crate::error::{FabricBuildError, TryLockError, TryRecvError, TrySendError};
pub use crate::fabric::{Fabric, FabricBuilder, FabricSettings};
pub use crate::hotreload::{RadApiFn, RadHandle};
pub use crate::sync::{CondVar, Mutex, RwMutex, Waitgroup, WaitResult};
pub use crate::task::Task;

/// Spawns `f` onto `fabric`, round-robin dispatched to the next worker.
///
/// This is the free-function form of [`Fabric::go`]; it exists so call
/// sites that only have a `&Fabric` in scope read the same as the spec's
/// `go(fabric, fn)`.
pub fn go<F>(fabric: &Fabric, f: F)
where
    F: FnOnce() + Send + 'static,
{
    fabric.go(f)
}

/// Spawns `f` onto the process-wide fabric installed via
/// [`Fabric::init_global`].
///
/// This is the thread-local-fabric `go(fn)` form from the ABI; it panics if
/// no global fabric has been installed, since there is nothing implicit to
/// dispatch onto otherwise.
pub fn go_global<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    Fabric::global()
        .expect("mn: go_global called with no global fabric installed")
        .go(f)
}

/// Returns a handle to the current OS thread's [`Context`], creating one
/// lazily on first use.
pub fn context() -> &'static Context {
    context::current()
}
