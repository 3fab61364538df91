//! Small-buffer-optimized, type-erased unit of work (SPEC_FULL.md §3, §4.G).
//!
//! Grounded on the teacher's `JobRef`/`StackJob` pair (`rayon-core`'s
//! `registry.rs` calls `job.as_job_ref()` then later `job_ref.execute()`):
//! a raw pointer plus a pair of function pointers standing in for a vtable.
//! Closures that fit in `7 * size_of::<*const ()>()` bytes are stored
//! inline; larger ones are allocated through a named [`Allocator`] and
//! freed back to it when the task finishes or is dropped unrun.

use crate::alloc::{Allocator, Block};
use std::mem::{self, MaybeUninit};
use std::ptr;

const INLINE_WORDS: usize = 7;
const INLINE_BYTES: usize = INLINE_WORDS * mem::size_of::<usize>();
const INLINE_ALIGN: usize = mem::align_of::<usize>();

#[derive(Clone, Copy)]
struct VTable {
    call: unsafe fn(*mut u8),
    drop: unsafe fn(*mut u8),
}

fn vtable_for<F: FnOnce() + Send>() -> VTable {
    unsafe fn call<F: FnOnce() + Send>(ptr: *mut u8) {
        let f = ptr.cast::<F>().read();
        f();
    }
    unsafe fn drop_in_place<F: FnOnce() + Send>(ptr: *mut u8) {
        ptr::drop_in_place(ptr.cast::<F>());
    }
    VTable {
        call: call::<F>,
        drop: drop_in_place::<F>,
    }
}

enum Storage {
    Empty,
    Inline {
        buf: [MaybeUninit<u8>; INLINE_BYTES],
        vtable: VTable,
    },
    Heap {
        block: Block,
        allocator: Allocator,
        vtable: VTable,
    },
}

/// A type-erased, move-only callable, run at most once.
///
/// An empty task (the `Default`, or one already [`Task::run`]) is falsy and
/// `Drop`s as a no-op — matching SPEC_FULL.md §8's boundary condition for
/// `task_free` on an empty task.
pub struct Task {
    storage: Storage,
}

impl Task {
    /// Wraps `f`, storing it inline if it fits in the small-buffer slot,
    /// otherwise on the system allocator.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task::new_in(f, Allocator::system())
    }

    /// Like [`Task::new`], but heap-backed closures are allocated through
    /// `allocator` instead of the system allocator, and returned to it when
    /// the task runs or is dropped.
    pub fn new_in<F>(f: F, allocator: Allocator) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let vtable = vtable_for::<F>();

        if mem::size_of::<F>() <= INLINE_BYTES && mem::align_of::<F>() <= INLINE_ALIGN {
            let mut buf: [MaybeUninit<u8>; INLINE_BYTES] = unsafe { MaybeUninit::uninit().assume_init() };
            unsafe { (buf.as_mut_ptr() as *mut F).write(f) };
            Task {
                storage: Storage::Inline { buf, vtable },
            }
        } else {
            let block = allocator.alloc(mem::size_of::<F>(), mem::align_of::<F>());
            unsafe { (block.as_ptr() as *mut F).write(f) };
            Task {
                storage: Storage::Heap {
                    block,
                    allocator,
                    vtable,
                },
            }
        }
    }

    /// The empty task: holds nothing, `run` and `drop` are no-ops.
    pub fn empty() -> Self {
        Task {
            storage: Storage::Empty,
        }
    }

    /// Whether this task holds a callable.
    pub fn is_empty(&self) -> bool {
        matches!(self.storage, Storage::Empty)
    }

    /// Runs the stored callable, consuming the task.
    pub fn run(mut self) {
        match mem::replace(&mut self.storage, Storage::Empty) {
            Storage::Empty => {}
            Storage::Inline { mut buf, vtable } => unsafe {
                (vtable.call)(buf.as_mut_ptr() as *mut u8);
            },
            Storage::Heap {
                block,
                allocator,
                vtable,
            } => {
                unsafe { (vtable.call)(block.as_ptr()) };
                allocator.free(block);
            }
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Task::empty()
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        match &mut self.storage {
            Storage::Empty => {}
            Storage::Inline { buf, vtable } => unsafe { (vtable.drop)(buf.as_mut_ptr() as *mut u8) },
            Storage::Heap {
                block,
                allocator,
                vtable,
            } => {
                unsafe { (vtable.drop)(block.as_ptr()) };
                allocator.free(*block);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn empty_task_run_is_noop() {
        let t = Task::empty();
        assert!(t.is_empty());
        t.run();
    }

    #[test]
    fn inline_closure_runs() {
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = Arc::clone(&flag);
        let task = Task::new(move || {
            flag2.store(1, Ordering::SeqCst);
        });
        assert!(!task.is_empty());
        task.run();
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn oversized_closure_spills_to_heap() {
        // A closure capturing more than 7 words forces the heap path.
        let big = [0u8; 256];
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = Arc::clone(&flag);
        let task = Task::new(move || {
            flag2.store(big.iter().map(|&b| b as usize).sum(), Ordering::SeqCst);
        });
        task.run();
        assert_eq!(flag.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_without_run_still_drops_captures() {
        let dropped = Arc::new(AtomicUsize::new(0));
        struct DropBomb(Arc<AtomicUsize>);
        impl Drop for DropBomb {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let bomb = DropBomb(Arc::clone(&dropped));
        let task = Task::new(move || {
            let _ = &bomb;
        });
        drop(task); // never run
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }
}
