//! Per-thread [`Context`]: the allocator stack, scratch temp arena, and
//! scratch text reader every OS thread gets lazily on first use
//! (SPEC_FULL.md §3, §4.B).

use crate::alloc::{ArenaAlloc, Allocator, Block};
use std::cell::RefCell;
use std::io::Cursor;

const MAX_ALLOCATOR_DEPTH: usize = 1024;

/// A minimal scratch reader over whatever bytes were last staged into it.
///
/// This exists purely so call sites that need to parse short-lived text
/// (think: formatting a worker's debug name, or reading back a few bytes
/// from a `Block`) do not have to allocate a fresh buffer per call; it is
/// explicitly not a general-purpose text/IO type (those live outside this
/// crate's scope, per SPEC_FULL.md §1).
pub struct ScratchReader {
    cursor: RefCell<Cursor<Vec<u8>>>,
}

impl ScratchReader {
    fn new() -> Self {
        ScratchReader {
            cursor: RefCell::new(Cursor::new(Vec::new())),
        }
    }

    /// Stages `bytes` for reading and resets the read position to the
    /// start.
    pub fn stage(&self, bytes: &[u8]) {
        let mut cursor = self.cursor.borrow_mut();
        cursor.get_mut().clear();
        cursor.get_mut().extend_from_slice(bytes);
        cursor.set_position(0);
    }

    /// Reads up to `buf.len()` bytes from the staged content, returning how
    /// many bytes were copied.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        use std::io::Read;
        self.cursor.borrow_mut().read(buf).unwrap_or(0)
    }
}

/// One per OS thread. Created lazily the first time [`current`] is called
/// on that thread, and torn down when the thread exits.
pub struct Context {
    allocators: RefCell<Vec<Allocator>>,
    tmp: ArenaAlloc,
    scratch: ScratchReader,
}

impl Context {
    fn new() -> Self {
        Context {
            allocators: RefCell::new(vec![Allocator::system()]),
            tmp: ArenaAlloc::new(),
            scratch: ScratchReader::new(),
        }
    }

    /// The allocator `alloc`/`free` bind to when no allocator is named
    /// explicitly: the top of this thread's allocator stack.
    pub fn allocator_top(&self) -> Allocator {
        self.allocators
            .borrow()
            .last()
            .cloned()
            .expect("mn: allocator stack is never empty (the system allocator is its permanent floor)")
    }

    /// Pushes `a` as the new top of this thread's allocator stack.
    ///
    /// Panics if the stack is already at its maximum depth (1024), matching
    /// SPEC_FULL.md §4.B.
    pub fn push(&self, a: Allocator) {
        let mut allocators = self.allocators.borrow_mut();
        assert!(
            allocators.len() < MAX_ALLOCATOR_DEPTH,
            "mn: allocator stack exceeded its maximum depth of {}",
            MAX_ALLOCATOR_DEPTH
        );
        allocators.push(a);
    }

    /// Pops the top of this thread's allocator stack.
    ///
    /// Panics if this would pop the bottom (system) allocator.
    pub fn pop(&self) {
        let mut allocators = self.allocators.borrow_mut();
        assert!(
            allocators.len() > 1,
            "mn: cannot pop the system allocator off the bottom of the stack"
        );
        allocators.pop();
    }

    /// The thread-local scratch arena for short-lived allocations.
    pub fn tmp(&self) -> &ArenaAlloc {
        &self.tmp
    }

    /// The thread-local scratch text reader.
    pub fn scratch(&self) -> &ScratchReader {
        &self.scratch
    }

    /// Convenience: allocate from the current top-of-stack allocator.
    pub fn alloc(&self, size: usize, align: usize) -> Block {
        self.allocator_top().alloc(size, align)
    }
}

thread_local! {
    static CONTEXT: Context = Context::new();
}

/// Returns this OS thread's [`Context`], creating it on first call.
///
/// The returned reference is valid for the lifetime of the calling thread;
/// it must not be sent to, or read from, another thread (contexts are
/// explicitly thread-local, SPEC_FULL.md §5).
pub fn current() -> &'static Context {
    CONTEXT.with(|ctx| {
        // SAFETY: `ctx` lives in a `thread_local!` and is valid until this
        // thread exits; the `'static`-shaped reference we hand back is
        // never observed outliving the thread that produced it.
        unsafe { &*(ctx as *const Context) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_stack_push_pop() {
        let ctx = current();
        let before = match ctx.allocator_top() {
            Allocator::System(_) => true,
            _ => false,
        };
        assert!(before);

        ctx.push(Allocator::Arena(ArenaAlloc::new()));
        let after = match ctx.allocator_top() {
            Allocator::Arena(_) => true,
            _ => false,
        };
        assert!(after);
        ctx.pop();
    }

    #[test]
    #[should_panic(expected = "cannot pop the system allocator")]
    fn cannot_pop_the_bottom() {
        let ctx = current();
        // Pop any allocators this test process may have left pushed, then
        // try to go one further.
        while ctx.allocators.borrow().len() > 1 {
            ctx.pop();
        }
        ctx.pop();
    }

    #[test]
    fn scratch_reader_round_trips() {
        let ctx = current();
        ctx.scratch().stage(b"hello");
        let mut buf = [0u8; 5];
        let n = ctx.scratch().read(&mut buf);
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }
}
