use super::{Allocator, Block};
use std::backtrace::Backtrace;
use std::sync::{Arc, Mutex};

struct LiveAllocation {
    ptr: usize,
    size: usize,
    backtrace: Backtrace,
}

struct Inner {
    parent: Box<Allocator>,
    live: Vec<LiveAllocation>,
}

/// Wraps another allocator and records a callstack per live allocation, so
/// leaks still outstanding at [`LeakAlloc::report_leaks`] time can be
/// attributed to their call site (SPEC_FULL.md §4.A).
///
/// Capturing a backtrace on every `alloc` is not cheap; this backend exists
/// for debugging sessions, not the hot path.
#[derive(Clone)]
pub struct LeakAlloc {
    inner: Arc<Mutex<Inner>>,
}

impl LeakAlloc {
    pub fn wrapping(parent: Allocator) -> Self {
        LeakAlloc {
            inner: Arc::new(Mutex::new(Inner {
                parent: Box::new(parent),
                live: Vec::new(),
            })),
        }
    }

    pub fn alloc(&self, size: usize, align: usize) -> Block {
        let mut inner = self.inner.lock().unwrap();
        let block = inner.parent.alloc(size, align);
        if !block.is_empty() {
            inner.live.push(LiveAllocation {
                ptr: block.as_ptr() as usize,
                size: block.size(),
                backtrace: Backtrace::capture(),
            });
        }
        block
    }

    pub fn free(&self, block: Block) {
        let mut inner = self.inner.lock().unwrap();
        let addr = block.as_ptr() as usize;
        if let Some(pos) = inner.live.iter().position(|a| a.ptr == addr) {
            inner.live.swap_remove(pos);
        }
        inner.parent.free(block);
    }

    /// Number of allocations still outstanding.
    pub fn live_count(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }

    /// Prints every still-live allocation's size and captured callstack to
    /// stderr. Intended for use at shutdown, when every legitimate
    /// allocation should already have been freed.
    pub fn report_leaks(&self) {
        let inner = self.inner.lock().unwrap();
        for leak in &inner.live {
            eprintln!(
                "mn: leaked {} bytes at {:#x}\n{}",
                leak.size, leak.ptr, leak.backtrace
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_and_clears_live_allocations() {
        let leak = LeakAlloc::wrapping(Allocator::system());
        let b = leak.alloc(16, 8);
        assert_eq!(leak.live_count(), 1);
        leak.free(b);
        assert_eq!(leak.live_count(), 0);
    }
}
