use super::Block;
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// The default, unbounded backend: a thin wrapper over the global
/// allocator. Panics with a stable message on exhaustion, per
/// SPEC_FULL.md §4.A/§7.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAlloc;

impl SystemAlloc {
    pub fn new() -> Self {
        SystemAlloc
    }

    pub fn alloc(&self, size: usize, align: usize) -> Block {
        if size == 0 {
            return Block::empty();
        }
        let layout = Layout::from_size_align(size, align)
            .unwrap_or_else(|e| panic!("mn: invalid layout ({} bytes, align {}): {}", size, align, e));
        // SAFETY: `layout` has non-zero size, checked above.
        let raw = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| {
            panic!(
                "mn: system allocator out of memory requesting {} bytes (align {})",
                size, align
            )
        });
        Block::new(ptr, size, align)
    }

    pub fn free(&self, block: Block) {
        if block.is_empty() {
            return;
        }
        // The caller is required to have requested this exact (size, align)
        // pair from this same allocator; the block carries both, so the
        // layout handed to `dealloc` always matches the one passed to
        // `alloc`.
        let layout = Layout::from_size_align(block.size(), block.align())
            .expect("mn: corrupt block passed to SystemAlloc::free");
        unsafe { alloc::dealloc(block.as_ptr(), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "invalid layout")]
    fn bad_align_panics() {
        let a = SystemAlloc::new();
        a.alloc(1, 3);
    }
}
