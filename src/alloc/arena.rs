use super::Block;
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

struct RawBlock {
    base: NonNull<u8>,
    layout: Layout,
    cursor: usize,
}

impl RawBlock {
    fn new(size: usize) -> Self {
        let layout = Layout::from_size_align(size, 16).expect("mn: arena block layout overflow");
        let base = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(base).unwrap_or_else(|| {
            panic!("mn: system allocator out of memory growing arena by {} bytes", size)
        });
        RawBlock {
            base,
            layout,
            cursor: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.layout.size() - self.cursor
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

struct Inner {
    blocks: Vec<RawBlock>,
    default_block_size: usize,
    high_water_mark: usize,
    live_bytes: usize,
}

impl Inner {
    fn grow(&mut self, at_least: usize) {
        let size = at_least.max(self.default_block_size);
        self.blocks.push(RawBlock::new(size));
    }
}

/// A linked list of bump-allocated blocks that grows on demand.
///
/// `reset` makes existing blocks reusable without returning them to the
/// parent allocator; `free_all` returns every block. A rolling high-water
/// mark is tracked across the arena's lifetime (SPEC_FULL.md §4.A).
#[derive(Clone)]
pub struct ArenaAlloc {
    inner: Arc<Mutex<Inner>>,
}

impl ArenaAlloc {
    pub fn new() -> Self {
        Self::with_default_block_size(DEFAULT_BLOCK_SIZE)
    }

    pub fn with_default_block_size(default_block_size: usize) -> Self {
        ArenaAlloc {
            inner: Arc::new(Mutex::new(Inner {
                blocks: Vec::new(),
                default_block_size,
                high_water_mark: 0,
                live_bytes: 0,
            })),
        }
    }

    pub fn alloc(&self, size: usize, align: usize) -> Block {
        if size == 0 {
            return Block::empty();
        }
        let mut inner = self.inner.lock().unwrap();

        if !inner
            .blocks
            .last()
            .map(|b| fits(b, size, align))
            .unwrap_or(false)
        {
            inner.grow(size + align);
        }

        let block = inner.blocks.last_mut().expect("mn: arena grow() failed to add a block");
        let base = block.base.as_ptr() as usize;
        let aligned = align_up(base + block.cursor, align);
        block.cursor = aligned - base + size;

        inner.live_bytes += size;
        if inner.live_bytes > inner.high_water_mark {
            inner.high_water_mark = inner.live_bytes;
        }

        // SAFETY: `aligned` lies within the block we just sized above.
        let ptr = NonNull::new(aligned as *mut u8).expect("mn: arena produced a null pointer");
        Block::new(ptr, size, align)
    }

    /// Arenas never individually free; `free` is a bookkeeping-only no-op
    /// beyond tracking live bytes, consistent with bump allocators.
    pub fn free(&self, block: Block) {
        if block.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.live_bytes = inner.live_bytes.saturating_sub(block.size());
    }

    /// Makes existing blocks reusable without returning them to the system
    /// allocator.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.live_bytes = 0;
        for block in &mut inner.blocks {
            block.cursor = 0;
        }
    }

    /// Returns every block to the system allocator.
    pub fn free_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.blocks.clear();
        inner.live_bytes = 0;
    }

    /// The largest `live_bytes` has ever been since construction or the
    /// last `free_all`.
    pub fn high_water_mark(&self) -> usize {
        self.inner.lock().unwrap().high_water_mark
    }
}

impl Default for ArenaAlloc {
    fn default() -> Self {
        Self::new()
    }
}

fn fits(block: &RawBlock, size: usize, align: usize) -> bool {
    let base = block.base.as_ptr() as usize;
    let aligned = align_up(base + block.cursor, align);
    aligned - base + size <= block.layout.size() && block.remaining() > 0
}

fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bumps_within_one_block() {
        let a = ArenaAlloc::new();
        let b1 = a.alloc(32, 8);
        let b2 = a.alloc(32, 8);
        assert_ne!(b1.as_ptr(), b2.as_ptr());
    }

    #[test]
    fn grows_past_default_block_size() {
        let a = ArenaAlloc::with_default_block_size(64);
        let _ = a.alloc(48, 8);
        let _ = a.alloc(48, 8); // forces a new block
        assert!(a.inner.lock().unwrap().blocks.len() >= 2);
    }

    #[test]
    fn high_water_mark_persists_across_reset() {
        let a = ArenaAlloc::new();
        let _ = a.alloc(100, 8);
        assert_eq!(a.high_water_mark(), 100);
        a.reset();
        assert_eq!(a.high_water_mark(), 100);
    }
}
