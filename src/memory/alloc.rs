//! The module's exported allocation primitives
//!
//! The host never carves up linear memory itself: it asks the module through
//! `malloc`/`realloc`/`free`, and borrows return slots from the module's
//! shadow stack via `add_to_stack_pointer`. Any of these may grow memory.

use std::collections::BTreeMap;

use super::LinearMemory;
use crate::error::MemoryError;

/// Heap blocks are rounded to this granularity
const BLOCK_ALIGN: u32 = 8;

/// Allocation entry points a module exports
pub trait ModuleAllocator {
    fn malloc(&mut self, mem: &mut LinearMemory, size: u32, align: u32) -> Result<u32, MemoryError>;

    fn realloc(
        &mut self,
        mem: &mut LinearMemory,
        ptr: u32,
        old_size: u32,
        new_size: u32,
        align: u32,
    ) -> Result<u32, MemoryError>;

    fn free(&mut self, mem: &mut LinearMemory, ptr: u32, size: u32, align: u32) -> Result<(), MemoryError>;

    /// Move the shadow stack pointer by `delta` bytes and return the new pointer
    fn add_to_stack_pointer(&mut self, delta: i32) -> Result<u32, MemoryError>;

    fn live_allocations(&self) -> usize;

    fn live_bytes(&self) -> usize;
}

#[inline(always)]
fn align_up(value: u32, align: u32) -> u32 {
    let align = align.max(1);
    (value + align - 1) / align * align
}

/// First-fit allocator with a bump frontier and coalescing free list
pub struct FreeListAllocator {
    stack_top: u32,
    stack_pointer: u32,
    heap_end: u32,
    /// ptr -> block size
    live: BTreeMap<u32, u32>,
    /// (ptr, size), sorted by ptr
    free_blocks: Vec<(u32, u32)>,
}

impl FreeListAllocator {
    /// The shadow stack occupies `0..stack_size`; the heap starts right above it
    pub fn new(stack_size: u32) -> Self {
        let stack_top = align_up(stack_size.max(BLOCK_ALIGN), BLOCK_ALIGN);
        FreeListAllocator {
            stack_top,
            stack_pointer: stack_top,
            heap_end: stack_top,
            live: BTreeMap::new(),
            free_blocks: Vec::new(),
        }
    }

    pub fn stack_pointer(&self) -> u32 {
        self.stack_pointer
    }

    pub fn heap_base(&self) -> u32 {
        self.stack_top
    }

    pub fn heap_end(&self) -> u32 {
        self.heap_end
    }

    fn take_free_block(&mut self, size: u32, align: u32) -> Option<u32> {
        let idx = self
            .free_blocks
            .iter()
            .position(|&(ptr, len)| ptr % align == 0 && len >= size)?;
        let (ptr, len) = self.free_blocks[idx];
        if len > size {
            self.free_blocks[idx] = (ptr + size, len - size);
        } else {
            self.free_blocks.remove(idx);
        }
        Some(ptr)
    }

    fn bump(&mut self, mem: &mut LinearMemory, size: u32, align: u32) -> Result<u32, MemoryError> {
        let ptr = align_up(self.heap_end, align);
        let end = ptr
            .checked_add(size)
            .ok_or(MemoryError::OutOfMemory { requested_pages: u32::MAX, max_pages: mem.max_pages() })?;
        mem.ensure(end as usize)?;
        if ptr > self.heap_end {
            // alignment padding becomes a free block
            self.release_block(self.heap_end, ptr - self.heap_end);
        }
        self.heap_end = end;
        Ok(ptr)
    }

    fn release_block(&mut self, ptr: u32, size: u32) {
        let idx = self.free_blocks.partition_point(|&(p, _)| p < ptr);
        self.free_blocks.insert(idx, (ptr, size));

        // merge with the following block
        if idx + 1 < self.free_blocks.len() {
            let (next_ptr, next_len) = self.free_blocks[idx + 1];
            if ptr + self.free_blocks[idx].1 == next_ptr {
                self.free_blocks[idx].1 += next_len;
                self.free_blocks.remove(idx + 1);
            }
        }
        // merge with the preceding block
        if idx > 0 {
            let (prev_ptr, prev_len) = self.free_blocks[idx - 1];
            if prev_ptr + prev_len == self.free_blocks[idx].0 {
                self.free_blocks[idx - 1].1 += self.free_blocks[idx].1;
                self.free_blocks.remove(idx);
            }
        }
        // hand a trailing free block back to the bump frontier
        if let Some(&(last_ptr, last_len)) = self.free_blocks.last() {
            if last_ptr + last_len == self.heap_end {
                self.heap_end = last_ptr;
                self.free_blocks.pop();
            }
        }
    }
}

impl ModuleAllocator for FreeListAllocator {
    fn malloc(&mut self, mem: &mut LinearMemory, size: u32, align: u32) -> Result<u32, MemoryError> {
        let align = align.max(1);
        if size == 0 {
            return Ok(align);
        }
        let size = align_up(size, BLOCK_ALIGN);
        let ptr = match self.take_free_block(size, align) {
            Some(ptr) => ptr,
            None => self.bump(mem, size, align.max(BLOCK_ALIGN))?,
        };
        self.live.insert(ptr, size);
        Ok(ptr)
    }

    fn realloc(
        &mut self,
        mem: &mut LinearMemory,
        ptr: u32,
        old_size: u32,
        new_size: u32,
        align: u32,
    ) -> Result<u32, MemoryError> {
        if old_size == 0 {
            return self.malloc(mem, new_size, align);
        }
        if new_size == 0 {
            self.free(mem, ptr, old_size, align)?;
            return Ok(align.max(1));
        }
        let capacity = *self.live.get(&ptr).ok_or(MemoryError::UnknownAllocation { ptr })?;
        let wanted = align_up(new_size, BLOCK_ALIGN);
        let at_frontier = ptr + capacity == self.heap_end;

        if at_frontier {
            // resize in place, growing memory if needed
            mem.ensure((ptr + wanted) as usize)?;
            self.heap_end = ptr + wanted;
            self.live.insert(ptr, wanted);
            return Ok(ptr);
        }
        if wanted <= capacity {
            return Ok(ptr);
        }

        let new_ptr = self.malloc(mem, new_size, align)?;
        mem.copy_within(ptr, new_ptr, old_size.min(new_size))?;
        self.free(mem, ptr, old_size, align)?;
        Ok(new_ptr)
    }

    fn free(&mut self, _mem: &mut LinearMemory, ptr: u32, size: u32, _align: u32) -> Result<(), MemoryError> {
        if size == 0 {
            return Ok(());
        }
        let block = self.live.remove(&ptr).ok_or(MemoryError::UnknownAllocation { ptr })?;
        self.release_block(ptr, block);
        Ok(())
    }

    fn add_to_stack_pointer(&mut self, delta: i32) -> Result<u32, MemoryError> {
        let next = self.stack_pointer as i64 + delta as i64;
        if next < 0 || next > self.stack_top as i64 {
            return Err(MemoryError::StackOverflow);
        }
        self.stack_pointer = next as u32;
        Ok(self.stack_pointer)
    }

    fn live_allocations(&self) -> usize {
        self.live.len()
    }

    fn live_bytes(&self) -> usize {
        self.live.values().map(|&s| s as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PAGE_SIZE;

    fn setup() -> (LinearMemory, FreeListAllocator) {
        (LinearMemory::new(1, 64), FreeListAllocator::new(4096))
    }

    #[test]
    fn test_malloc_respects_alignment_and_heap_base() {
        let (mut mem, mut alloc) = setup();
        let a = alloc.malloc(&mut mem, 3, 1).unwrap();
        let b = alloc.malloc(&mut mem, 16, 8).unwrap();
        assert!(a >= alloc.heap_base());
        assert_eq!(b % 8, 0);
        assert_ne!(a, b);
        assert_eq!(alloc.live_allocations(), 2);
    }

    #[test]
    fn test_zero_sized_malloc_does_not_allocate() {
        let (mut mem, mut alloc) = setup();
        assert_eq!(alloc.malloc(&mut mem, 0, 8).unwrap(), 8);
        assert_eq!(alloc.live_allocations(), 0);
    }

    #[test]
    fn test_free_reuses_and_coalesces() {
        let (mut mem, mut alloc) = setup();
        let a = alloc.malloc(&mut mem, 32, 8).unwrap();
        let b = alloc.malloc(&mut mem, 32, 8).unwrap();
        let _c = alloc.malloc(&mut mem, 32, 8).unwrap();

        alloc.free(&mut mem, a, 32, 8).unwrap();
        alloc.free(&mut mem, b, 32, 8).unwrap();

        // the two neighbours merged into one 64-byte block
        let d = alloc.malloc(&mut mem, 64, 8).unwrap();
        assert_eq!(d, a);
    }

    #[test]
    fn test_double_free_is_rejected() {
        let (mut mem, mut alloc) = setup();
        let a = alloc.malloc(&mut mem, 8, 8).unwrap();
        alloc.free(&mut mem, a, 8, 8).unwrap();
        assert_eq!(
            alloc.free(&mut mem, a, 8, 8),
            Err(MemoryError::UnknownAllocation { ptr: a })
        );
    }

    #[test]
    fn test_heap_growth_detaches_memory() {
        let (mut mem, mut alloc) = setup();
        let generation = mem.generation();
        let big = alloc.malloc(&mut mem, PAGE_SIZE as u32, 8).unwrap();
        assert!(mem.size() >= (big as usize + PAGE_SIZE));
        assert!(mem.generation() > generation);
    }

    #[test]
    fn test_realloc_moves_and_preserves_contents() {
        let (mut mem, mut alloc) = setup();
        let a = alloc.malloc(&mut mem, 8, 1).unwrap();
        mem.write_bytes(a, b"abcdefgh").unwrap();
        let _pin = alloc.malloc(&mut mem, 8, 1).unwrap();

        let moved = alloc.realloc(&mut mem, a, 8, 64, 1).unwrap();
        assert_ne!(moved, a);
        assert_eq!(mem.slice(moved, 8).unwrap(), b"abcdefgh");
        assert_eq!(alloc.live_allocations(), 2);
    }

    #[test]
    fn test_stack_pointer_bounds() {
        let (_, mut alloc) = setup();
        let top = alloc.stack_pointer();
        let frame = alloc.add_to_stack_pointer(-16).unwrap();
        assert_eq!(frame, top - 16);
        assert_eq!(alloc.add_to_stack_pointer(16).unwrap(), top);
        assert_eq!(alloc.add_to_stack_pointer(16), Err(MemoryError::StackOverflow));
    }
}
