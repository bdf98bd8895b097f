//! Module linear memory
//!
//! Memory layout (owned by the module, see `alloc`):
//! 0x00000000 - stack_size:  shadow stack (grows down from stack_size)
//! stack_size - ...:         heap (first-fit, grows page-wise)
//!
//! Growth replaces the backing buffer. Every growth bumps `generation`, which is
//! how typed views (see `views`) notice they are detached.

pub mod alloc;
pub mod views;

pub use alloc::{FreeListAllocator, ModuleAllocator};
pub use views::{View, ViewCache, ViewElement};

use crate::error::MemoryError;

/// WebAssembly page size
pub const PAGE_SIZE: usize = 64 * 1024;

/// The module's linear memory
pub struct LinearMemory {
    bytes: Vec<u8>,
    max_pages: u32,
    /// Incremented whenever the buffer is replaced
    generation: u64,
}

impl LinearMemory {
    pub fn new(initial_pages: u32, max_pages: u32) -> Self {
        LinearMemory {
            bytes: vec![0u8; initial_pages as usize * PAGE_SIZE],
            max_pages: max_pages.max(initial_pages),
            generation: 0,
        }
    }

    /// Size in bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn pages(&self) -> u32 {
        (self.bytes.len() / PAGE_SIZE) as u32
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    #[inline(always)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Grow by `delta` pages, returning the previous page count
    ///
    /// A zero delta leaves the buffer (and every outstanding view) intact.
    pub fn grow(&mut self, delta: u32) -> Result<u32, MemoryError> {
        let old = self.pages();
        if delta == 0 {
            return Ok(old);
        }
        let requested = old.checked_add(delta).unwrap_or(u32::MAX);
        if requested > self.max_pages {
            return Err(MemoryError::OutOfMemory {
                requested_pages: requested,
                max_pages: self.max_pages,
            });
        }

        // Copy into a fresh buffer rather than resizing in place so the
        // replacement is observable the same way a detached ArrayBuffer is.
        let mut bytes = vec![0u8; requested as usize * PAGE_SIZE];
        bytes[..self.bytes.len()].copy_from_slice(&self.bytes);
        self.bytes = bytes;
        self.generation += 1;
        Ok(old)
    }

    /// Grow so that `end` bytes are addressable
    pub fn ensure(&mut self, end: usize) -> Result<(), MemoryError> {
        if end <= self.bytes.len() {
            return Ok(());
        }
        let needed = (end - self.bytes.len() + PAGE_SIZE - 1) / PAGE_SIZE;
        self.grow(needed as u32).map(|_| ())
    }

    #[inline(always)]
    fn check(&self, ptr: u32, len: u32) -> Result<std::ops::Range<usize>, MemoryError> {
        let start = ptr as usize;
        let end = start + len as usize;
        if end > self.bytes.len() {
            return Err(MemoryError::OutOfBounds { ptr, len, size: self.bytes.len() });
        }
        Ok(start..end)
    }

    pub fn slice(&self, ptr: u32, len: u32) -> Result<&[u8], MemoryError> {
        let range = self.check(ptr, len)?;
        Ok(&self.bytes[range])
    }

    pub fn slice_mut(&mut self, ptr: u32, len: u32) -> Result<&mut [u8], MemoryError> {
        let range = self.check(ptr, len)?;
        Ok(&mut self.bytes[range])
    }

    /// Copy `data` into memory at `ptr`
    pub fn write_bytes(&mut self, ptr: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.slice_mut(ptr, data.len() as u32)?.copy_from_slice(data);
        Ok(())
    }

    /// Copy bytes within memory (`memmove` semantics)
    pub fn copy_within(&mut self, src: u32, dst: u32, len: u32) -> Result<(), MemoryError> {
        let range = self.check(src, len)?;
        self.check(dst, len)?;
        self.bytes.copy_within(range, dst as usize);
        Ok(())
    }

    pub fn fill(&mut self, ptr: u32, len: u32, value: u8) -> Result<(), MemoryError> {
        self.slice_mut(ptr, len)?.fill(value);
        Ok(())
    }

    pub fn read_u8(&self, addr: u32) -> Result<u8, MemoryError> {
        Ok(self.slice(addr, 1)?[0])
    }

    pub fn read_i32(&self, addr: u32) -> Result<i32, MemoryError> {
        let b = self.slice(addr, 4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn write_i32(&mut self, addr: u32, value: i32) -> Result<(), MemoryError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    pub fn read_f32(&self, addr: u32) -> Result<f32, MemoryError> {
        let b = self.slice(addr, 4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn write_f32(&mut self, addr: u32, value: f32) -> Result<(), MemoryError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    pub fn read_f64(&self, addr: u32) -> Result<f64, MemoryError> {
        let b = self.slice(addr, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_le_bytes(raw))
    }

    pub fn write_f64(&mut self, addr: u32, value: f64) -> Result<(), MemoryError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Raw contents, for snapshots
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write() {
        let mut mem = LinearMemory::new(1, 4);

        mem.write_i32(16, -7).unwrap();
        assert_eq!(mem.read_i32(16).unwrap(), -7);

        mem.write_f64(24, 2.5).unwrap();
        assert_eq!(mem.read_f64(24).unwrap(), 2.5);

        mem.write_bytes(40, b"abc").unwrap();
        assert_eq!(mem.slice(40, 3).unwrap(), b"abc");
    }

    #[test]
    fn test_out_of_bounds() {
        let mem = LinearMemory::new(1, 1);
        let err = mem.read_i32(PAGE_SIZE as u32 - 2).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfBounds { .. }));
    }

    #[test]
    fn test_grow_preserves_contents_and_bumps_generation() {
        let mut mem = LinearMemory::new(1, 4);
        mem.write_i32(8, 42).unwrap();
        let before = mem.generation();

        assert_eq!(mem.grow(2).unwrap(), 1);
        assert_eq!(mem.pages(), 3);
        assert_eq!(mem.read_i32(8).unwrap(), 42);
        assert_eq!(mem.generation(), before + 1);

        // zero-delta growth does not replace the buffer
        mem.grow(0).unwrap();
        assert_eq!(mem.generation(), before + 1);
    }

    #[test]
    fn test_grow_past_maximum() {
        let mut mem = LinearMemory::new(1, 2);
        assert!(matches!(mem.grow(2), Err(MemoryError::OutOfMemory { .. })));
        assert_eq!(mem.pages(), 1);
    }
}
