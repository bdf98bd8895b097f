//! Typed views over linear memory
//!
//! A view remembers the buffer generation it was created under. Once memory
//! grows the view reports a byte length of zero, exactly like a typed array
//! over a detached `ArrayBuffer`, and every access through it fails.
//! `ViewCache` hands out cached views and rebuilds them on that signal.

use std::marker::PhantomData;

use super::LinearMemory;
use crate::error::MemoryError;

/// Element types a view can be typed as (all little endian)
pub trait ViewElement: Copy {
    const WIDTH: usize;

    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut [u8]);
}

impl ViewElement for u8 {
    const WIDTH: usize = 1;

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn write_le(self, out: &mut [u8]) {
        out[0] = self;
    }
}

impl ViewElement for i32 {
    const WIDTH: usize = 4;

    fn read_le(bytes: &[u8]) -> Self {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write_le(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }
}

impl ViewElement for f32 {
    const WIDTH: usize = 4;

    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write_le(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }
}

impl ViewElement for f64 {
    const WIDTH: usize = 8;

    fn read_le(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        f64::from_le_bytes(raw)
    }

    fn write_le(self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.to_le_bytes());
    }
}

/// A typed window over the whole of linear memory
#[derive(Debug, Clone, Copy)]
pub struct View<T> {
    generation: u64,
    byte_len: usize,
    _marker: PhantomData<T>,
}

impl<T: ViewElement> View<T> {
    /// Create a view over the current buffer
    pub fn over(mem: &LinearMemory) -> Self {
        View {
            generation: mem.generation(),
            byte_len: mem.size(),
            _marker: PhantomData,
        }
    }

    /// Byte length as seen through this view; zero once detached
    pub fn byte_length(&self, mem: &LinearMemory) -> usize {
        if self.generation == mem.generation() {
            self.byte_len
        } else {
            0
        }
    }

    /// Number of elements visible through this view
    pub fn len(&self, mem: &LinearMemory) -> usize {
        self.byte_length(mem) / T::WIDTH
    }

    pub fn is_detached(&self, mem: &LinearMemory) -> bool {
        self.generation != mem.generation()
    }

    fn byte_range(
        &self,
        mem: &LinearMemory,
        index: usize,
        count: usize,
    ) -> Result<std::ops::Range<usize>, MemoryError> {
        if self.is_detached(mem) {
            return Err(MemoryError::Detached);
        }
        let start = index * T::WIDTH;
        let end = start + count * T::WIDTH;
        if end > self.byte_len {
            return Err(MemoryError::OutOfBounds {
                ptr: start as u32,
                len: (count * T::WIDTH) as u32,
                size: self.byte_len,
            });
        }
        Ok(start..end)
    }

    /// Element at `index` (an element index, not a byte address)
    pub fn get(&self, mem: &LinearMemory, index: usize) -> Result<T, MemoryError> {
        let range = self.byte_range(mem, index, 1)?;
        Ok(T::read_le(mem.slice(range.start as u32, T::WIDTH as u32)?))
    }

    pub fn set(&self, mem: &mut LinearMemory, index: usize, value: T) -> Result<(), MemoryError> {
        let range = self.byte_range(mem, index, 1)?;
        value.write_le(mem.slice_mut(range.start as u32, T::WIDTH as u32)?);
        Ok(())
    }

    /// Copy out `count` elements starting at element `index`
    pub fn read(&self, mem: &LinearMemory, index: usize, count: usize) -> Result<Vec<T>, MemoryError> {
        let range = self.byte_range(mem, index, count)?;
        let bytes = mem.slice(range.start as u32, (range.end - range.start) as u32)?;
        Ok(bytes.chunks_exact(T::WIDTH).map(T::read_le).collect())
    }

    /// Copy `values` in starting at element `index` (`TypedArray.set(src, offset)`)
    pub fn write(&self, mem: &mut LinearMemory, index: usize, values: &[T]) -> Result<(), MemoryError> {
        let range = self.byte_range(mem, index, values.len())?;
        let bytes = mem.slice_mut(range.start as u32, (range.end - range.start) as u32)?;
        for (chunk, value) in bytes.chunks_exact_mut(T::WIDTH).zip(values) {
            value.write_le(chunk);
        }
        Ok(())
    }
}

impl View<u8> {
    /// Borrow bytes `start..end` without copying
    pub fn subarray<'m>(
        &self,
        mem: &'m LinearMemory,
        start: usize,
        end: usize,
    ) -> Result<&'m [u8], MemoryError> {
        let range = self.byte_range(mem, start, end.saturating_sub(start))?;
        mem.slice(range.start as u32, (range.end - range.start) as u32)
    }
}

/// Lazily rebuilt views, one per element type
#[derive(Debug, Default)]
pub struct ViewCache {
    bytes: Option<View<u8>>,
    ints: Option<View<i32>>,
    floats32: Option<View<f32>>,
    floats64: Option<View<f64>>,
    rebuilds: u64,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn fetch<T: ViewElement>(
        slot: &mut Option<View<T>>,
        rebuilds: &mut u64,
        mem: &LinearMemory,
    ) -> View<T> {
        match slot {
            Some(view) if view.byte_length(mem) != 0 => *view,
            _ => {
                let view = View::over(mem);
                *slot = Some(view);
                *rebuilds += 1;
                view
            }
        }
    }

    pub fn bytes(&mut self, mem: &LinearMemory) -> View<u8> {
        Self::fetch(&mut self.bytes, &mut self.rebuilds, mem)
    }

    pub fn ints(&mut self, mem: &LinearMemory) -> View<i32> {
        Self::fetch(&mut self.ints, &mut self.rebuilds, mem)
    }

    pub fn floats32(&mut self, mem: &LinearMemory) -> View<f32> {
        Self::fetch(&mut self.floats32, &mut self.rebuilds, mem)
    }

    pub fn floats64(&mut self, mem: &LinearMemory) -> View<f64> {
        Self::fetch(&mut self.floats64, &mut self.rebuilds, mem)
    }

    /// How many times a view had to be (re)created
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PAGE_SIZE;

    #[test]
    fn test_typed_access() {
        let mut mem = LinearMemory::new(1, 2);
        let ints = View::<i32>::over(&mem);
        ints.set(&mut mem, 3, 0x1234_5678).unwrap();
        assert_eq!(mem.read_i32(12).unwrap(), 0x1234_5678);

        let floats = View::<f64>::over(&mem);
        floats.write(&mut mem, 4, &[1.5, -2.0]).unwrap();
        assert_eq!(floats.read(&mem, 4, 2).unwrap(), vec![1.5, -2.0]);
        assert_eq!(mem.read_f64(40).unwrap(), -2.0);
    }

    #[test]
    fn test_view_detaches_on_growth() {
        let mut mem = LinearMemory::new(1, 4);
        let stale = View::<u8>::over(&mem);
        assert_eq!(stale.byte_length(&mem), PAGE_SIZE);

        mem.grow(1).unwrap();

        assert_eq!(stale.byte_length(&mem), 0);
        assert_eq!(stale.get(&mem, 0), Err(MemoryError::Detached));

        let fresh = View::<u8>::over(&mem);
        assert_eq!(fresh.byte_length(&mem), 2 * PAGE_SIZE);
        assert_eq!(fresh.len(&mem), 2 * PAGE_SIZE);
    }

    #[test]
    fn test_cache_revalidates_after_growth() {
        let mut mem = LinearMemory::new(1, 4);
        let mut cache = ViewCache::new();

        let first = cache.floats32(&mem);
        let again = cache.floats32(&mem);
        assert_eq!(cache.rebuilds(), 1);
        assert_eq!(first.len(&mem), again.len(&mem));

        mem.grow(1).unwrap();
        assert!(first.is_detached(&mem));

        let rebuilt = cache.floats32(&mem);
        assert_eq!(cache.rebuilds(), 2);
        assert_eq!(rebuilt.len(&mem), 2 * PAGE_SIZE / 4);
    }

    #[test]
    fn test_subarray_bounds() {
        let mut mem = LinearMemory::new(1, 1);
        mem.write_bytes(100, b"hello").unwrap();
        let bytes = View::<u8>::over(&mem);
        assert_eq!(bytes.subarray(&mem, 100, 105).unwrap(), b"hello");
        assert!(bytes.subarray(&mem, PAGE_SIZE - 1, PAGE_SIZE + 1).is_err());
    }
}
