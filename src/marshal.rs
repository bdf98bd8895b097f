//! Value marshaling between host values and module memory
//!
//! Allocation goes through the module's allocator (`Store::malloc` and
//! friends), which may grow memory. Views are therefore always fetched from
//! the cache after the last allocator call, never held across one.
//!
//! Ownership: a string or buffer passed to the module belongs to the module,
//! which frees it. A string the module returns belongs to the host, which
//! frees it once decoded.

use crate::config::StringEncoding;
use crate::error::{MarshalError, MemoryError, Trap};
use crate::store::Store;

fn check_aligned(ptr: u32, align: u32) -> Result<(), MemoryError> {
    if ptr % align != 0 {
        return Err(MemoryError::Misaligned { ptr, align });
    }
    Ok(())
}

/// Copy `s` into a fresh module allocation and return `(ptr, len)` in bytes
pub fn pass_string(cx: &mut Store, s: &str) -> Result<(u32, u32), MemoryError> {
    match cx.config().string_encoding {
        StringEncoding::Bulk => pass_string_bulk(cx, s),
        StringEncoding::Incremental => pass_string_incremental(cx, s),
    }
}

fn pass_string_bulk(cx: &mut Store, s: &str) -> Result<(u32, u32), MemoryError> {
    let len = s.len() as u32;
    let ptr = cx.malloc(len, 1)?;
    let bytes = cx.bytes();
    bytes.write(cx.memory_mut(), ptr as usize, s.as_bytes())?;
    Ok((ptr, len))
}

/// Optimistic encoder: sized for the all-ASCII case
///
/// Allocates one byte per UTF-16 unit and copies the ASCII prefix directly.
/// At the first wider character the block is grown to fit the worst case of
/// three bytes per remaining unit, the rest is encoded, and the block is
/// shrunk back to what was written.
fn pass_string_incremental(cx: &mut Store, s: &str) -> Result<(u32, u32), MemoryError> {
    let mut len = s.encode_utf16().count() as u32;
    let mut ptr = cx.malloc(len, 1)?;

    let ascii = s.bytes().take_while(|b| b.is_ascii()).count();
    let bytes = cx.bytes();
    bytes.write(cx.memory_mut(), ptr as usize, &s.as_bytes()[..ascii])?;
    let mut offset = ascii as u32;

    if offset != len {
        let rest = &s[ascii..];
        let remaining = len - offset;
        let grown = offset + remaining * 3;
        ptr = cx.realloc(ptr, len, grown, 1)?;
        len = grown;

        let bytes = cx.bytes();
        bytes.write(cx.memory_mut(), (ptr + offset) as usize, rest.as_bytes())?;
        offset += rest.len() as u32;
        ptr = cx.realloc(ptr, len, offset, 1)?;
    }
    Ok((ptr, offset))
}

/// Strict UTF-8 decode of `len` bytes at `ptr`
pub fn read_string(cx: &mut Store, ptr: u32, len: u32) -> Result<String, Trap> {
    let bytes = cx.bytes();
    let raw = bytes.subarray(cx.memory(), ptr as usize, ptr as usize + len as usize)?;
    match std::str::from_utf8(raw) {
        Ok(s) => Ok(s.to_string()),
        Err(e) => Err(MarshalError::InvalidUtf8 { ptr, len, valid_up_to: e.valid_up_to() }.into()),
    }
}

/// Decode a string the module handed over and free its memory
pub fn take_string(cx: &mut Store, ptr: u32, len: u32) -> Result<String, Trap> {
    let s = read_string(cx, ptr, len);
    cx.free(ptr, len, 1)?;
    s
}

pub fn pass_f64_slice(cx: &mut Store, values: &[f64]) -> Result<(u32, u32), MemoryError> {
    let ptr = cx.malloc((values.len() * 8) as u32, 8)?;
    let floats = cx.floats64();
    floats.write(cx.memory_mut(), (ptr / 8) as usize, values)?;
    Ok((ptr, values.len() as u32))
}

pub fn pass_f32_slice(cx: &mut Store, values: &[f32]) -> Result<(u32, u32), MemoryError> {
    let ptr = cx.malloc((values.len() * 4) as u32, 4)?;
    let floats = cx.floats32();
    floats.write(cx.memory_mut(), (ptr / 4) as usize, values)?;
    Ok((ptr, values.len() as u32))
}

pub fn pass_i32_slice(cx: &mut Store, values: &[i32]) -> Result<(u32, u32), MemoryError> {
    let ptr = cx.malloc((values.len() * 4) as u32, 4)?;
    let ints = cx.ints();
    ints.write(cx.memory_mut(), (ptr / 4) as usize, values)?;
    Ok((ptr, values.len() as u32))
}

/// Copy out `len` f32 elements at `ptr`
pub fn read_f32_slice(cx: &mut Store, ptr: u32, len: u32) -> Result<Vec<f32>, MemoryError> {
    check_aligned(ptr, 4)?;
    let floats = cx.floats32();
    floats.read(cx.memory(), (ptr / 4) as usize, len as usize)
}

pub fn read_f64_slice(cx: &mut Store, ptr: u32, len: u32) -> Result<Vec<f64>, MemoryError> {
    check_aligned(ptr, 8)?;
    let floats = cx.floats64();
    floats.read(cx.memory(), (ptr / 8) as usize, len as usize)
}

pub fn read_u8_slice(cx: &mut Store, ptr: u32, len: u32) -> Result<Vec<u8>, MemoryError> {
    let bytes = cx.bytes();
    Ok(bytes.subarray(cx.memory(), ptr as usize, ptr as usize + len as usize)?.to_vec())
}

/// `i32` words at a return slot
pub fn read_words(cx: &mut Store, retptr: u32, count: u32) -> Result<Vec<i32>, MemoryError> {
    check_aligned(retptr, 4)?;
    let ints = cx.ints();
    ints.read(cx.memory(), (retptr / 4) as usize, count as usize)
}

pub fn write_words(cx: &mut Store, retptr: u32, words: &[i32]) -> Result<(), MemoryError> {
    check_aligned(retptr, 4)?;
    let ints = cx.ints();
    ints.write(cx.memory_mut(), (retptr / 4) as usize, words)
}

/// Optional number out-param: presence flag at `retptr`, value at `retptr + 8`
pub fn write_opt_f64(cx: &mut Store, retptr: u32, value: Option<f64>) -> Result<(), MemoryError> {
    check_aligned(retptr, 8)?;
    let floats = cx.floats64();
    floats.set(cx.memory_mut(), (retptr / 8 + 1) as usize, value.unwrap_or(0.0))?;
    let ints = cx.ints();
    ints.set(cx.memory_mut(), (retptr / 4) as usize, value.is_some() as i32)
}

pub fn read_opt_f64(cx: &mut Store, retptr: u32) -> Result<Option<f64>, MemoryError> {
    check_aligned(retptr, 8)?;
    let ints = cx.ints();
    if ints.get(cx.memory(), (retptr / 4) as usize)? == 0 {
        return Ok(None);
    }
    let floats = cx.floats64();
    floats.get(cx.memory(), (retptr / 8 + 1) as usize).map(Some)
}

/// Optional string out-param: `(ptr, len)` at `retptr`, a zero pointer meaning absent
///
/// A present string is a fresh allocation the module takes ownership of.
pub fn write_opt_string(cx: &mut Store, retptr: u32, value: Option<&str>) -> Result<(), MemoryError> {
    let (ptr, len) = match value {
        Some(s) => pass_string(cx, s)?,
        None => (0, 0),
    };
    write_words(cx, retptr, &[ptr as i32, len as i32])
}

/// Module side of `write_opt_string`: decode and free
pub fn read_opt_string(cx: &mut Store, retptr: u32) -> Result<Option<String>, Trap> {
    let words = read_words(cx, retptr, 2)?;
    let (ptr, len) = (words[0] as u32, words[1] as u32);
    if ptr == 0 {
        return Ok(None);
    }
    take_string(cx, ptr, len).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;

    fn store(encoding: StringEncoding) -> Store {
        Store::new(BridgeConfig {
            string_encoding: encoding,
            ..BridgeConfig::default()
        })
    }

    const SAMPLES: &[&str] = &["", "circle", "Ω field", "ääx", "e\u{301}", "ab😀", "😀😀"];

    #[test]
    fn test_string_round_trip_both_strategies() {
        for encoding in [StringEncoding::Bulk, StringEncoding::Incremental] {
            let mut cx = store(encoding);
            for s in SAMPLES {
                let (ptr, len) = pass_string(&mut cx, s).unwrap();
                assert_eq!(len as usize, s.len(), "{:?} {:?}", encoding, s);
                assert_eq!(read_string(&mut cx, ptr, len).unwrap(), *s);
                cx.free(ptr, len, 1).unwrap();
            }
            assert_eq!(cx.stats().live_allocations, 0, "{:?}", encoding);
        }
    }

    #[test]
    fn test_incremental_shrinks_to_written_length() {
        let mut cx = store(StringEncoding::Incremental);
        let (ptr, len) = pass_string(&mut cx, "abΩ").unwrap();
        assert_eq!(len, 4);
        assert_eq!(cx.stats().live_allocations, 1);
        // block was shrunk back to 4 bytes, rounded up to the allocator's granularity
        assert_eq!(cx.stats().live_bytes, 8);
        take_string(&mut cx, ptr, len).unwrap();
        assert_eq!(cx.stats().live_allocations, 0);
    }

    #[test]
    fn test_invalid_utf8_is_fatal() {
        let mut cx = store(StringEncoding::Bulk);
        let ptr = cx.malloc(3, 1).unwrap();
        cx.memory_mut().write_bytes(ptr, &[b'o', 0xff, b'k']).unwrap();
        match read_string(&mut cx, ptr, 3) {
            Err(Trap::Marshal(MarshalError::InvalidUtf8 { valid_up_to, .. })) => assert_eq!(valid_up_to, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_numeric_slices() {
        let mut cx = store(StringEncoding::Bulk);
        let (ptr, len) = pass_f64_slice(&mut cx, &[100.0, 200.5]).unwrap();
        assert_eq!(ptr % 8, 0);
        assert_eq!(read_f64_slice(&mut cx, ptr, len).unwrap(), vec![100.0, 200.5]);

        let (ptr, len) = pass_f32_slice(&mut cx, &[0.25, -1.0, 3.0]).unwrap();
        assert_eq!(read_f32_slice(&mut cx, ptr, len).unwrap(), vec![0.25, -1.0, 3.0]);

        let (ptr, len) = pass_i32_slice(&mut cx, &[-1, 7]).unwrap();
        assert_eq!(read_u8_slice(&mut cx, ptr, 4).unwrap(), vec![0xff; 4]);
        assert_eq!(read_words(&mut cx, ptr, len).unwrap(), vec![-1, 7]);

        assert_eq!(
            read_f64_slice(&mut cx, ptr + 4, 1),
            Err(MemoryError::Misaligned { ptr: ptr + 4, align: 8 })
        );
    }

    #[test]
    fn test_empty_slice_allocates_nothing() {
        let mut cx = store(StringEncoding::Bulk);
        let (ptr, len) = pass_f64_slice(&mut cx, &[]).unwrap();
        assert_eq!((ptr, len), (8, 0));
        assert!(read_f64_slice(&mut cx, ptr, len).unwrap().is_empty());
        assert_eq!(cx.stats().live_allocations, 0);
    }

    #[test]
    fn test_optional_out_params() {
        let mut cx = store(StringEncoding::Incremental);
        let retptr = cx.add_to_stack_pointer(-16).unwrap();

        write_opt_f64(&mut cx, retptr, Some(16.6)).unwrap();
        assert_eq!(read_opt_f64(&mut cx, retptr).unwrap(), Some(16.6));
        write_opt_f64(&mut cx, retptr, None).unwrap();
        assert_eq!(read_opt_f64(&mut cx, retptr).unwrap(), None);

        write_opt_string(&mut cx, retptr, Some("dipole")).unwrap();
        assert_eq!(read_opt_string(&mut cx, retptr).unwrap().as_deref(), Some("dipole"));
        write_opt_string(&mut cx, retptr, None).unwrap();
        assert_eq!(read_opt_string(&mut cx, retptr).unwrap(), None);

        assert_eq!(cx.stats().live_allocations, 0);
        cx.add_to_stack_pointer(16).unwrap();
    }

    #[test]
    fn test_strings_survive_memory_growth() {
        let mut cx = store(StringEncoding::Incremental);
        let stale = cx.bytes();
        let pages = cx.memory().pages();
        let long = "Ω".repeat(pages as usize * 65536);
        let (ptr, len) = pass_string(&mut cx, &long).unwrap();
        assert!(stale.is_detached(cx.memory()));
        assert_eq!(read_string(&mut cx, ptr, len).unwrap(), long);
    }
}
