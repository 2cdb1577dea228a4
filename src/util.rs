//! Byte-level helpers shared by the Mach-O reader and the kernelcache decoders.
//!
//! This module provides:
//! - Unaligned little-endian reads (using byteorder for optimal codegen)
//! - SIMD-accelerated byte searches (via memchr)
//! - Packed pointer-array iteration

use byteorder::{ByteOrder, LittleEndian};

// =============================================================================
// Fast Unaligned Reads
// =============================================================================

/// Reads a little-endian u64 from an unaligned byte slice.
///
/// # Panics
///
/// Panics if `data.len() < 8`.
#[inline(always)]
pub fn read_u64_le(data: &[u8]) -> u64 {
    LittleEndian::read_u64(data)
}

/// Reads a little-endian u64 from a byte slice at the given offset.
///
/// # Panics
///
/// Panics if `offset + 8 > data.len()`.
#[inline(always)]
pub fn read_u64_le_at(data: &[u8], offset: usize) -> u64 {
    LittleEndian::read_u64(&data[offset..])
}

/// Reads a little-endian u32 from a byte slice at the given offset.
///
/// # Panics
///
/// Panics if `offset + 4 > data.len()`.
#[inline(always)]
pub fn read_u32_le_at(data: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&data[offset..])
}

/// Reads a little-endian i32 from a byte slice at the given offset.
///
/// # Panics
///
/// Panics if `offset + 4 > data.len()`.
#[inline(always)]
pub fn read_i32_le_at(data: &[u8], offset: usize) -> i32 {
    LittleEndian::read_i32(&data[offset..])
}

// =============================================================================
// SIMD-Accelerated Byte Search
// =============================================================================

/// Finds the position of the first null byte in a slice.
///
/// Returns `data.len()` when there is no terminator.
#[inline(always)]
pub fn memchr_null(data: &[u8]) -> usize {
    memchr::memchr(0, data).unwrap_or(data.len())
}

/// Returns the offsets of every occurrence of `needle` in `haystack`.
pub fn find_all(needle: &[u8], haystack: &[u8]) -> Vec<usize> {
    memchr::memmem::find_iter(haystack, needle).collect()
}

/// Strips trailing NUL bytes from a buffer.
#[inline]
pub fn trim_trailing_nuls(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &data[..end]
}

/// Decodes a fixed-width, NUL-padded C string field.
pub fn fixed_cstr(field: &[u8]) -> String {
    String::from_utf8_lossy(&field[..memchr_null(field)]).into_owned()
}

// =============================================================================
// Packed Pointer Arrays
// =============================================================================

/// Iterates a packed array of little-endian u64 values.
///
/// Trailing bytes that do not fill a whole entry are ignored.
#[inline]
pub fn packed_u64s(data: &[u8]) -> impl Iterator<Item = u64> + '_ {
    data.chunks_exact(8).map(read_u64_le)
}

/// Aligns a value up to the given power-of-two alignment.
#[inline(always)]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u64_le() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_u64_le(&data), 0x0807060504030201);
    }

    #[test]
    fn test_read_i32_le_at() {
        let data = [0xAA, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(read_i32_le_at(&data, 1), -1);
    }

    #[test]
    fn test_memchr_null() {
        assert_eq!(memchr_null(b"hello\0world"), 5);
        assert_eq!(memchr_null(b"\0"), 0);
        assert_eq!(memchr_null(b"hello"), 5);
    }

    #[test]
    fn test_find_all() {
        let data = [0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x80];
        assert_eq!(find_all(&[0x00, 0x80], &data), vec![1, 4]);
        assert!(find_all(&[0x00, 0x80], &[0x80, 0x00]).is_empty());
    }

    #[test]
    fn test_trim_trailing_nuls() {
        assert_eq!(trim_trailing_nuls(b"abc\0\0\0"), b"abc");
        assert_eq!(trim_trailing_nuls(b"a\0c"), b"a\0c");
        assert_eq!(trim_trailing_nuls(b"\0\0"), b"");
        assert_eq!(trim_trailing_nuls(b""), b"");
    }

    #[test]
    fn test_fixed_cstr() {
        let mut field = [0u8; 16];
        field[..5].copy_from_slice(b"hello");
        assert_eq!(fixed_cstr(&field), "hello");
        assert_eq!(fixed_cstr(b"full"), "full");
    }

    #[test]
    fn test_packed_u64s() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u64.to_le_bytes());
        data.extend_from_slice(&0xFFFF_0000_0000_0002u64.to_le_bytes());
        data.extend_from_slice(&[0xAA, 0xBB]);
        let values: Vec<u64> = packed_u64s(&data).collect();
        assert_eq!(values, vec![1, 0xFFFF_0000_0000_0002]);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(0x1001, 0x1000), 0x2000);
    }
}
