//! Bit addressing over a byte slice.
//!
//! Bits are numbered from zero, most-significant bit first within each byte:
//! bit `i` lives in byte `i / 8` under the mask `0x80 >> (i % 8)`. This ordering
//! is the persistent file format of a file-backed bitmap and must not change.

/// Returns the index of the byte that holds bit `index`.
#[inline(always)]
pub const fn byte_index(index: usize) -> usize {
    index >> 3
}

/// Returns the in-byte mask of bit `index`.
#[inline(always)]
pub const fn bit_mask(index: usize) -> u8 {
    0x80 >> (index & 7)
}

/// Returns the value (0 or 1) of bit `index`.
///
/// # Panics
///
/// Panics if `index / 8` is out of bounds for `bytes`.
#[inline]
pub fn get_bit(bytes: &[u8], index: usize) -> u8 {
    (bytes[byte_index(index)] >> (7 - (index & 7))) & 1
}

/// Sets bit `index` when `value` is nonzero, clears it otherwise.
///
/// # Panics
///
/// Panics if `index / 8` is out of bounds for `bytes`.
#[inline]
pub fn set_bit(bytes: &mut [u8], index: usize, value: u8) {
    let byte = &mut bytes[byte_index(index)];
    let mask = bit_mask(index);
    if value != 0 {
        *byte |= mask;
    } else {
        *byte &= !mask;
    }
}

/// Counts the set bits in `bytes`.
///
/// Mapped regions are page aligned, so the bulk of the work runs over `u64`
/// words; the unaligned head and tail fall back to bytes.
pub fn count_ones(bytes: &[u8]) -> usize {
    let (head, words, tail) = bytemuck::pod_align_to::<u8, u64>(bytes);
    let head: usize = head.iter().map(|b| b.count_ones() as usize).sum();
    let tail: usize = tail.iter().map(|b| b.count_ones() as usize).sum();
    let body: usize = words.iter().map(|w| w.count_ones() as usize).sum();
    head + body + tail
}
