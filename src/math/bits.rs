//! Population counts over occupancy masks

/// Count the set bits of `byte` in the bit range `[offset, offset + count)`.
///
/// Bits past 7 do not exist, so any part of the range beyond the byte counts
/// as zero. `pop_count_bits(mask, 9, 8)` is always 0.
#[inline]
pub fn pop_count_bits(byte: u8, offset: u32, count: u32) -> usize {
    let window = 1u32
        .checked_shl(count)
        .map_or(u32::MAX, |bit| bit - 1)
        .checked_shl(offset)
        .unwrap_or(0);

    (u32::from(byte) & window).count_ones() as usize
}

/// Count the set bits of every byte in `bytes`
pub fn pop_count_slice(bytes: &[u8]) -> usize {
    let mut words = bytes.chunks_exact(8);
    let mut sum: usize = words
        .by_ref()
        .map(|word| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(word);
            u64::from_ne_bytes(buf).count_ones() as usize
        })
        .sum();

    sum += words
        .remainder()
        .iter()
        .map(|byte| byte.count_ones() as usize)
        .sum::<usize>();

    sum
}
