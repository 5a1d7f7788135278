//! Fixed-width bit packing.
//!
//! Values are packed least-significant bit first into a little-endian byte
//! stream; `width` may be anything from 0 (all values zero) to 64.

/// Number of bits needed to represent `value`.
pub fn bits_required(value: u64) -> u8 {
    (64 - value.leading_zeros()) as u8
}

/// Number of bytes needed to pack `count` values of `width` bits.
pub fn packed_len(count: usize, width: u8) -> usize {
    (count * width as usize).div_ceil(8)
}

/// Pack `values` using `width` bits each. Bits above `width` are dropped.
pub fn pack(values: &[u64], width: u8) -> Vec<u8> {
    let mut out = vec![0u8; packed_len(values.len(), width)];
    if width == 0 {
        return out;
    }

    let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
    let mut bit_pos = 0usize;
    for &value in values {
        let mut remaining = value & mask;
        let mut bits_left = width as usize;
        while bits_left > 0 {
            let byte_idx = bit_pos / 8;
            let bit_off = bit_pos % 8;
            let take = (8 - bit_off).min(bits_left);
            let chunk = (remaining & ((1u64 << take) - 1)) as u8;
            out[byte_idx] |= chunk << bit_off;
            remaining >>= take;
            bits_left -= take;
            bit_pos += take;
        }
    }
    out
}

/// Read the `index`-th packed value, or `None` when `data` is too short.
pub fn unpack_at(data: &[u8], width: u8, index: usize) -> Option<u64> {
    if width == 0 {
        return Some(0);
    }

    let mut bit_pos = index * width as usize;
    if (bit_pos + width as usize).div_ceil(8) > data.len() {
        return None;
    }

    let mut value = 0u64;
    let mut filled = 0usize;
    while filled < width as usize {
        let byte = data[bit_pos / 8];
        let bit_off = bit_pos % 8;
        let take = (8 - bit_off).min(width as usize - filled);
        let chunk = ((byte >> bit_off) as u64) & ((1u64 << take) - 1);
        value |= chunk << filled;
        filled += take;
        bit_pos += take;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_required() {
        assert_eq!(bits_required(0), 0);
        assert_eq!(bits_required(1), 1);
        assert_eq!(bits_required(255), 8);
        assert_eq!(bits_required(256), 9);
        assert_eq!(bits_required(u64::MAX), 64);
    }

    #[test]
    fn test_pack_unpack_odd_width() {
        let values: Vec<u64> = (0..50).map(|v| (v * 37) % 128).collect();
        let packed = pack(&values, 7);
        assert_eq!(packed.len(), packed_len(50, 7));
        for (i, &expected) in values.iter().enumerate() {
            assert_eq!(unpack_at(&packed, 7, i), Some(expected));
        }
        assert_eq!(unpack_at(&packed, 7, 50), None);
    }

    #[test]
    fn test_full_and_zero_width() {
        let values = [u64::MAX, 0, 1 << 63];
        let packed = pack(&values, 64);
        for (i, &expected) in values.iter().enumerate() {
            assert_eq!(unpack_at(&packed, 64, i), Some(expected));
        }
        assert!(pack(&[0, 0, 0], 0).is_empty());
        assert_eq!(unpack_at(&[], 0, 1000), Some(0));
    }
}
