//! LEB128-style variable-length integer encoding.
//!
//! Seven payload bits per byte, low group first, high bit set on every byte
//! but the last. Used for lengths, counts and delta-encoded doc id lists.

use crate::error::{IndexlibError, Result};

/// Append the encoding of `value` to `out`, returning the number of bytes written.
pub fn encode_u64_into(value: u64, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    let mut val = value;
    loop {
        let byte = (val & 0x7F) as u8;
        val >>= 7;
        if val == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out.len() - start
}

/// Encode a u64 value.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(10);
    encode_u64_into(value, &mut bytes);
    bytes
}

/// Encode a u32 value.
pub fn encode_u32(value: u32) -> Vec<u8> {
    encode_u64(value as u64)
}

/// Decode a u64 value, returning it with the number of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0u32;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 || (shift == 63 && byte & 0x7E != 0) {
            return Err(IndexlibError::index_collapsed("varint overflow"));
        }
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
    }

    Err(IndexlibError::index_collapsed("incomplete varint"))
}

/// Decode a u32 value, returning it with the number of bytes consumed.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, read) = decode_u64(bytes)?;
    let value = u32::try_from(value)
        .map_err(|_| IndexlibError::index_collapsed(format!("varint {value} exceeds u32")))?;
    Ok((value, read))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        for value in [0u64, 1, 127, 128, 255, 16383, 16384, u32::MAX as u64, u64::MAX] {
            let encoded = encode_u64(value);
            let (decoded, read) = decode_u64(&encoded).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(read, encoded.len());
        }
    }

    #[test]
    fn test_encoding_lengths() {
        assert_eq!(encode_u32(0).len(), 1);
        assert_eq!(encode_u32(127).len(), 1);
        assert_eq!(encode_u32(128).len(), 2);
        assert_eq!(encode_u32(16384).len(), 3);
        assert_eq!(encode_u32(u32::MAX).len(), 5);
        assert_eq!(encode_u64(u64::MAX).len(), 10);
    }

    #[test]
    fn test_decode_errors() {
        assert!(decode_u64(&[0x80]).is_err());
        assert!(decode_u64(&[0xFF; 11]).is_err());
        assert!(decode_u32(&encode_u64(u32::MAX as u64 + 1)).is_err());
    }

    #[test]
    fn test_decode_stops_at_terminator() {
        let mut buffer = Vec::new();
        encode_u64_into(300, &mut buffer);
        encode_u64_into(5, &mut buffer);
        let (first, read) = decode_u64(&buffer).unwrap();
        assert_eq!(first, 300);
        assert_eq!(decode_u64(&buffer[read..]).unwrap(), (5, 1));
    }
}
