//! Equal-value compression for offset arrays.
//!
//! Values are grouped into slots of [`SLOT_ITEM_COUNT`]. Each slot stores its
//! minimum as a base and every value as a bit-packed delta from that base, so
//! a slot of equal values costs only its header. The encoded buffer ends in a
//! little-endian magic word naming the element width; readers use it to tell
//! a compressed offset file from a raw one.
//!
//! Layout:
//!
//! ```text
//! u32 item_count | u32 slot_count
//! slot_count x (base: u32|u64, width: u8, packed_offset: u32)
//! packed deltas
//! u32 tail magic
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{IndexlibError, Result};
use crate::util::bits;

pub const UINT32_OFFSET_TAIL_MAGIC: u32 = 0xF2F3_F4F5;
pub const UINT64_OFFSET_TAIL_MAGIC: u32 = 0xF3F4_F5F6;

pub const SLOT_ITEM_COUNT: usize = 64;

const TAIL_LEN: usize = 4;

/// Element width recorded by the tail magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetWidth {
    U32,
    U64,
}

impl OffsetWidth {
    fn base_len(self) -> usize {
        match self {
            OffsetWidth::U32 => 4,
            OffsetWidth::U64 => 8,
        }
    }

    fn magic(self) -> u32 {
        match self {
            OffsetWidth::U32 => UINT32_OFFSET_TAIL_MAGIC,
            OffsetWidth::U64 => UINT64_OFFSET_TAIL_MAGIC,
        }
    }
}

/// The width named by the tail magic of `data`, if it carries one.
pub fn tail_magic(data: &[u8]) -> Option<OffsetWidth> {
    if data.len() < TAIL_LEN {
        return None;
    }
    match LittleEndian::read_u32(&data[data.len() - TAIL_LEN..]) {
        UINT32_OFFSET_TAIL_MAGIC => Some(OffsetWidth::U32),
        UINT64_OFFSET_TAIL_MAGIC => Some(OffsetWidth::U64),
        _ => None,
    }
}

fn compress(values: &[u64], width: OffsetWidth) -> Vec<u8> {
    let slots: Vec<&[u64]> = values.chunks(SLOT_ITEM_COUNT).collect();
    let mut headers = Vec::with_capacity(slots.len() * (width.base_len() + 5));
    let mut packed = Vec::new();

    for slot in &slots {
        let base = slot.iter().copied().min().unwrap_or(0);
        let max_delta = slot.iter().map(|v| v - base).max().unwrap_or(0);
        let bit_width = bits::bits_required(max_delta);
        let deltas: Vec<u64> = slot.iter().map(|v| v - base).collect();

        match width {
            OffsetWidth::U32 => headers.extend_from_slice(&(base as u32).to_le_bytes()),
            OffsetWidth::U64 => headers.extend_from_slice(&base.to_le_bytes()),
        }
        headers.push(bit_width);
        headers.extend_from_slice(&(packed.len() as u32).to_le_bytes());
        packed.extend_from_slice(&bits::pack(&deltas, bit_width));
    }

    let mut out = Vec::with_capacity(8 + headers.len() + packed.len() + TAIL_LEN);
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    out.extend_from_slice(&(slots.len() as u32).to_le_bytes());
    out.extend_from_slice(&headers);
    out.extend_from_slice(&packed);
    out.extend_from_slice(&width.magic().to_le_bytes());
    out
}

pub fn compress_u32(values: &[u32]) -> Vec<u8> {
    let widened: Vec<u64> = values.iter().map(|&v| v as u64).collect();
    compress(&widened, OffsetWidth::U32)
}

pub fn compress_u64(values: &[u64]) -> Vec<u8> {
    compress(values, OffsetWidth::U64)
}

#[derive(Debug, Clone)]
struct Slot {
    base: u64,
    width: u8,
    packed_offset: usize,
}

/// Random access over a buffer produced by [`compress_u32`] or [`compress_u64`].
#[derive(Debug, Clone)]
pub struct EqualValueCompressReader {
    width: OffsetWidth,
    item_count: usize,
    slots: Vec<Slot>,
    packed: Vec<u8>,
}

impl EqualValueCompressReader {
    /// Parse a compressed buffer. Fails unless it ends in a known tail magic.
    pub fn open(data: &[u8]) -> Result<Self> {
        let width = tail_magic(data).ok_or_else(|| {
            IndexlibError::index_collapsed("offset data is not equal-value compressed")
        })?;
        let body = &data[..data.len() - TAIL_LEN];
        let truncated = || IndexlibError::index_collapsed("truncated equal-value compressed data");

        if body.len() < 8 {
            return Err(truncated());
        }
        let item_count = LittleEndian::read_u32(&body[0..4]) as usize;
        let slot_count = LittleEndian::read_u32(&body[4..8]) as usize;
        if slot_count != item_count.div_ceil(SLOT_ITEM_COUNT) {
            return Err(IndexlibError::index_collapsed(format!(
                "slot count [{slot_count}] does not match item count [{item_count}]"
            )));
        }

        let header_len = width.base_len() + 5;
        let headers_end = slot_count
            .checked_mul(header_len)
            .and_then(|len| len.checked_add(8))
            .filter(|&end| end <= body.len())
            .ok_or_else(truncated)?;

        let mut slots = Vec::with_capacity(slot_count);
        let mut pos = 8;
        for _ in 0..slot_count {
            let base = match width {
                OffsetWidth::U32 => LittleEndian::read_u32(&body[pos..]) as u64,
                OffsetWidth::U64 => LittleEndian::read_u64(&body[pos..]),
            };
            pos += width.base_len();
            let bit_width = body[pos];
            let packed_offset = LittleEndian::read_u32(&body[pos + 1..]) as usize;
            pos += 5;
            if bit_width > 64 {
                return Err(IndexlibError::index_collapsed(format!(
                    "invalid slot bit width [{bit_width}]"
                )));
            }
            slots.push(Slot {
                base,
                width: bit_width,
                packed_offset,
            });
        }

        let packed = body[headers_end..].to_vec();
        let reader = EqualValueCompressReader {
            width,
            item_count,
            slots,
            packed,
        };
        if item_count > 0 && reader.get(item_count - 1).is_none() {
            return Err(truncated());
        }
        Ok(reader)
    }

    pub fn width(&self) -> OffsetWidth {
        self.width
    }

    pub fn len(&self) -> usize {
        self.item_count
    }

    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        if index >= self.item_count {
            return None;
        }
        let slot = self.slots.get(index / SLOT_ITEM_COUNT)?;
        let packed = self.packed.get(slot.packed_offset..)?;
        let delta = bits::unpack_at(packed, slot.width, index % SLOT_ITEM_COUNT)?;
        slot.base.checked_add(delta)
    }

    pub fn to_vec(&self) -> Vec<u64> {
        (0..self.item_count).filter_map(|i| self.get(i)).collect()
    }
}
