//! Pack attributes: the sub attributes of a document stored as one blob.
//!
//! A blob is the concatenation of its sub attribute values in configuration
//! order, each prefixed by its varint length.

use crate::attribute::codec::{decode_value, default_value, encode_value};
use crate::config::PackAttributeConfig;
use crate::document::{Document, FieldValue};
use crate::error::{IndexlibError, Result};
use crate::util::varint::{decode_u64, encode_u64_into};

/// Encode the pack blob of `doc`. Missing fields take their default value.
pub fn encode_pack(pack: &PackAttributeConfig, doc: &Document) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for sub in &pack.sub_attributes {
        let value = match doc.field(&sub.name) {
            Some(v) => encode_value(sub, v)?,
            None => default_value(sub),
        };
        encode_u64_into(value.len() as u64, &mut out);
        out.extend_from_slice(&value);
    }
    Ok(out)
}

fn split(pack: &PackAttributeConfig, blob: &[u8]) -> Result<Vec<(usize, usize)>> {
    let mut ranges = Vec::with_capacity(pack.sub_attributes.len());
    let mut pos = 0usize;
    for _ in &pack.sub_attributes {
        let (len, read) = decode_u64(&blob[pos..])?;
        let start = pos + read;
        let end = start
            .checked_add(len as usize)
            .filter(|&end| end <= blob.len())
            .ok_or_else(|| {
                IndexlibError::index_collapsed(format!("truncated pack attribute [{}]", pack.name))
            })?;
        ranges.push((start, end));
        pos = end;
    }
    Ok(ranges)
}

/// Decode every sub attribute of a blob.
pub fn decode_pack(pack: &PackAttributeConfig, blob: &[u8]) -> Result<Vec<(String, FieldValue)>> {
    split(pack, blob)?
        .into_iter()
        .zip(&pack.sub_attributes)
        .map(|((start, end), sub)| Ok((sub.name.clone(), decode_value(sub, &blob[start..end])?)))
        .collect()
}

/// Decode one sub attribute of a blob.
pub fn decode_sub_value(
    pack: &PackAttributeConfig,
    blob: &[u8],
    name: &str,
) -> Result<Option<FieldValue>> {
    let Some(idx) = pack.sub_attributes.iter().position(|s| s.name == name) else {
        return Ok(None);
    };
    let (start, end) = split(pack, blob)?[idx];
    decode_value(&pack.sub_attributes[idx], &blob[start..end]).map(Some)
}
