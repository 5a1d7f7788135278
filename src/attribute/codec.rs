//! Binary encoding of attribute values.
//!
//! Numeric elements are little-endian at the width of their [`FieldType`].
//! A single string is its UTF-8 bytes. Multi values are a varint element
//! count followed by the elements; multi-string elements carry a varint
//! length prefix.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::config::{AttributeConfig, FieldType};
use crate::document::FieldValue;
use crate::error::{IndexlibError, Result};
use crate::util::varint::{decode_u64, encode_u64_into};

fn mismatch(config: &AttributeConfig, value: &FieldValue) -> IndexlibError {
    IndexlibError::bad_parameter(format!(
        "value {value:?} does not fit attribute [{}] of type {:?}",
        config.name, config.field_type
    ))
}

fn as_i128(value: &FieldValue) -> Option<i128> {
    match value {
        FieldValue::Int(v) => Some(*v as i128),
        FieldValue::UInt(v) => Some(*v as i128),
        FieldValue::Double(v) if v.fract() == 0.0 => Some(*v as i128),
        FieldValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Int(v) => Some(*v as f64),
        FieldValue::UInt(v) => Some(*v as f64),
        FieldValue::Double(v) => Some(*v),
        FieldValue::Text(s) => s.trim().parse().ok(),
        FieldValue::List(_) => None,
    }
}

fn encode_element(
    config: &AttributeConfig,
    value: &FieldValue,
    with_len: bool,
    out: &mut Vec<u8>,
) -> Result<()> {
    let ft = config.field_type;
    if ft == FieldType::String {
        let text = match value {
            FieldValue::List(_) => return Err(mismatch(config, value)),
            other => other.as_term().ok_or_else(|| mismatch(config, value))?,
        };
        if with_len {
            encode_u64_into(text.len() as u64, out);
        }
        out.extend_from_slice(text.as_bytes());
        return Ok(());
    }

    if ft.is_floating() {
        let v = as_f64(value).ok_or_else(|| mismatch(config, value))?;
        if ft == FieldType::Float {
            out.extend_from_slice(&(v as f32).to_le_bytes());
        } else {
            out.extend_from_slice(&v.to_le_bytes());
        }
        return Ok(());
    }

    let v = as_i128(value).ok_or_else(|| mismatch(config, value))?;
    let fits = match ft {
        FieldType::Int8 => i8::try_from(v).is_ok(),
        FieldType::Int16 => i16::try_from(v).is_ok(),
        FieldType::Int32 => i32::try_from(v).is_ok(),
        FieldType::Int64 => i64::try_from(v).is_ok(),
        FieldType::UInt8 => u8::try_from(v).is_ok(),
        FieldType::UInt16 => u16::try_from(v).is_ok(),
        FieldType::UInt32 => u32::try_from(v).is_ok(),
        FieldType::UInt64 => u64::try_from(v).is_ok(),
        _ => false,
    };
    if !fits {
        return Err(mismatch(config, value));
    }
    let width = ft.element_width().unwrap_or(8);
    out.extend_from_slice(&(v as u64).to_le_bytes()[..width]);
    Ok(())
}

/// Encode a document field value for `config`.
pub fn encode_value(config: &AttributeConfig, value: &FieldValue) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if config.multi_value {
        let elements = value.elements();
        encode_u64_into(elements.len() as u64, &mut out);
        for element in elements {
            encode_element(config, element, true, &mut out)?;
        }
    } else {
        if matches!(value, FieldValue::List(_)) {
            return Err(mismatch(config, value));
        }
        encode_element(config, value, false, &mut out)?;
    }
    Ok(out)
}

/// Encoding used for documents that lack the field.
pub fn default_value(config: &AttributeConfig) -> Vec<u8> {
    match config.fixed_width() {
        Some(width) => vec![0u8; width],
        None if config.multi_value => vec![0u8],
        None => Vec::new(),
    }
}

fn truncated(config: &AttributeConfig) -> IndexlibError {
    IndexlibError::index_collapsed(format!(
        "truncated value of attribute [{}]",
        config.name
    ))
}

fn decode_element(config: &AttributeConfig, bytes: &[u8]) -> Result<(FieldValue, usize)> {
    let ft = config.field_type;
    let width = ft.element_width().unwrap_or(0);
    if bytes.len() < width {
        return Err(truncated(config));
    }
    let value = match ft {
        FieldType::Int8 => FieldValue::Int(bytes[0] as i8 as i64),
        FieldType::Int16 => FieldValue::Int(LittleEndian::read_i16(bytes) as i64),
        FieldType::Int32 => FieldValue::Int(LittleEndian::read_i32(bytes) as i64),
        FieldType::Int64 => FieldValue::Int(LittleEndian::read_i64(bytes)),
        FieldType::UInt8 => FieldValue::UInt(bytes[0] as u64),
        FieldType::UInt16 => FieldValue::UInt(LittleEndian::read_u16(bytes) as u64),
        FieldType::UInt32 => FieldValue::UInt(LittleEndian::read_u32(bytes) as u64),
        FieldType::UInt64 => FieldValue::UInt(LittleEndian::read_u64(bytes)),
        FieldType::Float => FieldValue::Double(LittleEndian::read_f32(bytes) as f64),
        FieldType::Double => FieldValue::Double(LittleEndian::read_f64(bytes)),
        FieldType::String => unreachable!("strings are decoded by the caller"),
    };
    Ok((value, width))
}

fn decode_text(config: &AttributeConfig, bytes: &[u8]) -> Result<FieldValue> {
    String::from_utf8(bytes.to_vec())
        .map(FieldValue::Text)
        .map_err(|_| {
            IndexlibError::index_collapsed(format!(
                "invalid UTF-8 in attribute [{}]",
                config.name
            ))
        })
}

/// Decode bytes produced by [`encode_value`].
pub fn decode_value(config: &AttributeConfig, bytes: &[u8]) -> Result<FieldValue> {
    let is_string = config.field_type == FieldType::String;
    if !config.multi_value {
        if is_string {
            return decode_text(config, bytes);
        }
        return decode_element(config, bytes).map(|(v, _)| v);
    }

    let (count, mut pos) = decode_u64(bytes)?;
    let mut values = Vec::with_capacity((count as usize).min(bytes.len()));
    for _ in 0..count {
        if is_string {
            let (len, read) = decode_u64(&bytes[pos..])?;
            let start = pos + read;
            let end = start
                .checked_add(len as usize)
                .filter(|&end| end <= bytes.len())
                .ok_or_else(|| truncated(config))?;
            values.push(decode_text(config, &bytes[start..end])?);
            pos = end;
        } else {
            let (value, read) = decode_element(config, &bytes[pos..])?;
            values.push(value);
            pos += read;
        }
    }
    Ok(FieldValue::List(values))
}

/// A single-value attribute value as a comparable sort key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortValue {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl SortValue {
    /// Total order; floats use IEEE total ordering.
    pub fn total_cmp(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Int(a), SortValue::Int(b)) => a.cmp(b),
            (SortValue::UInt(a), SortValue::UInt(b)) => a.cmp(b),
            (SortValue::Float(a), SortValue::Float(b)) => a.total_cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortValue::Int(_) => 0,
            SortValue::UInt(_) => 1,
            SortValue::Float(_) => 2,
        }
    }
}

/// Extract the sort key of an encoded single-value attribute.
pub fn sort_value(config: &AttributeConfig, bytes: &[u8]) -> Result<SortValue> {
    if !config.is_single_value() {
        return Err(IndexlibError::schema(format!(
            "sort attribute [{}] must be single value",
            config.name
        )));
    }
    Ok(match decode_element(config, bytes)?.0 {
        FieldValue::Int(v) => SortValue::Int(v),
        FieldValue::UInt(v) => SortValue::UInt(v),
        FieldValue::Double(v) => SortValue::Float(v),
        other => {
            return Err(IndexlibError::index_collapsed(format!(
                "unexpected sort value {other:?}"
            )));
        }
    })
}
