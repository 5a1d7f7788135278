//! On-disk form of one attribute in one segment.

use byteorder::{ByteOrder, LittleEndian};

use crate::attribute::compress::{self, EqualValueCompressReader};
use crate::config::{AttributeConfig, PackAttributeConfig};
use crate::error::{IndexlibError, Result};
use crate::index_base::{DocId, layout};
use crate::storage::Storage;

/// How values of an attribute are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeFormat {
    /// Every value has the same width; no offset file.
    SingleValue { width: usize },
    /// Values of varying length indexed by an offset file.
    VarLen { compress_offset: bool },
}

impl AttributeFormat {
    pub fn of(config: &AttributeConfig) -> Self {
        match config.fixed_width() {
            Some(width) => AttributeFormat::SingleValue { width },
            None => AttributeFormat::VarLen {
                compress_offset: config.compress_offset,
            },
        }
    }

    pub fn of_pack(config: &PackAttributeConfig) -> Self {
        AttributeFormat::VarLen {
            compress_offset: config.compress_offset,
        }
    }

    /// The u32 join attributes between main and sub tables.
    pub fn join() -> Self {
        AttributeFormat::SingleValue { width: 4 }
    }
}

/// Encoded files of one attribute, ready to be written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeFiles {
    pub data: Vec<u8>,
    pub offset: Option<Vec<u8>>,
}

impl AttributeFiles {
    /// Encode `values`, one per document in doc-id order.
    pub fn build<'a, I>(format: AttributeFormat, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut data = Vec::new();
        match format {
            AttributeFormat::SingleValue { width } => {
                for value in values {
                    if value.len() != width {
                        return Err(IndexlibError::bad_parameter(format!(
                            "value of [{}] bytes in attribute of width [{width}]",
                            value.len()
                        )));
                    }
                    data.extend_from_slice(value);
                }
                Ok(AttributeFiles { data, offset: None })
            }
            AttributeFormat::VarLen { compress_offset } => {
                let mut offsets = vec![0u64];
                for value in values {
                    data.extend_from_slice(value);
                    offsets.push(data.len() as u64);
                }
                let offset = if !compress_offset {
                    offsets.iter().flat_map(|o| o.to_le_bytes()).collect()
                } else if data.len() <= u32::MAX as usize {
                    let narrow: Vec<u32> = offsets.iter().map(|&o| o as u32).collect();
                    compress::compress_u32(&narrow)
                } else {
                    compress::compress_u64(&offsets)
                };
                Ok(AttributeFiles {
                    data,
                    offset: Some(offset),
                })
            }
        }
    }

    /// Write the files of attribute `name` below the segment root `root`.
    pub fn store(&self, storage: &dyn Storage, root: &str, name: &str) -> Result<()> {
        storage.write_all(&layout::attribute_data_path(root, name), &self.data)?;
        if let Some(offset) = &self.offset {
            storage.write_all(&layout::attribute_offset_path(root, name), offset)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Offsets {
    Fixed(usize),
    Raw(Vec<u64>),
    Compressed(EqualValueCompressReader),
}

/// The base values of one attribute in one segment.
#[derive(Debug, Clone)]
pub struct AttributeSegmentReader {
    name: String,
    doc_count: u32,
    data: Vec<u8>,
    offsets: Offsets,
}

impl AttributeSegmentReader {
    pub fn open(
        storage: &dyn Storage,
        root: &str,
        name: &str,
        format: AttributeFormat,
        doc_count: u32,
    ) -> Result<Self> {
        let data = storage.read_all(&layout::attribute_data_path(root, name))?;
        let offset = match format {
            AttributeFormat::SingleValue { .. } => None,
            AttributeFormat::VarLen { .. } => {
                Some(storage.read_all(&layout::attribute_offset_path(root, name))?)
            }
        };
        Self::from_parts(name, format, doc_count, data, offset)
    }

    pub fn from_parts(
        name: &str,
        format: AttributeFormat,
        doc_count: u32,
        data: Vec<u8>,
        offset: Option<Vec<u8>>,
    ) -> Result<Self> {
        let collapsed = |what: String| {
            IndexlibError::index_collapsed(format!("attribute [{name}]: {what}"))
        };
        let offsets = match (format, offset) {
            (AttributeFormat::SingleValue { width }, _) => {
                if data.len() != width * doc_count as usize {
                    return Err(collapsed(format!(
                        "data has [{}] bytes, expected [{doc_count}] x [{width}]",
                        data.len()
                    )));
                }
                Offsets::Fixed(width)
            }
            (AttributeFormat::VarLen { compress_offset }, Some(offset)) => {
                let offsets = match compress::tail_magic(&offset) {
                    Some(_) => Offsets::Compressed(EqualValueCompressReader::open(&offset)?),
                    None if compress_offset => {
                        return Err(collapsed(
                            "offset file is not equal-value compressed".to_string(),
                        ));
                    }
                    None => {
                        if offset.len() % 8 != 0 {
                            return Err(collapsed("raw offset file misaligned".to_string()));
                        }
                        Offsets::Raw(offset.chunks_exact(8).map(LittleEndian::read_u64).collect())
                    }
                };
                let (count, last) = match &offsets {
                    Offsets::Raw(raw) => (raw.len(), raw.last().copied()),
                    Offsets::Compressed(c) => (c.len(), c.len().checked_sub(1).and_then(|i| c.get(i))),
                    Offsets::Fixed(_) => (0, None),
                };
                if count != doc_count as usize + 1 || last != Some(data.len() as u64) {
                    return Err(collapsed(format!(
                        "offset file covers [{}] docs, segment has [{doc_count}]",
                        count.saturating_sub(1)
                    )));
                }
                offsets
            }
            (AttributeFormat::VarLen { .. }, None) => {
                return Err(collapsed("missing offset file".to_string()));
            }
        };

        Ok(AttributeSegmentReader {
            name: name.to_string(),
            doc_count,
            data,
            offsets,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Encoded value of a local document.
    pub fn get(&self, doc_id: DocId) -> Result<&[u8]> {
        if doc_id >= self.doc_count {
            return Err(IndexlibError::index_collapsed(format!(
                "doc [{doc_id}] out of range of attribute [{}] with [{}] docs",
                self.name, self.doc_count
            )));
        }
        let idx = doc_id as usize;
        let (start, end) = match &self.offsets {
            Offsets::Fixed(width) => (idx * width, (idx + 1) * width),
            Offsets::Raw(raw) => (raw[idx] as usize, raw[idx + 1] as usize),
            Offsets::Compressed(c) => {
                let start = c.get(idx);
                let end = c.get(idx + 1);
                match (start, end) {
                    (Some(s), Some(e)) => (s as usize, e as usize),
                    _ => {
                        return Err(IndexlibError::index_collapsed(format!(
                            "attribute [{}] offset of doc [{doc_id}] unreadable",
                            self.name
                        )));
                    }
                }
            }
        };
        self.data.get(start..end).ok_or_else(|| {
            IndexlibError::index_collapsed(format!(
                "attribute [{}] value of doc [{doc_id}] out of data bounds",
                self.name
            ))
        })
    }

    /// All values in doc-id order.
    pub fn values(&self) -> Result<Vec<Vec<u8>>> {
        (0..self.doc_count).map(|doc| self.get(doc).map(<[u8]>::to_vec)).collect()
    }

    /// Bytes held in memory.
    pub fn memory_use(&self) -> usize {
        let offsets = match &self.offsets {
            Offsets::Fixed(_) => 0,
            Offsets::Raw(raw) => raw.len() * 8,
            Offsets::Compressed(c) => c.len() * 8,
        };
        self.data.len() + offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn values() -> Vec<Vec<u8>> {
        vec![b"alpha".to_vec(), Vec::new(), b"gamma-ray".to_vec()]
    }

    #[test]
    fn test_single_value_round_trip() {
        let storage = MemoryStorage::new_default();
        let vals = [1u32.to_le_bytes(), 7u32.to_le_bytes()];
        let format = AttributeFormat::SingleValue { width: 4 };
        let files = AttributeFiles::build(format, vals.iter().map(|v| v.as_slice())).unwrap();
        assert!(files.offset.is_none());
        files.store(&storage, "segment_0", "price").unwrap();

        let reader = AttributeSegmentReader::open(&storage, "segment_0", "price", format, 2).unwrap();
        assert_eq!(reader.get(1).unwrap(), &7u32.to_le_bytes());
        assert!(reader.get(2).unwrap_err().is_index_collapsed());
        assert!(AttributeSegmentReader::open(&storage, "segment_0", "price", format, 3).is_err());
    }

    #[test]
    fn test_var_len_raw_and_compressed() {
        for compress_offset in [false, true] {
            let format = AttributeFormat::VarLen { compress_offset };
            let vals = values();
            let files = AttributeFiles::build(format, vals.iter().map(Vec::as_slice)).unwrap();
            let offset = files.offset.clone().unwrap();
            assert_eq!(compress::tail_magic(&offset).is_some(), compress_offset);

            let reader =
                AttributeSegmentReader::from_parts("title", format, 3, files.data, files.offset)
                    .unwrap();
            assert_eq!(reader.values().unwrap(), vals);
        }
    }

    #[test]
    fn test_raw_offsets_detected_without_config() {
        // A reader configured for raw offsets still accepts compressed ones.
        let vals = values();
        let files = AttributeFiles::build(
            AttributeFormat::VarLen { compress_offset: true },
            vals.iter().map(Vec::as_slice),
        )
        .unwrap();
        let reader = AttributeSegmentReader::from_parts(
            "title",
            AttributeFormat::VarLen { compress_offset: false },
            3,
            files.data,
            files.offset,
        )
        .unwrap();
        assert_eq!(reader.get(2).unwrap(), b"gamma-ray");
    }

    #[test]
    fn test_corrupt_magic_rejected() {
        let vals = values();
        let format = AttributeFormat::VarLen { compress_offset: true };
        let files = AttributeFiles::build(format, vals.iter().map(Vec::as_slice)).unwrap();
        let mut offset = files.offset.unwrap();
        let len = offset.len();
        offset[len - 4] = 0;
        let err = AttributeSegmentReader::from_parts("title", format, 3, files.data, Some(offset))
            .unwrap_err();
        assert!(err.is_index_collapsed());
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let format = AttributeFormat::SingleValue { width: 8 };
        let short = [0u8; 4];
        assert!(AttributeFiles::build(format, [&short[..]]).is_err());
    }
}
