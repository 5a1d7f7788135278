//! Replayable document mutations.
//!
//! Every delete and update the builder applies is also recorded as an
//! [`Operation`] in an [`OperationQueue`]. A reader that catches up to a new
//! on-disk version replays the operations the version does not reflect yet;
//! [`OperationRedoStrategy`] decides which ones.

pub mod factory;
pub mod queue;
pub mod redo_strategy;

use std::io::Read;

use crate::document::PkHash;
use crate::error::{IndexlibError, Result};
use crate::index_base::SegmentId;
use crate::storage::structured::{StructReader, StructWriter};

pub use factory::OperationFactory;
pub use queue::OperationQueue;
pub use redo_strategy::{OperationRedoStrategy, RedoHint};

/// Fields shared by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationMeta {
    pub pk_hash: PkHash,
    pub timestamp: i64,
    /// Segment that held the document when the operation was issued.
    pub segment_id_before_modified: Option<SegmentId>,
}

impl OperationMeta {
    pub fn new(pk_hash: PkHash, timestamp: i64) -> Self {
        OperationMeta {
            pk_hash,
            timestamp,
            segment_id_before_modified: None,
        }
    }

    pub fn with_segment(mut self, segment_id: Option<SegmentId>) -> Self {
        self.segment_id_before_modified = segment_id;
        self
    }
}

/// New values of attribute fields, as `(field id, encoded value)`.
pub type FieldUpdates = Vec<(usize, Vec<u8>)>;

/// Field updates of one sub document, addressed by its primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDocUpdate {
    pub pk_hash: PkHash,
    pub fields: FieldUpdates,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Delete (or supersede, for an add) the document with this key.
    Remove { meta: OperationMeta },
    UpdateField {
        meta: OperationMeta,
        fields: FieldUpdates,
        sub_updates: Vec<SubDocUpdate>,
    },
    /// Delete sub documents of the main document with this key.
    SubDocRemove {
        meta: OperationMeta,
        sub_pk_hashes: Vec<PkHash>,
    },
}

const TAG_REMOVE: u8 = 1;
const TAG_UPDATE_FIELD: u8 = 2;
const TAG_SUB_DOC_REMOVE: u8 = 3;

fn write_fields(writer: &mut StructWriter<Vec<u8>>, fields: &FieldUpdates) -> Result<()> {
    writer.write_varint(fields.len() as u64)?;
    for (field_id, value) in fields {
        writer.write_varint(*field_id as u64)?;
        writer.write_bytes(value)?;
    }
    Ok(())
}

fn read_fields<R: Read>(reader: &mut StructReader<R>) -> Result<FieldUpdates> {
    let count = reader.read_varint()? as usize;
    let mut fields = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let field_id = reader.read_varint()? as usize;
        fields.push((field_id, reader.read_bytes()?));
    }
    Ok(fields)
}

impl Operation {
    pub fn meta(&self) -> &OperationMeta {
        match self {
            Operation::Remove { meta }
            | Operation::UpdateField { meta, .. }
            | Operation::SubDocRemove { meta, .. } => meta,
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.meta().timestamp
    }

    pub fn pk_hash(&self) -> PkHash {
        self.meta().pk_hash
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Operation::UpdateField { .. })
    }

    /// Approximate heap footprint, for queue accounting.
    pub fn memory_use(&self) -> usize {
        let fields = |f: &FieldUpdates| f.iter().map(|(_, v)| v.len() + 16).sum::<usize>();
        std::mem::size_of::<Operation>()
            + match self {
                Operation::Remove { .. } => 0,
                Operation::UpdateField {
                    fields: main,
                    sub_updates,
                    ..
                } => fields(main) + sub_updates.iter().map(|s| fields(&s.fields) + 16).sum::<usize>(),
                Operation::SubDocRemove { sub_pk_hashes, .. } => sub_pk_hashes.len() * 16,
            }
    }

    pub(crate) fn encode(&self, writer: &mut StructWriter<Vec<u8>>) -> Result<()> {
        let tag = match self {
            Operation::Remove { .. } => TAG_REMOVE,
            Operation::UpdateField { .. } => TAG_UPDATE_FIELD,
            Operation::SubDocRemove { .. } => TAG_SUB_DOC_REMOVE,
        };
        let meta = self.meta();
        writer.write_u8(tag)?;
        writer.write_u128(meta.pk_hash)?;
        writer.write_i64(meta.timestamp)?;
        match meta.segment_id_before_modified {
            Some(segment_id) => {
                writer.write_u8(1)?;
                writer.write_u32(segment_id)?;
            }
            None => writer.write_u8(0)?,
        }

        match self {
            Operation::Remove { .. } => {}
            Operation::UpdateField {
                fields,
                sub_updates,
                ..
            } => {
                write_fields(writer, fields)?;
                writer.write_varint(sub_updates.len() as u64)?;
                for sub in sub_updates {
                    writer.write_u128(sub.pk_hash)?;
                    write_fields(writer, &sub.fields)?;
                }
            }
            Operation::SubDocRemove { sub_pk_hashes, .. } => {
                writer.write_varint(sub_pk_hashes.len() as u64)?;
                for &hash in sub_pk_hashes {
                    writer.write_u128(hash)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn decode<R: Read>(reader: &mut StructReader<R>) -> Result<Self> {
        let tag = reader.read_u8()?;
        let pk_hash = reader.read_u128()?;
        let timestamp = reader.read_i64()?;
        let segment_id_before_modified = match reader.read_u8()? {
            0 => None,
            _ => Some(reader.read_u32()?),
        };
        let meta = OperationMeta {
            pk_hash,
            timestamp,
            segment_id_before_modified,
        };

        match tag {
            TAG_REMOVE => Ok(Operation::Remove { meta }),
            TAG_UPDATE_FIELD => {
                let fields = read_fields(reader)?;
                let sub_count = reader.read_varint()? as usize;
                let mut sub_updates = Vec::with_capacity(sub_count.min(1024));
                for _ in 0..sub_count {
                    let pk_hash = reader.read_u128()?;
                    sub_updates.push(SubDocUpdate {
                        pk_hash,
                        fields: read_fields(reader)?,
                    });
                }
                Ok(Operation::UpdateField {
                    meta,
                    fields,
                    sub_updates,
                })
            }
            TAG_SUB_DOC_REMOVE => {
                let count = reader.read_varint()? as usize;
                let mut sub_pk_hashes = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    sub_pk_hashes.push(reader.read_u128()?);
                }
                Ok(Operation::SubDocRemove {
                    meta,
                    sub_pk_hashes,
                })
            }
            other => Err(IndexlibError::index_collapsed(format!(
                "unknown operation type [{other}]"
            ))),
        }
    }
}
