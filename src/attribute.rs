//! Attributes: per-document forward columns.
//!
//! Single-value attributes of fixed width are stored as one packed `data`
//! file. Strings, multi values and pack attributes are var-len: a `data`
//! file of concatenated values plus an `offset` file, optionally stored with
//! equal-value compression ([`compress`]). Updates against built segments
//! are kept in patch files ([`patch`]) and replayed in doc-id order by the
//! iterators in [`patch_iterator`].

pub mod codec;
pub mod compress;
pub mod container;
pub mod format;
pub mod pack;
pub mod patch;
pub mod patch_iterator;

pub use codec::{SortValue, decode_value, default_value, encode_value, sort_value};
pub use compress::{
    EqualValueCompressReader, UINT32_OFFSET_TAIL_MAGIC, UINT64_OFFSET_TAIL_MAGIC, compress_u32,
    compress_u64,
};
pub use container::{AttributeReaderContainer, PatchedAttributeSegment};
pub use format::{AttributeFiles, AttributeFormat, AttributeSegmentReader};
pub use patch::{AttributePatchReader, AttributePatchWriter};
pub use patch_iterator::{
    MultiFieldPatchIterator, PatchItem, SingleFieldPatchIterator, SubDocPatchIterator,
};
