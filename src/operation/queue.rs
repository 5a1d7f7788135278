//! Block-structured, persistable queue of operations.

use log::debug;

use crate::error::{IndexlibError, Result};
use crate::operation::Operation;
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const OPERATION_LOG_MAGIC: u32 = 0x4F50_4C47; // "OPLG"

#[derive(Debug, Clone, Default)]
struct OperationBlock {
    operations: Vec<Operation>,
    min_timestamp: i64,
    max_timestamp: i64,
}

impl OperationBlock {
    fn push(&mut self, op: Operation) {
        let ts = op.timestamp();
        if self.operations.is_empty() {
            self.min_timestamp = ts;
            self.max_timestamp = ts;
        } else {
            self.min_timestamp = self.min_timestamp.min(ts);
            self.max_timestamp = self.max_timestamp.max(ts);
        }
        self.operations.push(op);
    }
}

/// Operations in arrival order, grouped into fixed-size blocks so that old
/// operations can be released a block at a time.
#[derive(Debug, Clone)]
pub struct OperationQueue {
    block_size: usize,
    blocks: Vec<OperationBlock>,
}

impl Default for OperationQueue {
    fn default() -> Self {
        OperationQueue::new(1024)
    }
}

impl OperationQueue {
    pub fn new(block_size: usize) -> Self {
        OperationQueue {
            block_size: block_size.max(1),
            blocks: Vec::new(),
        }
    }

    pub fn append(&mut self, op: Operation) {
        let needs_block = self
            .blocks
            .last()
            .is_none_or(|b| b.operations.len() >= self.block_size);
        if needs_block {
            self.blocks.push(OperationBlock::default());
        }
        if let Some(block) = self.blocks.last_mut() {
            block.push(op);
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.operations.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| b.operations.is_empty())
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn max_timestamp(&self) -> Option<i64> {
        self.blocks.iter().map(|b| b.max_timestamp).max()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.blocks.iter().flat_map(|b| b.operations.iter())
    }

    /// Operations with timestamp at or after `timestamp`, in arrival order.
    pub fn iter_from(&self, timestamp: i64) -> impl Iterator<Item = &Operation> {
        self.blocks
            .iter()
            .filter(move |b| b.max_timestamp >= timestamp)
            .flat_map(|b| b.operations.iter())
            .filter(move |op| op.timestamp() >= timestamp)
    }

    /// Release every block whose operations are all older than `timestamp`.
    /// Returns the number of operations released.
    pub fn reclaim(&mut self, timestamp: i64) -> usize {
        let before = self.len();
        self.blocks.retain(|b| b.max_timestamp >= timestamp);
        let released = before - self.len();
        if released > 0 {
            debug!("reclaimed [{released}] operations older than [{timestamp}]");
        }
        released
    }

    pub fn memory_use(&self) -> usize {
        self.iter().map(Operation::memory_use).sum()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = StructWriter::in_memory();
        writer.write_u32(OPERATION_LOG_MAGIC)?;
        writer.write_u64(self.len() as u64)?;
        for op in self.iter() {
            op.encode(&mut writer)?;
        }
        writer.finish()
    }

    pub fn from_bytes(data: &[u8], path: &str, block_size: usize) -> Result<Self> {
        let mut reader = StructReader::from_slice(data);
        if reader.read_u32()? != OPERATION_LOG_MAGIC {
            return Err(IndexlibError::index_collapsed(format!(
                "[{path}] is not an operation log"
            )));
        }
        let count = reader.read_u64()?;
        let mut queue = OperationQueue::new(block_size);
        for _ in 0..count {
            queue.append(Operation::decode(&mut reader)?);
        }
        reader.expect_checksum(path)?;
        Ok(queue)
    }

    pub fn dump(&self, storage: &dyn Storage, path: &str) -> Result<()> {
        storage.write_all(path, &self.to_bytes()?)
    }

    pub fn load(storage: &dyn Storage, path: &str, block_size: usize) -> Result<Self> {
        let data = storage.read_all(path)?;
        Self::from_bytes(&data, path, block_size)
    }
}
