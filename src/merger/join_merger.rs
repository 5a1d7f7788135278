use crate::attribute::format::{AttributeFiles, AttributeFormat};
use crate::error::{IndexlibError, Result};
use crate::index_base::{DocId, layout};
use crate::merger::column_merger::ColumnMerger;
use crate::merger::merger_resource::MergerResource;
use crate::merger::reclaim_map::JoinValues;
use crate::storage::Storage;

/// Which side of the main/sub join a merger writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSide {
    /// Per main doc, the end of its sub documents.
    Main,
    /// Per sub doc, its main doc.
    Sub,
}

/// Writes the join attributes of merged main and sub tables. The values are
/// computed when the sub reclaim map is built.
#[derive(Debug, Clone)]
pub struct JoinMerger {
    side: JoinSide,
}

impl JoinMerger {
    pub fn new(side: JoinSide) -> Self {
        JoinMerger { side }
    }

    fn attribute_name(&self) -> &'static str {
        match self.side {
            JoinSide::Main => layout::MAIN_JOIN_ATTRIBUTE,
            JoinSide::Sub => layout::SUB_JOIN_ATTRIBUTE,
        }
    }

    fn join_values<'a>(&self, resource: &'a MergerResource) -> Result<&'a JoinValues> {
        let map = match self.side {
            JoinSide::Main => resource.sub_reclaim_map.as_deref(),
            JoinSide::Sub => Some(resource.reclaim_map.as_ref()),
        };
        map.and_then(|m| m.join_values()).ok_or_else(|| {
            IndexlibError::inconsistent_state(format!(
                "plan [{}] has no join values for [{}]",
                resource.plan_idx,
                self.attribute_name()
            ))
        })
    }
}

impl ColumnMerger for JoinMerger {
    fn identifier(&self) -> String {
        format!("join/{}", self.attribute_name())
    }

    fn estimate_memory_use(&self, resource: &MergerResource) -> i64 {
        resource.reclaim_map.new_doc_count() as i64 * 8
    }

    fn merge(&self, resource: &MergerResource, storage: &dyn Storage) -> Result<()> {
        let join = self.join_values(resource)?;
        let values: &[DocId] = match self.side {
            JoinSide::Main => &join.main_join,
            JoinSide::Sub => &join.sub_join,
        };
        let map = &resource.reclaim_map;
        if values.len() != map.new_doc_count() as usize {
            return Err(IndexlibError::inconsistent_state(format!(
                "[{}] join values for [{}] docs",
                values.len(),
                map.new_doc_count()
            )));
        }
        for (output, (&base, &count)) in resource
            .outputs
            .iter()
            .zip(map.target_base_doc_ids().iter().zip(map.target_doc_counts()))
        {
            let encoded: Vec<[u8; 4]> = values[base as usize..(base + count) as usize]
                .iter()
                .map(|v| v.to_le_bytes())
                .collect();
            AttributeFiles::build(AttributeFormat::join(), encoded.iter().map(|v| v.as_slice()))?
                .store(storage, &output.root, self.attribute_name())?;
        }
        Ok(())
    }
}
