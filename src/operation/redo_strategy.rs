//! Deciding which queued operations a reader must replay after switching
//! to a newer on-disk version.

use std::collections::BTreeSet;

use log::debug;

use crate::index_base::{SegmentId, Version};
use crate::metrics::MetricReporter;
use crate::operation::Operation;

/// Where a replayed operation's document can be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedoHint {
    /// Look the document up by primary key.
    #[default]
    Unknown,
    /// The document still lives in this segment of the new version.
    InSegment(SegmentId),
}

#[derive(Debug, Clone, Default)]
pub struct OperationRedoStrategy {
    new_timestamp: i64,
    surviving_segments: BTreeSet<SegmentId>,
    skip_redo_update_op_count: u64,
    skip_redo_delete_op_count: u64,
    metrics: MetricReporter,
}

impl OperationRedoStrategy {
    pub fn init(old_version: &Version, new_version: &Version) -> Self {
        let surviving_segments = old_version
            .segments
            .iter()
            .copied()
            .filter(|&s| new_version.has_segment(s))
            .collect();
        debug!(
            "redo from version [{}] to [{}], on-disk timestamp [{}]",
            old_version.version_id, new_version.version_id, new_version.timestamp
        );
        OperationRedoStrategy {
            new_timestamp: new_version.timestamp,
            surviving_segments,
            ..Default::default()
        }
    }

    pub fn with_metrics(mut self, metrics: MetricReporter) -> Self {
        metrics.declare("redo/skip_redo_update_op_count", "count");
        metrics.declare("redo/skip_redo_delete_op_count", "count");
        self.metrics = metrics;
        self
    }

    /// Whether `op` must be replayed. Sets `hint` for operations that are.
    ///
    /// Operations older than the new version's timestamp are already
    /// reflected on disk.
    pub fn need_redo(&mut self, op: &Operation, hint: &mut RedoHint) -> bool {
        *hint = RedoHint::Unknown;
        if op.timestamp() < self.new_timestamp {
            if op.is_update() {
                self.skip_redo_update_op_count += 1;
                self.metrics.report(
                    "redo/skip_redo_update_op_count",
                    self.skip_redo_update_op_count as f64,
                );
            } else {
                self.skip_redo_delete_op_count += 1;
                self.metrics.report(
                    "redo/skip_redo_delete_op_count",
                    self.skip_redo_delete_op_count as f64,
                );
            }
            return false;
        }
        if let Some(segment_id) = op.meta().segment_id_before_modified {
            if self.surviving_segments.contains(&segment_id) {
                *hint = RedoHint::InSegment(segment_id);
            }
        }
        true
    }

    pub fn skip_redo_update_op_count(&self) -> u64 {
        self.skip_redo_update_op_count
    }

    pub fn skip_redo_delete_op_count(&self) -> u64 {
        self.skip_redo_delete_op_count
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metrics::InMemoryMetricProvider;
    use crate::operation::OperationMeta;

    fn versions() -> (Version, Version) {
        let mut old = Version::new(1);
        old.add_segment(0);
        old.add_segment(1);
        let mut new = Version::new(2);
        new.add_segment(1);
        new.add_segment(2);
        new.timestamp = 100;
        (old, new)
    }

    #[test]
    fn test_skips_durable_operations() {
        let (old, new) = versions();
        let provider = Arc::new(InMemoryMetricProvider::new());
        let mut strategy = OperationRedoStrategy::init(&old, &new)
            .with_metrics(MetricReporter::new(Some(provider.clone())));
        let mut hint = RedoHint::Unknown;

        let old_delete = Operation::Remove {
            meta: OperationMeta::new(1, 50),
        };
        let old_update = Operation::UpdateField {
            meta: OperationMeta::new(1, 99),
            fields: vec![(0, vec![1])],
            sub_updates: vec![],
        };
        assert!(!strategy.need_redo(&old_delete, &mut hint));
        assert!(!strategy.need_redo(&old_update, &mut hint));
        assert_eq!(strategy.skip_redo_delete_op_count(), 1);
        assert_eq!(strategy.skip_redo_update_op_count(), 1);
        assert_eq!(provider.value("redo/skip_redo_update_op_count"), Some(1.0));
    }

    #[test]
    fn test_hint_names_surviving_segment() {
        let (old, new) = versions();
        let mut strategy = OperationRedoStrategy::init(&old, &new);
        let mut hint = RedoHint::Unknown;

        let in_survivor = Operation::Remove {
            meta: OperationMeta::new(1, 100).with_segment(Some(1)),
        };
        assert!(strategy.need_redo(&in_survivor, &mut hint));
        assert_eq!(hint, RedoHint::InSegment(1));

        let in_merged_away = Operation::Remove {
            meta: OperationMeta::new(1, 120).with_segment(Some(0)),
        };
        assert!(strategy.need_redo(&in_merged_away, &mut hint));
        assert_eq!(hint, RedoHint::Unknown);
    }
}
