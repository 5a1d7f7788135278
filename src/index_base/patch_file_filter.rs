//! Drops patch files a reader has already incorporated.

use log::debug;

use crate::config::OnlineConfig;
use crate::index_base::SegmentId;
use crate::index_base::patch_file_finder::{PatchFileInfo, PatchInfos};

/// With `ignore_patch_to_old_inc_segment`, patches whose source segment is
/// older than `start_load_segment` are removed: the reader durably holds
/// those segments already and applying their patches again would double-patch.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchFileFilter {
    ignore_patch_to_old_inc_segment: bool,
    start_load_segment: Option<SegmentId>,
}

impl PatchFileFilter {
    pub fn new(ignore_patch_to_old_inc_segment: bool, start_load_segment: Option<SegmentId>) -> Self {
        PatchFileFilter {
            ignore_patch_to_old_inc_segment,
            start_load_segment,
        }
    }

    pub fn from_online_config(config: &OnlineConfig) -> Self {
        Self::new(
            config.ignore_patch_to_old_inc_segment,
            config.start_load_segment,
        )
    }

    fn keep(&self, info: &PatchFileInfo) -> bool {
        match (self.ignore_patch_to_old_inc_segment, self.start_load_segment) {
            (true, Some(start)) => info.src_segment >= start,
            _ => true,
        }
    }

    pub fn filter(&self, infos: Vec<PatchFileInfo>) -> Vec<PatchFileInfo> {
        infos
            .into_iter()
            .filter(|info| {
                let keep = self.keep(info);
                if !keep {
                    debug!("ignoring patch [{}] from old segment", info.path);
                }
                keep
            })
            .collect()
    }

    /// Filter every destination's list, dropping destinations left empty.
    pub fn filter_all(&self, infos: PatchInfos) -> PatchInfos {
        infos
            .into_iter()
            .map(|(dst, list)| (dst, self.filter(list)))
            .filter(|(_, list)| !list.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(src: SegmentId, dst: SegmentId) -> PatchFileInfo {
        PatchFileInfo {
            src_segment: src,
            dst_segment: dst,
            src_timestamp: src as i64,
            path: format!("segment_{src}/attribute/a/{src}_{dst}.patch"),
        }
    }

    #[test]
    fn test_filter_old_sources() {
        let filter = PatchFileFilter::new(true, Some(5));
        let kept = filter.filter(vec![info(3, 1), info(5, 1), info(7, 2)]);
        let sources: Vec<_> = kept.iter().map(|i| i.src_segment).collect();
        assert_eq!(sources, vec![5, 7]);
    }

    #[test]
    fn test_disabled_filter_keeps_all() {
        let filter = PatchFileFilter::new(false, Some(5));
        assert_eq!(filter.filter(vec![info(3, 1)]).len(), 1);
        let filter = PatchFileFilter::new(true, None);
        assert_eq!(filter.filter(vec![info(3, 1)]).len(), 1);
    }

    #[test]
    fn test_filter_all_drops_empty() {
        let mut infos = PatchInfos::new();
        infos.insert(1, vec![info(2, 1)]);
        infos.insert(3, vec![info(6, 3)]);
        let filtered = PatchFileFilter::new(true, Some(4)).filter_all(infos);
        assert_eq!(filtered.keys().copied().collect::<Vec<_>>(), vec![3]);
    }
}
