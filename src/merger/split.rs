//! Distribution of merged documents over several output segments.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::Schema;
use crate::error::{IndexlibError, Result};

/// How the output of one merge plan is split into target segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SplitStrategyConfig {
    /// Everything goes to a single target.
    #[default]
    Default,
    /// Consecutive runs of at most `max_doc_count` documents per target.
    MaxDocCount { max_doc_count: u32 },
    /// `segment_count` targets of (nearly) equal size.
    SegmentCount { segment_count: u32 },
    /// Target chosen by hashing the value of `attribute`.
    AttributeHash { attribute: String, segment_count: u32 },
}

/// Assigns every surviving document of a merge to a target segment index.
///
/// Documents are addressed by their ordinal in merge order; the reclaim map
/// then gives each target a contiguous range of new doc ids.
#[derive(Debug, Clone, Default)]
pub struct SegmentSplitStrategy {
    config: SplitStrategyConfig,
}

impl SegmentSplitStrategy {
    pub fn new(config: SplitStrategyConfig) -> Self {
        SegmentSplitStrategy { config }
    }

    pub fn config(&self) -> &SplitStrategyConfig {
        &self.config
    }

    /// Check the configuration against the table it splits.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        match &self.config {
            SplitStrategyConfig::Default => Ok(()),
            SplitStrategyConfig::MaxDocCount { max_doc_count: 0 } => Err(
                IndexlibError::bad_parameter("split max_doc_count must be positive"),
            ),
            SplitStrategyConfig::SegmentCount { segment_count: 0 }
            | SplitStrategyConfig::AttributeHash {
                segment_count: 0, ..
            } => Err(IndexlibError::bad_parameter(
                "split segment_count must be positive",
            )),
            SplitStrategyConfig::AttributeHash { attribute, .. } => {
                if schema.attribute(attribute).is_none() {
                    return Err(IndexlibError::schema(format!(
                        "split attribute [{attribute}] not in schema [{}]",
                        schema.name
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Attribute whose values the split needs, if any.
    pub fn required_attribute(&self) -> Option<&str> {
        match &self.config {
            SplitStrategyConfig::AttributeHash { attribute, .. } => Some(attribute),
            _ => None,
        }
    }

    /// Number of targets for `total` surviving documents. Always at least one.
    pub fn target_count(&self, total: usize) -> usize {
        match &self.config {
            SplitStrategyConfig::Default => 1,
            SplitStrategyConfig::MaxDocCount { max_doc_count } => {
                total.div_ceil((*max_doc_count).max(1) as usize).max(1)
            }
            SplitStrategyConfig::SegmentCount { segment_count } => {
                (*segment_count as usize).min(total).max(1)
            }
            SplitStrategyConfig::AttributeHash { segment_count, .. } => {
                (*segment_count).max(1) as usize
            }
        }
    }

    /// Target of the document at `ordinal` out of `total`. `value` is the
    /// encoded value of [`required_attribute`](Self::required_attribute).
    pub fn target_of(&self, ordinal: usize, total: usize, value: Option<&[u8]>) -> usize {
        match &self.config {
            SplitStrategyConfig::Default => 0,
            SplitStrategyConfig::MaxDocCount { max_doc_count } => {
                ordinal / (*max_doc_count).max(1) as usize
            }
            SplitStrategyConfig::SegmentCount { .. } => {
                if total == 0 {
                    0
                } else {
                    ordinal * self.target_count(total) / total
                }
            }
            SplitStrategyConfig::AttributeHash { segment_count, .. } => {
                let count = (*segment_count).max(1) as u64;
                (xxh3_64(value.unwrap_or_default()) % count) as usize
            }
        }
    }
}
