//! Name to constructor table of merge strategies.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::error;

use crate::config::MergeStrategyParameter;
use crate::error::{IndexlibError, Result};
use crate::merger::strategy::{
    BalanceTreeMergeStrategy, KeyValueOptimizeMergeStrategy, MergeStrategy, OptimizeMergeStrategy,
    balance_tree, key_value_optimize, optimize,
};

pub type StrategyCreator = Arc<dyn Fn() -> Box<dyn MergeStrategy> + Send + Sync>;

/// Registered merge strategies. Starts with the built-in ones; callers may
/// add their own under new names.
#[derive(Clone)]
pub struct MergeStrategyRegistry {
    creators: BTreeMap<String, StrategyCreator>,
}

impl fmt::Debug for MergeStrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeStrategyRegistry")
            .field("strategies", &self.creators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for MergeStrategyRegistry {
    fn default() -> Self {
        let mut registry = MergeStrategyRegistry {
            creators: BTreeMap::new(),
        };
        registry.register(balance_tree::IDENTIFIER, || {
            Box::new(BalanceTreeMergeStrategy::new())
        });
        registry.register(optimize::IDENTIFIER, || Box::new(OptimizeMergeStrategy::new()));
        registry.register(key_value_optimize::IDENTIFIER, || {
            Box::new(KeyValueOptimizeMergeStrategy::new())
        });
        registry
    }
}

impl MergeStrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `creator` under `name`, replacing an earlier registration.
    pub fn register<F>(&mut self, name: &str, creator: F)
    where
        F: Fn() -> Box<dyn MergeStrategy> + Send + Sync + 'static,
    {
        self.creators.insert(name.to_string(), Arc::new(creator));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.creators.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.creators.keys().map(String::as_str)
    }

    /// A configured instance of strategy `name`.
    pub fn create(&self, name: &str, param: &MergeStrategyParameter) -> Result<Box<dyn MergeStrategy>> {
        let creator = self.creators.get(name).ok_or_else(|| {
            IndexlibError::bad_parameter(format!("unknown merge strategy [{name}]"))
        })?;
        let mut strategy = creator();
        strategy.set_parameter(param).inspect_err(|e| {
            error!("configuring merge strategy [{name}] failed: {e}");
        })?;
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_base::LevelInfo;
    use crate::merger::merge_plan::MergeTask;
    use crate::merger::segment_merge_info::SegmentMergeInfo;

    #[derive(Debug)]
    struct NeverMerge;

    impl MergeStrategy for NeverMerge {
        fn identifier(&self) -> &'static str {
            "never"
        }

        fn set_parameter(&mut self, _param: &MergeStrategyParameter) -> Result<()> {
            Ok(())
        }

        fn create_merge_task(&self, _: &[SegmentMergeInfo], _: &LevelInfo) -> Result<MergeTask> {
            Ok(MergeTask::new())
        }

        fn create_merge_task_for_optimize(
            &self,
            _: &[SegmentMergeInfo],
            _: &LevelInfo,
        ) -> Result<MergeTask> {
            Ok(MergeTask::new())
        }
    }

    #[test]
    fn test_builtin_strategies() {
        let registry = MergeStrategyRegistry::new();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["balance_tree", "key_value_optimize", "optimize"]
        );
        let strategy = registry
            .create("optimize", &MergeStrategyParameter::default())
            .unwrap();
        assert_eq!(strategy.identifier(), "optimize");
        assert!(registry
            .create("tiered", &MergeStrategyParameter::default())
            .is_err());
    }

    #[test]
    fn test_custom_strategy() {
        let mut registry = MergeStrategyRegistry::new();
        registry.register("never", || Box::new(NeverMerge));
        let strategy = registry
            .create("never", &MergeStrategyParameter::default())
            .unwrap();
        let task = strategy
            .create_merge_task(&[SegmentMergeInfo::new(0, 1, 0)], &LevelInfo::default())
            .unwrap();
        assert!(task.is_empty());
    }

    #[test]
    fn test_bad_parameter_fails_creation() {
        let registry = MergeStrategyRegistry::new();
        let param = MergeStrategyParameter::with_conditions("bogus=1");
        assert!(registry.create("balance_tree", &param).is_err());
    }
}
