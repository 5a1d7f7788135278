//! Merge strategy parameter strings.
//!
//! A strategy is configured with three `key=value;key=value` strings: input
//! limits (which segments may take part), strategy conditions (when to merge)
//! and output limits (how large the result may grow).

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStrategyParameter {
    #[serde(default)]
    pub input_limit_param: String,

    #[serde(default)]
    pub strategy_conditions: String,

    #[serde(default)]
    pub output_limit_param: String,
}

impl MergeStrategyParameter {
    pub fn new(input_limit: &str, strategy_conditions: &str, output_limit: &str) -> Self {
        MergeStrategyParameter {
            input_limit_param: input_limit.to_string(),
            strategy_conditions: strategy_conditions.to_string(),
            output_limit_param: output_limit.to_string(),
        }
    }

    /// Only strategy conditions, the common case for balance tree.
    pub fn with_conditions(strategy_conditions: &str) -> Self {
        Self::new("", strategy_conditions, "")
    }
}

/// Parsed `key=value;key=value` list, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyParams {
    entries: Vec<(String, String)>,
}

impl StrategyParams {
    pub fn parse(param: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for item in param.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = item.split_once('=').ok_or_else(|| {
                IndexlibError::bad_parameter(format!("malformed strategy parameter [{item}]"))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(IndexlibError::bad_parameter(format!(
                    "empty key in strategy parameter [{item}]"
                )));
            }
            entries.push((key.to_string(), value.trim().to_string()));
        }
        Ok(StrategyParams { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse one parameter value, naming the key on failure.
pub fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        IndexlibError::bad_parameter(format!("invalid value [{value}] for [{key}]"))
    })
}

/// The error every strategy returns for keys it does not know.
pub fn unknown_key(strategy: &str, key: &str) -> IndexlibError {
    IndexlibError::bad_parameter(format!("unknown parameter [{key}] for strategy [{strategy}]"))
}
