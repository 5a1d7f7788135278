//! Optional metric reporting.
//!
//! Components accept an `Option<Arc<dyn MetricProvider>>`; when it is `None`
//! every call on the derived [`MetricReporter`] is a no-op.

use std::fmt::Debug;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

/// Sink for named gauges.
pub trait MetricProvider: Send + Sync + Debug {
    /// Declare a gauge before the first report.
    fn declare(&self, name: &str, unit: &str);

    /// Report the current value of a gauge.
    fn report(&self, name: &str, value: f64);
}

/// Handle used by components to report through an optional provider.
#[derive(Debug, Clone, Default)]
pub struct MetricReporter {
    provider: Option<Arc<dyn MetricProvider>>,
}

impl MetricReporter {
    /// Wrap an optional provider.
    pub fn new(provider: Option<Arc<dyn MetricProvider>>) -> Self {
        MetricReporter { provider }
    }

    /// A reporter that drops everything.
    pub fn noop() -> Self {
        MetricReporter { provider: None }
    }

    pub fn declare(&self, name: &str, unit: &str) {
        if let Some(provider) = &self.provider {
            provider.declare(name, unit);
        }
    }

    pub fn report(&self, name: &str, value: f64) {
        if let Some(provider) = &self.provider {
            provider.report(name, value);
        }
    }
}

/// A provider that keeps the last reported value of every gauge in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetricProvider {
    gauges: Mutex<AHashMap<String, f64>>,
}

impl InMemoryMetricProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value reported for `name`.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.gauges.lock().get(name).copied()
    }
}

impl MetricProvider for InMemoryMetricProvider {
    fn declare(&self, name: &str, _unit: &str) {
        self.gauges.lock().entry(name.to_string()).or_insert(0.0);
    }

    fn report(&self, name: &str, value: f64) {
        self.gauges.lock().insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_reporter() {
        let reporter = MetricReporter::noop();
        reporter.declare("merge/progress", "percent");
        reporter.report("merge/progress", 50.0);
    }

    #[test]
    fn test_in_memory_provider() {
        let provider = Arc::new(InMemoryMetricProvider::new());
        let reporter = MetricReporter::new(Some(provider.clone()));
        reporter.declare("redo/skip_update_count", "count");
        assert_eq!(provider.value("redo/skip_update_count"), Some(0.0));
        reporter.report("redo/skip_update_count", 3.0);
        assert_eq!(provider.value("redo/skip_update_count"), Some(3.0));
        assert_eq!(provider.value("missing"), None);
    }
}
