//! Metric port and the serializable metric handle.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::errors::DomainResult;
use crate::domain::models::{MetricValue, Trial};

/// A value fetched by a metric, optionally at a progression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricObservation {
    /// Fetched value
    pub value: MetricValue,
    /// Progression of the value; `None` for a final value
    pub progression: Option<i64>,
}

/// Named capability able to produce outcome values for a trial.
#[async_trait]
pub trait Metric: Send + Sync + fmt::Debug {
    /// Unique metric name within the experiment.
    fn name(&self) -> &str;

    /// Whether `fetch` yields interim values while the trial is running.
    fn is_available_while_running(&self) -> bool {
        false
    }

    /// Whether `fetch` can produce data at all.
    fn is_fetchable(&self) -> bool {
        true
    }

    /// Fetch the current value for `trial`, if any.
    async fn fetch(&self, trial: &Trial) -> DomainResult<Option<MetricObservation>>;
}

/// Metric known only by name. Data for it must be attached manually.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderMetric {
    name: String,
}

impl PlaceholderMetric {
    /// Placeholder for the named metric.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Metric for PlaceholderMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_fetchable(&self) -> bool {
        false
    }

    async fn fetch(&self, _trial: &Trial) -> DomainResult<Option<MetricObservation>> {
        Ok(None)
    }
}

/// Shared handle to a metric implementation.
///
/// Serializes as the metric name and deserializes into a
/// [`PlaceholderMetric`]; live implementations are re-attached after a
/// restore through the metric resolver.
#[derive(Clone)]
pub struct MetricHandle(Arc<dyn Metric>);

impl MetricHandle {
    /// Wrap a live implementation.
    pub fn new(metric: Arc<dyn Metric>) -> Self {
        Self(metric)
    }

    /// Handle to a [`PlaceholderMetric`] with the given name.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self(Arc::new(PlaceholderMetric::new(name)))
    }

    /// Name of the wrapped metric.
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// The wrapped implementation.
    pub fn metric(&self) -> &Arc<dyn Metric> {
        &self.0
    }

    /// Whether both handles point at the same implementation.
    pub fn same_implementation(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Arc<dyn Metric>> for MetricHandle {
    fn from(metric: Arc<dyn Metric>) -> Self {
        Self(metric)
    }
}

impl fmt::Debug for MetricHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MetricHandle").field(&self.name()).finish()
    }
}

impl PartialEq for MetricHandle {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Serialize for MetricHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for MetricHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::placeholder(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Parameterization;

    #[tokio::test]
    async fn test_placeholder_never_fetches() {
        let metric = PlaceholderMetric::new("loss");
        let trial = Trial::new(0, Parameterization::new());
        assert_eq!(metric.name(), "loss");
        assert!(!metric.is_fetchable());
        assert_eq!(metric.fetch(&trial).await.unwrap(), None);
    }

    #[test]
    fn test_handle_serializes_by_name() {
        let handle = MetricHandle::placeholder("accuracy");
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, "\"accuracy\"");

        let restored: MetricHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, handle);
        assert!(!restored.same_implementation(&handle));
    }
}
