//! Optimization objective and outcome constraints.
//!
//! The objective is a sum type over single, scalarized and multi-objective
//! goals. Every variant exposes the same slot lookup by metric name so a
//! metric implementation can be substituted without changing structure.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::MetricHandle;

/// One metric optimized in one direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleObjective {
    /// Metric being optimized
    pub metric: MetricHandle,
    /// Lower is better when set
    pub minimize: bool,
}

impl SingleObjective {
    /// Objective that prefers lower values.
    pub fn minimize(metric: MetricHandle) -> Self {
        Self {
            metric,
            minimize: true,
        }
    }

    /// Objective that prefers higher values.
    pub fn maximize(metric: MetricHandle) -> Self {
        Self {
            metric,
            minimize: false,
        }
    }
}

/// Metric combined linearly into a scalarized objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedMetric {
    /// Metric contributing to the sum
    pub metric: MetricHandle,
    /// Coefficient applied to the metric's mean
    pub weight: f64,
}

/// What the optimization is trying to achieve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Objective {
    /// One metric, one direction.
    Single(SingleObjective),
    /// Ordered weighted sum of metrics.
    Scalarized {
        /// Terms of the sum
        metrics: Vec<WeightedMetric>,
        /// Lower sums are better when set
        minimize: bool,
    },
    /// Ordered independent sub-objectives.
    Multi {
        /// Sub-objectives, each with its own direction
        objectives: Vec<SingleObjective>,
    },
}

impl Objective {
    /// Metric names in declaration order.
    pub fn metric_names(&self) -> Vec<String> {
        self.metrics().map(|m| m.name().to_string()).collect()
    }

    fn metrics(&self) -> Box<dyn Iterator<Item = &MetricHandle> + '_> {
        match self {
            Self::Single(single) => Box::new(std::iter::once(&single.metric)),
            Self::Scalarized { metrics, .. } => Box::new(metrics.iter().map(|w| &w.metric)),
            Self::Multi { objectives } => Box::new(objectives.iter().map(|o| &o.metric)),
        }
    }

    /// First slot holding a metric named `name`, scanning in declaration order.
    pub fn metric_slot_mut(&mut self, name: &str) -> Option<&mut MetricHandle> {
        match self {
            Self::Single(single) => (single.metric.name() == name).then_some(&mut single.metric),
            Self::Scalarized { metrics, .. } => metrics
                .iter_mut()
                .map(|w| &mut w.metric)
                .find(|m| m.name() == name),
            Self::Multi { objectives } => objectives
                .iter_mut()
                .map(|o| &mut o.metric)
                .find(|m| m.name() == name),
        }
    }

    /// Whether there is more than one independent sub-objective.
    pub fn is_multi_objective(&self) -> bool {
        matches!(self, Self::Multi { .. })
    }

    /// Direction of a scalar objective; `None` for multi-objective.
    pub fn minimize(&self) -> Option<bool> {
        match self {
            Self::Single(single) => Some(single.minimize),
            Self::Scalarized { minimize, .. } => Some(*minimize),
            Self::Multi { .. } => None,
        }
    }
}

/// Comparison used by an outcome constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    /// Metric must be at least the bound.
    Geq,
    /// Metric must be at most the bound.
    Leq,
}

/// Threshold a non-optimized metric must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeConstraint {
    /// Constrained metric
    pub metric: MetricHandle,
    /// Direction of the bound
    pub op: ComparisonOp,
    /// Threshold, absolute or a fraction of the status quo
    pub bound: f64,
    /// Bound is a fraction of the status quo's value rather than absolute.
    #[serde(default)]
    pub relative: bool,
}

impl OutcomeConstraint {
    /// Absolute constraint.
    pub fn new(metric: MetricHandle, op: ComparisonOp, bound: f64) -> Self {
        Self {
            metric,
            op,
            bound,
            relative: false,
        }
    }

    /// Make the bound relative to the status quo.
    pub fn relative(mut self) -> Self {
        self.relative = true;
        self
    }

    /// Whether `value` satisfies the constraint. `None` when the constraint
    /// is relative and no baseline value is known.
    pub fn is_satisfied(&self, value: f64, baseline: Option<f64>) -> Option<bool> {
        let threshold = if self.relative {
            self.bound * baseline?
        } else {
            self.bound
        };
        Some(match self.op {
            ComparisonOp::Geq => value >= threshold,
            ComparisonOp::Leq => value <= threshold,
        })
    }
}

/// Objective plus outcome constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// What is optimized
    pub objective: Objective,
    /// Constraints a trial must satisfy to be feasible
    #[serde(default)]
    pub outcome_constraints: Vec<OutcomeConstraint>,
}

impl OptimizationConfig {
    /// Config with no outcome constraints.
    pub fn new(objective: Objective) -> Self {
        Self {
            objective,
            outcome_constraints: Vec::new(),
        }
    }

    /// Append an outcome constraint.
    pub fn with_constraint(mut self, constraint: OutcomeConstraint) -> Self {
        self.outcome_constraints.push(constraint);
        self
    }

    /// Metrics a trial must report to count as complete: every objective
    /// metric and every constrained metric.
    pub fn metric_names(&self) -> BTreeSet<String> {
        self.objective
            .metric_names()
            .into_iter()
            .chain(
                self.outcome_constraints
                    .iter()
                    .map(|c| c.metric.name().to_string()),
            )
            .collect()
    }

    /// All metric handles in resolution order.
    pub fn metric_handles(&self) -> Vec<MetricHandle> {
        self.objective
            .metrics()
            .cloned()
            .chain(self.outcome_constraints.iter().map(|c| c.metric.clone()))
            .collect()
    }

    /// Delegates to [`Objective::is_multi_objective`].
    pub fn is_multi_objective(&self) -> bool {
        self.objective.is_multi_objective()
    }

    /// Structural checks: non-empty objective, unique metric names, usable
    /// weights and bounds.
    pub fn validate(&self) -> DomainResult<()> {
        match &self.objective {
            Objective::Single(_) => {}
            Objective::Scalarized { metrics, .. } => {
                if metrics.is_empty() {
                    return Err(DomainError::ValidationFailed(
                        "scalarized objective has no metrics".to_string(),
                    ));
                }
                if let Some(w) = metrics.iter().find(|w| w.weight == 0.0 || !w.weight.is_finite()) {
                    return Err(DomainError::ValidationFailed(format!(
                        "metric '{}' has unusable weight {}",
                        w.metric.name(),
                        w.weight
                    )));
                }
            }
            Objective::Multi { objectives } => {
                if objectives.len() < 2 {
                    return Err(DomainError::ValidationFailed(
                        "multi-objective needs at least two objectives".to_string(),
                    ));
                }
            }
        }

        let mut seen = BTreeSet::new();
        for handle in self.metric_handles() {
            if handle.name().is_empty() {
                return Err(DomainError::ValidationFailed("metric name cannot be empty".to_string()));
            }
            if !seen.insert(handle.name().to_string()) {
                return Err(DomainError::ValidationFailed(format!(
                    "metric '{}' appears more than once in the optimization config",
                    handle.name()
                )));
            }
        }

        if let Some(c) = self.outcome_constraints.iter().find(|c| !c.bound.is_finite()) {
            return Err(DomainError::ValidationFailed(format!(
                "constraint on '{}' has a non-finite bound",
                c.metric.name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(name: &str) -> MetricHandle {
        MetricHandle::placeholder(name)
    }

    #[test]
    fn test_metric_names_include_constraints() {
        let config = OptimizationConfig::new(Objective::Single(SingleObjective::minimize(metric("loss"))))
            .with_constraint(OutcomeConstraint::new(metric("latency"), ComparisonOp::Leq, 10.0));
        let names: Vec<_> = config.metric_names().into_iter().collect();
        assert_eq!(names, vec!["latency".to_string(), "loss".to_string()]);
    }

    #[test]
    fn test_metric_slot_lookup_per_variant() {
        let mut single = Objective::Single(SingleObjective::maximize(metric("acc")));
        assert!(single.metric_slot_mut("acc").is_some());
        assert!(single.metric_slot_mut("loss").is_none());

        let mut scalarized = Objective::Scalarized {
            metrics: vec![
                WeightedMetric { metric: metric("a"), weight: 1.0 },
                WeightedMetric { metric: metric("b"), weight: 0.5 },
            ],
            minimize: false,
        };
        assert_eq!(scalarized.metric_slot_mut("b").unwrap().name(), "b");

        let mut multi = Objective::Multi {
            objectives: vec![
                SingleObjective::minimize(metric("a")),
                SingleObjective::maximize(metric("b")),
            ],
        };
        assert_eq!(multi.metric_slot_mut("a").unwrap().name(), "a");
        assert!(multi.metric_slot_mut("c").is_none());
        assert_eq!(multi.minimize(), None);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let config = OptimizationConfig::new(Objective::Single(SingleObjective::minimize(metric("loss"))))
            .with_constraint(OutcomeConstraint::new(metric("loss"), ComparisonOp::Leq, 1.0));
        assert!(matches!(config.validate(), Err(DomainError::ValidationFailed(_))));
    }

    #[test]
    fn test_validate_rejects_zero_weight_and_small_multi() {
        let scalarized = OptimizationConfig::new(Objective::Scalarized {
            metrics: vec![WeightedMetric { metric: metric("a"), weight: 0.0 }],
            minimize: true,
        });
        assert!(scalarized.validate().is_err());

        let multi = OptimizationConfig::new(Objective::Multi {
            objectives: vec![SingleObjective::minimize(metric("a"))],
        });
        assert!(multi.validate().is_err());
    }

    #[test]
    fn test_constraint_satisfaction() {
        let absolute = OutcomeConstraint::new(metric("qps"), ComparisonOp::Geq, 100.0);
        assert_eq!(absolute.is_satisfied(120.0, None), Some(true));
        assert_eq!(absolute.is_satisfied(80.0, None), Some(false));

        let relative = OutcomeConstraint::new(metric("qps"), ComparisonOp::Geq, 0.95).relative();
        assert_eq!(relative.is_satisfied(96.0, None), None);
        assert_eq!(relative.is_satisfied(96.0, Some(100.0)), Some(true));
        assert_eq!(relative.is_satisfied(90.0, Some(100.0)), Some(false));
    }

    #[test]
    fn test_objective_serde_round_trip() {
        let config = OptimizationConfig::new(Objective::Multi {
            objectives: vec![
                SingleObjective::minimize(metric("a")),
                SingleObjective::maximize(metric("b")),
            ],
        })
        .with_constraint(OutcomeConstraint::new(metric("c"), ComparisonOp::Leq, 3.0).relative());
        let json = serde_json::to_string(&config).unwrap();
        let restored: OptimizationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }
}
