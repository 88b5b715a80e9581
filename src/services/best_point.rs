//! Best-point queries over observed trials.
//!
//! Values are raw in-sample observations: the latest value of each metric
//! on trials that completed or were stopped early.

use std::cmp::Ordering;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ExperimentSnapshot, Objective, OptimizationConfig, Outcome, Parameterization, Trial,
    TrialIndex,
};

/// An observed trial reported by a best-point query.
#[derive(Debug, Clone, PartialEq)]
pub struct BestTrial {
    /// Trial index
    pub index: TrialIndex,
    /// Arm name, `"{index}_0"`
    pub arm_name: String,
    /// Parameters the trial ran with
    pub parameters: Parameterization,
    /// Latest value of every metric on the trial
    pub values: Outcome,
    /// Scalar objective value; `None` for multi-objective
    pub objective_value: Option<f64>,
}

impl BestTrial {
    fn from_trial(trial: &Trial, objective_value: Option<f64>) -> Self {
        Self {
            index: trial.index,
            arm_name: trial.arm_name(),
            parameters: trial.parameters.clone(),
            values: trial.data.latest_outcome(),
            objective_value,
        }
    }
}

/// Scalar objective value of `trial`: the metric itself for a single
/// objective, the weighted sum for a scalarized one. `None` when data is
/// missing or the objective is multi-objective.
pub fn objective_value(trial: &Trial, objective: &Objective) -> Option<f64> {
    match objective {
        Objective::Single(single) => trial.data.latest(single.metric.name()).map(|o| o.value.mean),
        Objective::Scalarized { metrics, .. } => metrics.iter().try_fold(0.0, |acc, w| {
            trial
                .data
                .latest(w.metric.name())
                .map(|o| acc + w.weight * o.value.mean)
        }),
        Objective::Multi { .. } => None,
    }
}

/// Whether `trial` satisfies every outcome constraint. A constraint whose
/// metric is missing counts as violated; a relative constraint with no
/// baseline value cannot be judged and counts as satisfied.
pub fn is_feasible(trial: &Trial, config: &OptimizationConfig, baseline: Option<&Trial>) -> bool {
    config.outcome_constraints.iter().all(|constraint| {
        let name = constraint.metric.name();
        let Some(observed) = trial.data.latest(name) else {
            return false;
        };
        let base = baseline
            .and_then(|b| b.data.latest(name))
            .map(|o| o.value.mean);
        constraint
            .is_satisfied(observed.value.mean, base)
            .unwrap_or(true)
    })
}

fn require_config(snapshot: &ExperimentSnapshot) -> DomainResult<&OptimizationConfig> {
    snapshot
        .experiment
        .optimization_config
        .as_ref()
        .ok_or(DomainError::OptimizationConfigMissing)
}

fn scalar_direction(config: &OptimizationConfig, operation: &str) -> DomainResult<bool> {
    config.objective.minimize().ok_or_else(|| {
        DomainError::Unsupported(format!("{operation} is not defined for multi-objective optimization"))
    })
}

fn better(a: f64, b: f64, minimize: bool) -> bool {
    if minimize { a < b } else { a > b }
}

/// Best observed feasible trial for a single or scalarized objective.
pub fn best_trial(snapshot: &ExperimentSnapshot) -> DomainResult<Option<BestTrial>> {
    let config = require_config(snapshot)?;
    let minimize = scalar_direction(config, "best trial")?;
    let baseline = snapshot.status_quo();

    let mut best: Option<(&Trial, f64)> = None;
    for trial in snapshot.observed_trials() {
        if !is_feasible(trial, config, baseline) {
            continue;
        }
        let Some(value) = objective_value(trial, &config.objective) else {
            continue;
        };
        if best.is_none_or(|(_, current)| better(value, current, minimize)) {
            best = Some((trial, value));
        }
    }
    Ok(best.map(|(trial, value)| BestTrial::from_trial(trial, Some(value))))
}

/// Objective values of `trial` oriented so that larger is better, or
/// `None` when any is missing.
fn oriented_values(trial: &Trial, objective: &Objective) -> Option<Vec<f64>> {
    let Objective::Multi { objectives } = objective else {
        return None;
    };
    objectives
        .iter()
        .map(|o| {
            trial
                .data
                .latest(o.metric.name())
                .map(|obs| if o.minimize { -obs.value.mean } else { obs.value.mean })
        })
        .collect()
}

fn dominates(a: &[f64], b: &[f64]) -> bool {
    let mut strictly = false;
    for (x, y) in a.iter().zip(b) {
        match x.partial_cmp(y) {
            Some(Ordering::Less) | None => return false,
            Some(Ordering::Greater) => strictly = true,
            Some(Ordering::Equal) => {}
        }
    }
    strictly
}

/// Non-dominated feasible observed trials.
///
/// For a single or scalarized objective this is the best trial alone.
pub fn pareto_frontier(snapshot: &ExperimentSnapshot) -> DomainResult<Vec<BestTrial>> {
    let config = require_config(snapshot)?;
    if !config.is_multi_objective() {
        return Ok(best_trial(snapshot)?.into_iter().collect());
    }

    let baseline = snapshot.status_quo();
    let points: Vec<(&Trial, Vec<f64>)> = snapshot
        .observed_trials()
        .filter(|t| is_feasible(t, config, baseline))
        .filter_map(|t| oriented_values(t, &config.objective).map(|v| (t, v)))
        .collect();

    Ok(points
        .iter()
        .filter(|(_, values)| !points.iter().any(|(_, other)| dominates(other, values)))
        .map(|(trial, _)| BestTrial::from_trial(trial, None))
        .collect())
}

/// Best-so-far objective value after each observed trial with data, in
/// index order. Infeasible trials contribute the worst value observed.
pub fn optimization_trace(snapshot: &ExperimentSnapshot) -> DomainResult<Vec<f64>> {
    let config = require_config(snapshot)?;
    let minimize = scalar_direction(config, "optimization trace")?;
    let baseline = snapshot.status_quo();

    let points: Vec<(f64, bool)> = snapshot
        .observed_trials()
        .filter_map(|t| {
            objective_value(t, &config.objective).map(|v| (v, is_feasible(t, config, baseline)))
        })
        .collect();
    let Some(worst) = points
        .iter()
        .map(|(v, _)| *v)
        .reduce(|a, b| if better(a, b, minimize) { b } else { a })
    else {
        return Ok(Vec::new());
    };

    let mut trace = Vec::with_capacity(points.len());
    let mut best: Option<f64> = None;
    for (value, feasible) in points {
        let value = if feasible { value } else { worst };
        let next = match best {
            Some(current) if !better(value, current, minimize) => current,
            _ => value,
        };
        best = Some(next);
        trace.push(next);
    }
    Ok(trace)
}

/// Percent improvement of the best trial over the status quo, positive
/// when the best trial is better in the objective's direction.
pub fn improvement_over_baseline(snapshot: &ExperimentSnapshot) -> DomainResult<f64> {
    let config = require_config(snapshot)?;
    let minimize = scalar_direction(config, "improvement over baseline")?;

    let baseline = snapshot
        .status_quo()
        .ok_or_else(|| DomainError::DataRequired("no baseline trial attached".to_string()))?;
    let base = objective_value(baseline, &config.objective).ok_or_else(|| {
        DomainError::DataRequired(format!("baseline trial {} has no objective data", baseline.index))
    })?;
    if base == 0.0 {
        return Err(DomainError::ValidationFailed(
            "baseline objective value is zero, relative improvement is undefined".to_string(),
        ));
    }
    let best = best_trial(snapshot)?
        .and_then(|b| b.objective_value)
        .ok_or_else(|| DomainError::DataRequired("no observed feasible trial".to_string()))?;

    let change = (best - base) / base.abs() * 100.0;
    Ok(if minimize { -change } else { change })
}
