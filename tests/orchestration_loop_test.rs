//! Integration tests for the bounded orchestration loop

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    MockRunner, ScriptedStrategy, ShortChangingStrategy, configured_client, ladder, loss_of,
    minimize_loss, outcome, params, setup_test_logging, statuses, test_config,
};
use tokio_util::sync::CancellationToken;
use trialforge::{
    DataUpdate, DomainError, Experiment, ExperimentClient, OrchestrationConfig, ParameterDomain,
    ParameterValue, RunOutcome, SearchSpace, ThresholdEarlyStopping, TrialPoll, TrialStatus,
};

fn options(parallelism: usize, tolerated: f64) -> OrchestrationConfig {
    OrchestrationConfig {
        parallelism,
        tolerated_trial_failure_rate: tolerated,
        poll_interval_ms: 2,
        max_poll_interval_ms: 10,
        poll_backoff_factor: 2.0,
    }
}

#[tokio::test]
async fn test_parallelism_is_never_exceeded() {
    setup_test_logging();
    let client = configured_client(test_config(11)).await;
    let runner = Arc::new(MockRunner::completing_after(2));
    client.configure_runner(runner.clone()).await;

    let report = client
        .run_trials(5, options(2, 0.5), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::BudgetExhausted);
    assert_eq!(report.trials_created, vec![0, 1, 2, 3, 4]);
    assert!(report.non_terminal.is_empty());
    assert_eq!(report.status_counts.get(&TrialStatus::Completed), Some(&5));
    assert!(runner.max_active() <= 2, "ran {} at once", runner.max_active());
    assert_eq!(runner.max_active(), 2);
    assert!(client.get_best_trial().await.unwrap().is_some());
}

#[tokio::test]
async fn test_failure_rate_aborts_run() {
    let client = configured_client(test_config(1)).await;
    let (strategy, _log) = ScriptedStrategy::new(ladder(10));
    client.set_generation_strategy(Box::new(strategy)).await;
    let runner = Arc::new(MockRunner::new(Arc::new(|trial, _count| {
        if matches!(trial.index, 1 | 2) {
            TrialPoll::Failed {
                reason: "out of memory".to_string(),
            }
        } else {
            TrialPoll::Completed {
                update: Some(DataUpdate::new(outcome(&[("loss", loss_of(trial))]))),
            }
        }
    })));
    client.configure_runner(runner).await;

    let report = client
        .run_trials(10, options(1, 0.5), CancellationToken::new())
        .await
        .unwrap();

    match report.outcome {
        RunOutcome::FailureRateExceeded {
            failed, terminal, ..
        } => {
            assert_eq!(failed, 2);
            assert_eq!(terminal, 3);
        }
        other => panic!("expected failure-rate abort, got {other:?}"),
    }
    assert_eq!(report.trials_created, vec![0, 1, 2]);
    let trial = client.get_trial(1).await.unwrap();
    assert_eq!(trial.status_reason.as_deref(), Some("out of memory"));
}

#[tokio::test]
async fn test_runner_refusal_fails_trial_and_run_continues() {
    let client = configured_client(test_config(5)).await;
    let runner = Arc::new(MockRunner::completing_after(1).refusing([0]));
    client.configure_runner(runner.clone()).await;

    let report = client
        .run_trials(3, options(1, 1.0), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::BudgetExhausted);
    assert_eq!(report.status_counts.get(&TrialStatus::Failed), Some(&1));
    assert_eq!(report.status_counts.get(&TrialStatus::Completed), Some(&2));
    assert_eq!(runner.started(), vec![1, 2]);
}

#[tokio::test]
async fn test_launch_failures_count_toward_failure_rate() {
    let client = configured_client(test_config(5)).await;
    let runner = Arc::new(MockRunner::completing_after(1).refusing([0, 1]));
    client.configure_runner(runner.clone()).await;

    let report = client
        .run_trials(2, options(2, 0.2), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        RunOutcome::FailureRateExceeded {
            failed: 2,
            terminal: 2,
            rate: 1.0,
            tolerated: 0.2,
        }
    );
    assert!(!report.outcome.is_success());
    assert_eq!(report.status_counts.get(&TrialStatus::Failed), Some(&2));
    assert!(runner.started().is_empty());
}

#[tokio::test]
async fn test_outstanding_trials_are_adopted() {
    let client = configured_client(test_config(8)).await;
    let before = client.get_next_trials(2, None).await.unwrap();
    assert_eq!(before.keys().copied().collect::<Vec<_>>(), vec![0, 1]);

    let runner = Arc::new(MockRunner::completing_after(1));
    client.configure_runner(runner.clone()).await;
    let report = client
        .run_trials(2, options(2, 0.5), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::BudgetExhausted);
    assert_eq!(report.adopted, vec![0, 1]);
    assert_eq!(report.trials_created, vec![2, 3]);
    assert!(report.non_terminal.is_empty());
    assert_eq!(report.status_counts.get(&TrialStatus::Completed), Some(&4));
    assert_eq!(runner.started(), vec![2, 3]);

    // New trials only start once the adopted ones freed their slots.
    let trials = client.trials().await;
    let freed = trials[0].completed_at.max(trials[1].completed_at).unwrap();
    assert!(trials[2].started_at.unwrap() >= freed);
    assert!(trials[3].started_at.unwrap() >= freed);
}

#[tokio::test]
async fn test_contract_violation_mid_run_reports_outstanding_trials() {
    let client = configured_client(test_config(6)).await;
    client
        .set_generation_strategy(Box::new(ShortChangingStrategy::default()))
        .await;
    client
        .configure_runner(Arc::new(MockRunner::never_finishing()))
        .await;

    let report = client
        .run_trials(3, options(2, 0.5), CancellationToken::new())
        .await
        .unwrap();

    match &report.outcome {
        RunOutcome::Aborted { reason } => assert!(reason.contains("0 candidates"), "{reason}"),
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(report.trials_created, vec![0]);
    assert_eq!(report.non_terminal, vec![0]);
    assert_eq!(
        client.get_trial(0).await.unwrap().status,
        TrialStatus::Running
    );
}

#[tokio::test]
async fn test_cancellation_leaves_trials_running() {
    let client = configured_client(test_config(2)).await;
    client
        .configure_runner(Arc::new(MockRunner::never_finishing()))
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        client.run_trials(4, options(2, 0.5), cancel),
    )
    .await
    .expect("cancellation must end the run")
    .unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.non_terminal, vec![0, 1]);
    let statuses = statuses(&client).await;
    assert!(statuses.values().all(|s| *s == TrialStatus::Running));
    assert!(report.poll_cycles > 0);
}

#[tokio::test]
async fn test_early_stopping_during_run() {
    let client = configured_client(test_config(1)).await;
    let (strategy, _log) = ScriptedStrategy::new(vec![params(0.9, 1), params(0.1, 2)]);
    client.set_generation_strategy(Box::new(strategy)).await;
    client
        .set_early_stopping_strategy(Arc::new(
            ThresholdEarlyStopping::new("loss", 0.5, true, 2).unwrap(),
        ))
        .await;

    let runner = Arc::new(MockRunner::new(Arc::new(|trial, count| {
        let loss = loss_of(trial);
        let update = DataUpdate::at(outcome(&[("loss", loss)]), i64::try_from(count).unwrap());
        if loss < 0.5 && count >= 3 {
            TrialPoll::Completed {
                update: Some(update),
            }
        } else {
            TrialPoll::Running {
                update: Some(update),
            }
        }
    })));
    client.configure_runner(runner.clone()).await;

    let report = client
        .run_trials(2, options(2, 0.5), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::BudgetExhausted);
    assert_eq!(runner.stopped(), vec![0]);
    let stopped = client.get_trial(0).await.unwrap();
    assert_eq!(stopped.status, TrialStatus::EarlyStopped);
    assert_eq!(stopped.data.observations("loss").len(), 2);
    assert_eq!(
        client.get_trial(1).await.unwrap().status,
        TrialStatus::Completed
    );
}

#[tokio::test]
async fn test_exhausted_discrete_space_completes_run() {
    let client = ExperimentClient::new(test_config(4));
    let space = SearchSpace::new().with_parameter(
        "kernel",
        ParameterDomain::Choice {
            values: vec![ParameterValue::from("linear"), ParameterValue::from("rbf")],
        },
    );
    client
        .configure_experiment(Experiment::new("discrete", space))
        .await
        .unwrap();
    client.configure_optimization(minimize_loss()).await.unwrap();
    client
        .configure_runner(Arc::new(MockRunner::completing_after(1)))
        .await;

    let report = client
        .run_trials(5, options(1, 0.5), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::OptimizationComplete);
    assert_eq!(report.trials_created.len(), 2);
    let trials = client.trials().await;
    assert_ne!(trials[0].parameters, trials[1].parameters);
}

#[tokio::test]
async fn test_run_requires_runner() {
    let client = configured_client(test_config(1)).await;
    let err = client
        .run_trials(1, options(1, 0.5), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::TrialRunnerMissing));
}

#[tokio::test]
async fn test_run_rejects_invalid_options() {
    let client = configured_client(test_config(1)).await;
    client
        .configure_runner(Arc::new(MockRunner::completing_after(1)))
        .await;

    let err = client
        .run_trials(1, options(0, 0.5), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ValidationFailed(_)));
    assert!(client.trials().await.is_empty());
}
