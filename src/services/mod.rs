//! Engine services: trial storage, data attachment, completion, generation
//! and early stopping.

pub mod best_point;
pub mod completion_evaluator;
pub mod data_attacher;
pub mod default_strategy;
pub mod early_stopping;
pub mod generation_service;
pub mod metric_resolver;
pub mod trial_store;

pub use best_point::BestTrial;
pub use completion_evaluator::CompletionEvaluator;
pub use data_attacher::{DataAttacher, FetchScope};
pub use default_strategy::{DEFAULT_STRATEGY_NAME, DefaultGenerationStrategy};
pub use early_stopping::ThresholdEarlyStopping;
pub use generation_service::GenerationService;
pub use metric_resolver::{MetricResolution, absorb_tracking_metrics, resolve_metric};
pub use trial_store::TrialStore;
