//! Batch trials: configuration, the per-trial retry loop, the worker pool
//! and the statistics it produces.

pub mod config;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod stats;

pub use config::{BatchConfig, ConfigError, TaskSelection, TaskSelector};
pub use orchestrator::{artifact_dir, plan, BatchSummary, TrialJob, TrialOrchestrator};
pub use report::{regenerate, render_markdown, write_reports};
pub use retry::{
    transition, AttemptEvent, AttemptRecord, AttemptState, RetryContext, RetryController, RetryPolicy,
    StageTimings, TrialOutcome, TrialStatus,
};
pub use stats::{
    aggregate, pass_at_k, read_trials, BatchStats, GroupStats, ModeDelta, StatsError, StatsSink, StatsWriter,
    TrialRecord,
};
