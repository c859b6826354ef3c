//! Batch execution across (task, feedback mode, trial) tuples.

use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::ai::Generator;
use crate::core::TopoGuardError;
use crate::feedback::FeedbackMode;
use crate::library::ReferenceLibrary;
use crate::trial::config::BatchConfig;
use crate::trial::report::write_reports;
use crate::trial::retry::{RetryController, TrialOutcome, TrialStatus};
use crate::trial::stats::{aggregate, BatchStats, StatsSink, TrialRecord};

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialJob {
    pub task_id: String,
    pub mode: FeedbackMode,
    pub trial_index: u32,
}

/// Jobs ordered task, then mode, then trial.
pub fn plan(task_ids: &[String], modes: &[FeedbackMode], trials_per_task: u32) -> Vec<TrialJob> {
    let mut jobs = Vec::new();
    for task_id in task_ids {
        for mode in modes {
            for trial_index in 0..trials_per_task {
                jobs.push(TrialJob {
                    task_id: task_id.clone(),
                    mode: *mode,
                    trial_index,
                });
            }
        }
    }
    jobs
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub run_id: uuid::Uuid,
    pub stats: BatchStats,
    pub output_dir: PathBuf,
    /// Jobs never started because shutdown was requested
    pub skipped: usize,
}

pub struct TrialOrchestrator {
    library: Arc<ReferenceLibrary>,
    generator: Arc<dyn Generator>,
    config: BatchConfig,
    shutdown: Option<watch::Receiver<bool>>,
    show_progress: bool,
}

impl TrialOrchestrator {
    pub fn new(library: Arc<ReferenceLibrary>, generator: Arc<dyn Generator>, config: BatchConfig) -> Self {
        Self {
            library,
            generator,
            config,
            shutdown: None,
            show_progress: false,
        }
    }

    /// Stop starting new trials once the receiver reads `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({per_sec}, ETA {eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        pb.set_style(style);
        pb
    }

    pub async fn run(&self) -> Result<BatchSummary, TopoGuardError> {
        let task_ids = self.config.resolve_tasks(&self.library)?;
        let jobs = plan(&task_ids, &self.config.modes(), self.config.trials_per_task);
        let output_dir = self.config.output_dir.clone();
        let run_id = uuid::Uuid::new_v4();
        tracing::info!(
            "Run {}: {} trial(s) over {} task(s) with {} worker(s) using {}",
            run_id,
            jobs.len(),
            task_ids.len(),
            self.config.parallelism,
            self.generator.name()
        );

        let (sink, writer) = StatsSink::spawn(&output_dir).await?;
        let controller = RetryController::new(
            self.library.clone(),
            self.generator.clone(),
            self.config.retry_policy(),
        )
        .with_pricing(self.config.generator.pricing());
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));
        let progress = self.progress_bar(jobs.len());
        let total = jobs.len();

        let mut set = JoinSet::new();
        let mut started = 0;
        for job in jobs {
            if self.shutdown_requested() {
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if self.shutdown_requested() {
                break;
            }
            started += 1;

            let controller = controller.clone();
            let sink = sink.clone();
            let progress = progress.clone();
            let artifacts = output_dir.clone();
            set.spawn(async move {
                let _permit = permit;
                let outcome = run_isolated(&controller, &job).await;
                finish_trial(&outcome, run_id, controller.generator_name(), &sink, &artifacts).await;
                progress.set_message(format!("{} {}", outcome.task_id, outcome.status));
                progress.inc(1);
                outcome.status
            });
        }

        let skipped = total - started;
        if skipped > 0 {
            tracing::warn!("Shutdown requested; {} trial(s) not started, draining {} in flight", skipped, set.len());
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Trial worker did not complete: {}", e);
            }
        }
        progress.finish_with_message("done");

        drop(sink);
        let records = writer
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

        let stats = aggregate(&records, self.config.pass_k);
        let (report_dir, report_stats) = (output_dir.clone(), stats.clone());
        tokio::task::spawn_blocking(move || write_reports(&report_dir, &report_stats))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
        tracing::info!(
            "Batch finished: {} passed, {} failed, {} errored",
            stats.passes,
            stats.failures,
            stats.errors
        );

        Ok(BatchSummary {
            run_id,
            stats,
            output_dir,
            skipped,
        })
    }
}

/// Run one trial so that a panic becomes an ERROR outcome instead of
/// taking the worker down.
async fn run_isolated(controller: &RetryController, job: &TrialJob) -> TrialOutcome {
    let run = controller.run_trial(&job.task_id, job.mode, job.trial_index);
    match AssertUnwindSafe(run).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            TrialOutcome::errored(&job.task_id, job.mode, job.trial_index, format!("trial panicked: {}", reason))
        }
    }
}

/// Verdict line, artifacts and the statistics record for a finished trial.
async fn finish_trial(
    outcome: &TrialOutcome,
    run_id: uuid::Uuid,
    generator: &str,
    sink: &StatsSink,
    output_dir: &Path,
) {
    tracing::info!(
        "task={} mode={} trial={} verdict={} attempts={}",
        outcome.task_id,
        outcome.mode,
        outcome.trial_index,
        outcome.status,
        outcome.attempts_used()
    );
    if let Some(error) = &outcome.error {
        tracing::warn!("task={} trial={}: {}", outcome.task_id, outcome.trial_index, error);
    }

    if outcome.status != TrialStatus::Error || !outcome.attempts.is_empty() {
        if let Err(e) = write_artifacts(outcome, output_dir).await {
            tracing::warn!(
                "task={} mode={} trial={}: failed to write artifacts: {}",
                outcome.task_id,
                outcome.mode,
                outcome.trial_index,
                e
            );
        }
    }

    let record = TrialRecord::from_outcome(outcome, generator).with_run_id(run_id);
    if let Err(e) = sink.record(record).await {
        tracing::error!(
            "task={} mode={} trial={}: {}",
            outcome.task_id,
            outcome.mode,
            outcome.trial_index,
            e
        );
    }
}

pub fn artifact_dir(output_dir: &Path, task_id: &str, mode: FeedbackMode, trial_index: u32) -> PathBuf {
    output_dir
        .join("artifacts")
        .join(task_id)
        .join(mode.as_str())
        .join(format!("trial_{}", trial_index))
}

async fn write_artifacts(outcome: &TrialOutcome, output_dir: &Path) -> std::io::Result<()> {
    let dir = artifact_dir(output_dir, &outcome.task_id, outcome.mode, outcome.trial_index);
    tokio::fs::create_dir_all(&dir).await?;
    if let Some(graph) = &outcome.final_graph {
        tokio::fs::write(dir.join("final.net"), graph.to_netlist()).await?;
    }
    if let Some(text) = &outcome.final_text {
        tokio::fs::write(dir.join("final_output.txt"), text).await?;
    }
    for attempt in &outcome.attempts {
        tokio::fs::write(dir.join(format!("feedback_{}.txt", attempt.attempt)), &attempt.feedback).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ReplayGenerator;

    const VDIV_PASS: &str = "```netlist\n(netlist\n  (components (comp (ref R1) (part R) (value 100k)) (comp (ref R2) (part R) (value 100k)))\n  \
        (nets (net (name VIN) (node (ref R1) (pin 1)))\n    (net (name VSENSE) (node (ref R1) (pin 2)) (node (ref R2) (pin 1)))\n    \
        (net (name GND) (node (ref R2) (pin 2)))))\n```";

    fn config(output: &Path, tasks: &str) -> BatchConfig {
        BatchConfig {
            tasks: tasks.into(),
            feedback_modes: vec![FeedbackMode::Full, FeedbackMode::None],
            trials_per_task: 2,
            max_attempts: 2,
            parallelism: 3,
            call_timeout_secs: 5,
            external_call_retries: 0,
            initial_backoff_ms: 1,
            output_dir: output.to_path_buf(),
            ..BatchConfig::default()
        }
    }

    #[test]
    fn test_plan_order() {
        let jobs = plan(&["A".into(), "B".into()], &[FeedbackMode::Weak], 2);
        assert_eq!(jobs.len(), 4);
        assert_eq!(jobs[1].task_id, "A");
        assert_eq!(jobs[1].trial_index, 1);
        assert_eq!(jobs[2].task_id, "B");
    }

    #[tokio::test]
    async fn test_batch_isolates_failing_tasks() {
        let replay_dir = tempfile::tempdir().unwrap();
        std::fs::write(replay_dir.path().join("VDIV_BUS_SENSE.1.txt"), VDIV_PASS).unwrap();
        let out = tempfile::tempdir().unwrap();

        // LDO has no recording, so its trials end in ERROR without touching VDIV's.
        let orchestrator = TrialOrchestrator::new(
            Arc::new(ReferenceLibrary::builtin().unwrap()),
            Arc::new(ReplayGenerator::from_dir(replay_dir.path()).unwrap()),
            config(out.path(), "1,LDO_AUX_LOGIC"),
        );
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.stats.total_trials, 8);
        assert_eq!(summary.stats.passes, 4);
        assert_eq!(summary.stats.errors, 4);
        assert_eq!(summary.skipped, 0);

        let trials = std::fs::read_to_string(out.path().join("trials.jsonl")).unwrap();
        assert_eq!(trials.lines().count(), 8);
        assert!(out.path().join("results.md").exists());
        assert!(out.path().join("summary.csv").exists());

        let artifacts = artifact_dir(out.path(), "VDIV_BUS_SENSE", FeedbackMode::Full, 1);
        assert!(artifacts.join("final.net").exists());
        assert_eq!(
            std::fs::read_to_string(artifacts.join("feedback_1.txt")).unwrap(),
            "Verification PASSED."
        );
    }

    #[tokio::test]
    async fn test_shutdown_before_start_skips_everything() {
        let out = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(true);
        let orchestrator = TrialOrchestrator::new(
            Arc::new(ReferenceLibrary::builtin().unwrap()),
            Arc::new(ReplayGenerator::default()),
            config(out.path(), "1"),
        )
        .with_shutdown(rx);

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.skipped, 4);
        assert_eq!(summary.stats.total_trials, 0);
        drop(tx);
    }

    #[tokio::test]
    async fn test_unknown_task_rejects_batch() {
        let out = tempfile::tempdir().unwrap();
        let orchestrator = TrialOrchestrator::new(
            Arc::new(ReferenceLibrary::builtin().unwrap()),
            Arc::new(ReplayGenerator::default()),
            config(out.path(), "NOPE"),
        );
        assert!(matches!(orchestrator.run().await, Err(TopoGuardError::Config(_))));
    }
}
