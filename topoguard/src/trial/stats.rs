//! Trial records, the statistics sink and pass@k aggregation.
//!
//! All records go through one writer thread. Workers only hold a
//! [`StatsSink`] sender, so `trials.jsonl` and `summary.csv` are never
//! written from two places at once. File I/O runs on the blocking pool,
//! never on a runtime worker.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ai::CostCounters;
use crate::analyzer::Violation;
use crate::feedback::FeedbackMode;
use crate::trial::retry::{StageTimings, TrialOutcome, TrialStatus};

pub const TRIALS_FILE: &str = "trials.jsonl";
pub const SUMMARY_FILE: &str = "summary.csv";
const CSV_HEADER: &str = "task,feedback,trial,status,attempts,duration,prompt_tokens,completion_tokens,cost";

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("failed to write statistics: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed trial record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("statistics writer has shut down")]
    Closed,
}

/// Condensed view of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt: u32,
    pub passed: bool,
    pub violations: Vec<Violation>,
    pub timings: StageTimings,
}

/// One line of `trials.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub task_id: String,
    pub feedback_mode: FeedbackMode,
    pub trial_index: u32,
    pub attempts_used: u32,
    pub verdict: TrialStatus,
    pub per_attempt_violation_summary: Vec<AttemptSummary>,
    pub wall_clock_secs: f64,
    pub cost_counters: CostCounters,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub generator: String,
    /// Batch this trial belongs to; `trials.jsonl` may hold several runs
    #[serde(default)]
    pub run_id: Option<uuid::Uuid>,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

impl TrialRecord {
    pub fn from_outcome(outcome: &TrialOutcome, generator: &str) -> Self {
        Self {
            task_id: outcome.task_id.clone(),
            feedback_mode: outcome.mode,
            trial_index: outcome.trial_index,
            attempts_used: outcome.attempts_used(),
            verdict: outcome.status,
            per_attempt_violation_summary: outcome
                .attempts
                .iter()
                .map(|a| AttemptSummary {
                    attempt: a.attempt,
                    passed: a.passed,
                    violations: a.violations.clone(),
                    timings: a.timings,
                })
                .collect(),
            wall_clock_secs: outcome.duration.as_secs_f64(),
            cost_counters: outcome.costs,
            error: outcome.error.clone(),
            generator: generator.to_string(),
            run_id: None,
            recorded_at: chrono::Utc::now(),
        }
    }

    pub fn with_run_id(mut self, run_id: uuid::Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    fn csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{:.3},{},{},{:.6}",
            self.task_id,
            self.feedback_mode,
            self.trial_index,
            self.verdict,
            self.attempts_used,
            self.wall_clock_secs,
            self.cost_counters.prompt_tokens,
            self.cost_counters.completion_tokens,
            self.cost_counters.estimated_usd
        )
    }
}

/// Append-only writer for `trials.jsonl` and `summary.csv`. Flushed after
/// every record and again when dropped.
pub struct StatsWriter {
    jsonl: BufWriter<File>,
    csv: BufWriter<File>,
    written: usize,
}

impl StatsWriter {
    pub fn create(dir: &Path) -> Result<Self, StatsError> {
        std::fs::create_dir_all(dir)?;
        let jsonl = OpenOptions::new().create(true).append(true).open(dir.join(TRIALS_FILE))?;

        let csv_path = dir.join(SUMMARY_FILE);
        let fresh = std::fs::metadata(&csv_path).map(|m| m.len() == 0).unwrap_or(true);
        let mut csv = BufWriter::new(OpenOptions::new().create(true).append(true).open(&csv_path)?);
        if fresh {
            writeln!(csv, "{}", CSV_HEADER)?;
            csv.flush()?;
        }

        Ok(Self {
            jsonl: BufWriter::new(jsonl),
            csv,
            written: 0,
        })
    }

    pub fn append(&mut self, record: &TrialRecord) -> Result<(), StatsError> {
        let line = serde_json::to_string(record)?;
        writeln!(self.jsonl, "{}", line)?;
        self.jsonl.flush()?;
        writeln!(self.csv, "{}", record.csv_row())?;
        self.csv.flush()?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl Drop for StatsWriter {
    fn drop(&mut self) {
        if let Err(e) = self.jsonl.flush().and_then(|_| self.csv.flush()) {
            tracing::error!("Failed to flush statistics on close: {}", e);
        } else {
            tracing::debug!("Statistics flushed after {} record(s)", self.written);
        }
    }
}

/// Sender half handed to workers.
#[derive(Debug, Clone)]
pub struct StatsSink {
    tx: mpsc::Sender<TrialRecord>,
}

impl StatsSink {
    /// Start the writer on the blocking pool. The handle resolves to every
    /// record received, once all sinks are dropped.
    pub async fn spawn(dir: &Path) -> Result<(Self, JoinHandle<Vec<TrialRecord>>), StatsError> {
        let dir = dir.to_path_buf();
        let mut writer = tokio::task::spawn_blocking(move || StatsWriter::create(&dir))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
        let (tx, mut rx) = mpsc::channel::<TrialRecord>(64);

        let handle = tokio::task::spawn_blocking(move || {
            let mut records = Vec::new();
            while let Some(record) = rx.blocking_recv() {
                if let Err(e) = writer.append(&record) {
                    tracing::error!(
                        "task={} mode={} trial={}: failed to record trial: {}",
                        record.task_id,
                        record.feedback_mode,
                        record.trial_index,
                        e
                    );
                }
                records.push(record);
            }
            records
        });

        Ok((Self { tx }, handle))
    }

    pub async fn record(&self, record: TrialRecord) -> Result<(), StatsError> {
        self.tx.send(record).await.map_err(|_| StatsError::Closed)
    }
}

pub fn read_trials(path: &Path) -> Result<Vec<TrialRecord>, StatsError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

pub fn trials_path(dir: &Path) -> PathBuf {
    dir.join(TRIALS_FILE)
}

/// Unbiased pass@k for `c` passes out of `n` trials. `k` is clamped to `n`.
pub fn pass_at_k(n: u32, c: u32, k: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let k = k.clamp(1, n);
    if n - c < k {
        return 1.0;
    }
    // 1 - C(n-c, k) / C(n, k)
    let mut fail_all = 1.0;
    for i in (n - c + 1)..=n {
        fail_all *= 1.0 - k as f64 / i as f64;
    }
    1.0 - fail_all
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    /// Absent for per-mode rows
    pub task_id: Option<String>,
    pub mode: FeedbackMode,
    pub trials: u32,
    pub passes: u32,
    pub errors: u32,
    pub pass_at_1: f64,
    pub pass_at_k: f64,
    pub mean_attempts_to_pass: Option<f64>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub mean_duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeDelta {
    pub mode: FeedbackMode,
    pub pass_at_1: f64,
    /// pass@1 minus the `none` mode's; absent when `none` was not run
    pub delta_vs_none: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub k: u32,
    pub total_trials: u32,
    pub passes: u32,
    pub failures: u32,
    pub errors: u32,
    pub per_task: Vec<GroupStats>,
    pub per_mode: Vec<GroupStats>,
    pub mode_deltas: Vec<ModeDelta>,
}

fn group(task_id: Option<String>, mode: FeedbackMode, records: &[&TrialRecord], k: u32) -> GroupStats {
    let trials = records.len() as u32;
    let passes = records.iter().filter(|r| r.verdict == TrialStatus::Pass).count() as u32;
    let errors = records.iter().filter(|r| r.verdict == TrialStatus::Error).count() as u32;
    let passing: Vec<u32> = records
        .iter()
        .filter(|r| r.verdict == TrialStatus::Pass)
        .map(|r| r.attempts_used)
        .collect();
    let mean_attempts_to_pass =
        (!passing.is_empty()).then(|| passing.iter().sum::<u32>() as f64 / passing.len() as f64);
    let mean_duration_secs = if trials == 0 {
        0.0
    } else {
        records.iter().map(|r| r.wall_clock_secs).sum::<f64>() / trials as f64
    };

    GroupStats {
        task_id,
        mode,
        trials,
        passes,
        errors,
        pass_at_1: pass_at_k(trials, passes, 1),
        pass_at_k: pass_at_k(trials, passes, k),
        mean_attempts_to_pass,
        prompt_tokens: records.iter().map(|r| r.cost_counters.prompt_tokens).sum(),
        completion_tokens: records.iter().map(|r| r.cost_counters.completion_tokens).sum(),
        cost_usd: records.iter().map(|r| r.cost_counters.estimated_usd).sum(),
        mean_duration_secs,
    }
}

/// Per-(task, mode) rows, per-mode rows averaged over tasks, and the
/// pass@1 delta of each mode against `none`.
pub fn aggregate(records: &[TrialRecord], k: u32) -> BatchStats {
    let mut by_task: BTreeMap<(String, FeedbackMode), Vec<&TrialRecord>> = BTreeMap::new();
    for record in records {
        by_task
            .entry((record.task_id.clone(), record.feedback_mode))
            .or_default()
            .push(record);
    }

    let per_task: Vec<GroupStats> = by_task
        .iter()
        .map(|((task, mode), rs)| group(Some(task.clone()), *mode, rs, k))
        .collect();

    let mut per_mode = Vec::new();
    for mode in FeedbackMode::ALL {
        let rows: Vec<&GroupStats> = per_task.iter().filter(|g| g.mode == mode).collect();
        if rows.is_empty() {
            continue;
        }
        let mode_records: Vec<&TrialRecord> = records.iter().filter(|r| r.feedback_mode == mode).collect();
        let mut stats = group(None, mode, &mode_records, k);
        let tasks = rows.len() as f64;
        stats.pass_at_1 = rows.iter().map(|g| g.pass_at_1).sum::<f64>() / tasks;
        stats.pass_at_k = rows.iter().map(|g| g.pass_at_k).sum::<f64>() / tasks;
        per_mode.push(stats);
    }

    let baseline = per_mode
        .iter()
        .find(|g| g.mode == FeedbackMode::None)
        .map(|g| g.pass_at_1);
    let mode_deltas = per_mode
        .iter()
        .map(|g| ModeDelta {
            mode: g.mode,
            pass_at_1: g.pass_at_1,
            delta_vs_none: baseline.map(|b| g.pass_at_1 - b),
        })
        .collect();

    let count = |status: TrialStatus| records.iter().filter(|r| r.verdict == status).count() as u32;
    BatchStats {
        k,
        total_trials: records.len() as u32,
        passes: count(TrialStatus::Pass),
        failures: count(TrialStatus::Fail),
        errors: count(TrialStatus::Error),
        per_task,
        per_mode,
        mode_deltas,
    }
}
