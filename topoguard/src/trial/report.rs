use std::fmt::Write as _;
use std::path::Path;

use crate::trial::stats::{aggregate, read_trials, BatchStats, GroupStats, StatsError};

pub const MARKDOWN_FILE: &str = "results.md";
pub const JSON_FILE: &str = "results.json";

fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

fn row(out: &mut String, label: &str, g: &GroupStats) {
    let attempts = g
        .mean_attempts_to_pass
        .map(|a| format!("{:.2}", a))
        .unwrap_or_else(|| "-".to_string());
    let _ = writeln!(
        out,
        "| {} | {} | {} | {} | {} | {} | {} | {} | {} | ${:.4} | {:.1}s |",
        label,
        g.mode,
        g.trials,
        g.passes,
        g.errors,
        percent(g.pass_at_1),
        percent(g.pass_at_k),
        attempts,
        g.prompt_tokens + g.completion_tokens,
        g.cost_usd,
        g.mean_duration_secs
    );
}

fn header(scope: &str, k: u32) -> String {
    format!(
        "| {} | Mode | Trials | Passes | Errors | pass@1 | pass@{} | Attempts to pass | Tokens | Cost | Duration |\n\
         |---|---|---|---|---|---|---|---|---|---|---|\n",
        scope, k
    )
}

pub fn render_markdown(stats: &BatchStats) -> String {
    let mut out = String::from("# TopoGuard results\n\n");
    let _ = writeln!(
        out,
        "{} trial(s): {} passed, {} failed, {} errored.\n",
        stats.total_trials, stats.passes, stats.failures, stats.errors
    );

    out.push_str("## By feedback mode\n\n");
    out.push_str(&header("Scope", stats.k));
    for g in &stats.per_mode {
        row(&mut out, "all tasks", g);
    }

    if !stats.mode_deltas.is_empty() {
        out.push_str("\n## Feedback effect\n\n| Mode | pass@1 | Δ vs none |\n|---|---|---|\n");
        for d in &stats.mode_deltas {
            let delta = d
                .delta_vs_none
                .map(|v| format!("{:+.1} pp", v * 100.0))
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(out, "| {} | {} | {} |", d.mode, percent(d.pass_at_1), delta);
        }
    }

    out.push_str("\n## By task\n\n");
    out.push_str(&header("Task", stats.k));
    for g in &stats.per_task {
        row(&mut out, g.task_id.as_deref().unwrap_or("-"), g);
    }
    out
}

/// Write `results.md` and `results.json` into `dir`.
pub fn write_reports(dir: &Path, stats: &BatchStats) -> Result<(), StatsError> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(MARKDOWN_FILE), render_markdown(stats))?;
    std::fs::write(dir.join(JSON_FILE), serde_json::to_string_pretty(stats)?)?;
    tracing::info!("Wrote {} and {} to {}", MARKDOWN_FILE, JSON_FILE, dir.display());
    Ok(())
}

/// Rebuild the reports next to an existing `trials.jsonl`.
pub fn regenerate(trials: &Path, k: u32) -> Result<BatchStats, StatsError> {
    let records = read_trials(trials)?;
    let stats = aggregate(&records, k);
    let dir = trials.parent().unwrap_or_else(|| Path::new("."));
    write_reports(dir, &stats)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::CostCounters;
    use crate::feedback::FeedbackMode;
    use crate::trial::retry::TrialStatus;
    use crate::trial::stats::{StatsWriter, TrialRecord};

    fn record(mode: FeedbackMode, trial: u32, verdict: TrialStatus) -> TrialRecord {
        TrialRecord {
            task_id: "LDO_AUX_LOGIC".into(),
            feedback_mode: mode,
            trial_index: trial,
            attempts_used: 2,
            verdict,
            per_attempt_violation_summary: vec![],
            wall_clock_secs: 3.0,
            cost_counters: CostCounters::default(),
            error: None,
            generator: "replay".into(),
            run_id: None,
            recorded_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_markdown_tables() {
        let records = vec![
            record(FeedbackMode::Full, 0, TrialStatus::Pass),
            record(FeedbackMode::None, 0, TrialStatus::Fail),
        ];
        let md = render_markdown(&aggregate(&records, 5));
        assert!(md.contains("2 trial(s): 1 passed, 1 failed, 0 errored."));
        assert!(md.contains("| Scope | Mode | Trials |"));
        assert!(md.contains("pass@5"));
        assert!(md.contains("| full | 100.0% | +100.0 pp |"));
        assert!(md.contains("| LDO_AUX_LOGIC | none | 1 | 0 | 0 | 0.0% |"));
    }

    #[test]
    fn test_regenerate_from_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = StatsWriter::create(dir.path()).unwrap();
            writer.append(&record(FeedbackMode::Weak, 0, TrialStatus::Pass)).unwrap();
            writer.append(&record(FeedbackMode::Weak, 1, TrialStatus::Fail)).unwrap();
        }
        let stats = regenerate(&dir.path().join("trials.jsonl"), 1).unwrap();
        assert_eq!(stats.total_trials, 2);
        assert!(dir.path().join(MARKDOWN_FILE).exists());
        let json: BatchStats =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(JSON_FILE)).unwrap()).unwrap();
        assert_eq!(json, stats);
    }
}
