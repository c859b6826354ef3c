//! Batch trials driven by recorded generator output

use topoguard::prelude::*;
use topoguard::trial::{artifact_dir, read_trials, RetryController, RetryPolicy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Replay directory where VDIV first taps VSENSE at VIN, then fixes it.
fn replay_dir(fix_on_second: bool) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::copy(
        fixture_path("vdiv_tapped_at_vin.txt"),
        dir.path().join("VDIV_BUS_SENSE.1.txt"),
    )
    .unwrap();
    if fix_on_second {
        std::fs::copy(
            fixture_path("vdiv_midpoint.txt"),
            dir.path().join("VDIV_BUS_SENSE.2.txt"),
        )
        .unwrap();
    }
    dir
}

fn batch(output: &Path, modes: Vec<FeedbackMode>, max_attempts: u32) -> BatchConfig {
    BatchConfig {
        tasks: "VDIV_BUS_SENSE".into(),
        feedback_modes: modes,
        trials_per_task: 3,
        max_attempts,
        parallelism: 2,
        call_timeout_secs: 5,
        external_call_retries: 0,
        initial_backoff_ms: 1,
        output_dir: output.to_path_buf(),
        ..BatchConfig::default()
    }
}

#[tokio::test]
async fn test_feedback_loop_recovers_on_second_attempt() {
    let replay = replay_dir(true);
    let out = tempfile::tempdir().unwrap();
    let generator = Arc::new(ReplayGenerator::from_dir(replay.path()).unwrap());

    let summary = TrialOrchestrator::new(
        Arc::new(ReferenceLibrary::builtin().unwrap()),
        generator,
        batch(out.path(), vec![FeedbackMode::Full], 3),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.stats.total_trials, 3);
    assert_eq!(summary.stats.passes, 3);
    let full = &summary.stats.per_mode[0];
    assert_eq!(full.mean_attempts_to_pass, Some(2.0));

    let records = read_trials(&out.path().join("trials.jsonl")).unwrap();
    assert!(records.iter().all(|r| r.attempts_used == 2));
    let first = &records[0].per_attempt_violation_summary[0];
    assert!(!first.passed);
    assert_eq!(first.violations[0].kind, ViolationKind::PortMismatch);

    let dir = artifact_dir(out.path(), "VDIV_BUS_SENSE", FeedbackMode::Full, 0);
    let feedback = std::fs::read_to_string(dir.join("feedback_1.txt")).unwrap();
    assert!(feedback.contains("[StructuralViolation/PortMismatch]"), "{}", feedback);
    assert!(feedback.contains("Suggested fix:"), "{}", feedback);
    let final_net = std::fs::read_to_string(dir.join("final.net")).unwrap();
    assert!(final_net.contains("(name VSENSE)"), "{}", final_net);
}

#[tokio::test]
async fn test_none_mode_feedback_does_not_change_between_attempts() {
    let replay = replay_dir(false);
    let out = tempfile::tempdir().unwrap();
    let generator = Arc::new(ReplayGenerator::from_dir(replay.path()).unwrap());

    let summary = TrialOrchestrator::new(
        Arc::new(ReferenceLibrary::builtin().unwrap()),
        generator,
        batch(out.path(), vec![FeedbackMode::None], 3),
    )
    .run()
    .await
    .unwrap();
    assert_eq!(summary.stats.failures, 3);

    let dir = artifact_dir(out.path(), "VDIV_BUS_SENSE", FeedbackMode::None, 2);
    let first = std::fs::read_to_string(dir.join("feedback_1.txt")).unwrap();
    let second = std::fs::read_to_string(dir.join("feedback_2.txt")).unwrap();
    assert_eq!(first, second);
    assert!(!first.contains("VSENSE"));
    assert!(dir.join("final_output.txt").exists());
}

#[tokio::test]
async fn test_controller_reports_feedback_per_mode() {
    let replay = replay_dir(false);
    let library = Arc::new(ReferenceLibrary::builtin().unwrap());
    let generator = Arc::new(ReplayGenerator::from_dir(replay.path()).unwrap());
    let policy = RetryPolicy {
        max_attempts: 1,
        call_timeout: Duration::from_secs(5),
        external_call_retries: 0,
        initial_backoff: Duration::from_millis(1),
    };
    let controller = RetryController::new(library, generator, policy);

    let weak = controller.run_trial("VDIV_BUS_SENSE", FeedbackMode::Weak, 0).await;
    assert_eq!(weak.status, TrialStatus::Fail);
    assert!(weak.attempts[0].feedback.contains("Issues: PortMismatch"));

    let full = controller.run_trial("VDIV_BUS_SENSE", FeedbackMode::Full, 0).await;
    assert!(full.attempts[0].feedback.len() > weak.attempts[0].feedback.len());
}

#[tokio::test]
async fn test_misconfigured_task_yields_error_row_per_trial() {
    let replay = tempfile::tempdir().unwrap();
    std::fs::copy(
        fixture_path("vdiv_midpoint.txt"),
        replay.path().join("VDIV_BUS_SENSE.1.txt"),
    )
    .unwrap();
    let library_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        library_dir.path().join("broken.json"),
        r#"{"id": "BROKEN_TASK", "number": 2, "difficulty": "easy"}"#,
    )
    .unwrap();
    let out = tempfile::tempdir().unwrap();

    let config = BatchConfig {
        tasks: "1-2".into(),
        ..batch(out.path(), vec![FeedbackMode::Full], 2)
    };
    let summary = TrialOrchestrator::new(
        Arc::new(ReferenceLibrary::builtin_with_dir(library_dir.path()).unwrap()),
        Arc::new(ReplayGenerator::from_dir(replay.path()).unwrap()),
        config,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.stats.total_trials, 6);
    assert_eq!(summary.stats.passes, 3);
    assert_eq!(summary.stats.errors, 3);

    let records = read_trials(&out.path().join("trials.jsonl")).unwrap();
    let broken: Vec<_> = records.iter().filter(|r| r.task_id == "BROKEN_TASK").collect();
    assert_eq!(broken.len(), 3);
    assert!(broken.iter().all(|r| r.verdict == TrialStatus::Error));
    assert!(broken.iter().all(|r| r.error.as_deref().unwrap_or("").contains("misconfigured")));
}
