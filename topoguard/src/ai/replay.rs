//! Replays recorded generator outputs.
//!
//! A replay directory holds files named `<TASK_ID>.<attempt>.txt`. Attempt
//! `n` serves the file for `n`, or the highest recorded attempt below it,
//! so a single recording repeats on every retry.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::ai::provider::{Generation, GenerationRequest, Generator, TokenUsage};
use crate::ai::AIError;

#[derive(Debug, Clone, Default)]
pub struct ReplayGenerator {
    recordings: BTreeMap<String, BTreeMap<u32, PathBuf>>,
}

impl ReplayGenerator {
    pub fn from_dir(dir: &Path) -> Result<Self, AIError> {
        let mut replay = Self::default();
        for entry in std::fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension().map(|e| e != "txt").unwrap_or(true) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some((task, attempt)) = stem.rsplit_once('.') else {
                continue;
            };
            let Ok(attempt) = attempt.parse::<u32>() else {
                continue;
            };
            replay
                .recordings
                .entry(task.to_uppercase())
                .or_default()
                .insert(attempt, path.clone());
        }
        tracing::info!(
            "Loaded replay recordings for {} task(s) from {}",
            replay.recordings.len(),
            dir.display()
        );
        Ok(replay)
    }

    pub fn has_task(&self, task_id: &str) -> bool {
        self.recordings.contains_key(&task_id.to_uppercase())
    }

    fn recording_for(&self, task_id: &str, attempt: u32) -> Option<&PathBuf> {
        let attempts = self.recordings.get(&task_id.to_uppercase())?;
        attempts
            .range(..=attempt.max(1))
            .next_back()
            .or_else(|| attempts.iter().next())
            .map(|(_, path)| path)
    }
}

#[async_trait]
impl Generator for ReplayGenerator {
    fn name(&self) -> &str {
        "replay"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, AIError> {
        let path = self
            .recording_for(&request.task_id, request.attempt)
            .ok_or_else(|| AIError::NoRecording(request.task_id.clone()))?;
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Generation {
            text,
            usage: TokenUsage::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(task: &str, attempt: u32) -> GenerationRequest {
        GenerationRequest {
            task_id: task.into(),
            attempt,
            messages: vec![],
        }
    }

    #[tokio::test]
    async fn test_replay_repeats_last_recording() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("VDIV_BUS_SENSE.1.txt"), "first").unwrap();
        std::fs::write(dir.path().join("VDIV_BUS_SENSE.2.txt"), "second").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let replay = ReplayGenerator::from_dir(dir.path()).unwrap();
        assert!(replay.has_task("vdiv_bus_sense"));
        assert_eq!(replay.generate(&request("VDIV_BUS_SENSE", 1)).await.unwrap().text, "first");
        assert_eq!(replay.generate(&request("VDIV_BUS_SENSE", 2)).await.unwrap().text, "second");
        assert_eq!(replay.generate(&request("VDIV_BUS_SENSE", 5)).await.unwrap().text, "second");
    }

    #[tokio::test]
    async fn test_missing_task_is_no_recording() {
        let dir = tempfile::tempdir().unwrap();
        let replay = ReplayGenerator::from_dir(dir.path()).unwrap();
        let err = replay.generate(&request("LDO_AUX_LOGIC", 1)).await.unwrap_err();
        assert!(matches!(err, AIError::NoRecording(_)));
        assert!(err.is_configuration());
    }
}
