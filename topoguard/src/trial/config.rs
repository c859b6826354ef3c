//! Batch configuration loaded from TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::ai::GeneratorConfig;
use crate::feedback::FeedbackMode;
use crate::library::{LibraryError, ReferenceLibrary};
use crate::trial::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Options for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// `all`, a range (`1-16`, `1:16`) or a comma list of numbers and ids
    pub tasks: String,
    pub feedback_modes: Vec<FeedbackMode>,
    pub trials_per_task: u32,
    pub max_attempts: u32,
    pub parallelism: usize,
    pub call_timeout_secs: u64,
    pub external_call_retries: u32,
    pub initial_backoff_ms: u64,
    pub pass_k: u32,
    pub output_dir: PathBuf,
    pub library_dir: Option<PathBuf>,
    pub generator: GeneratorConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            tasks: "all".to_string(),
            feedback_modes: FeedbackMode::ALL.to_vec(),
            trials_per_task: 5,
            max_attempts: 5,
            parallelism: 4,
            call_timeout_secs: 120,
            external_call_retries: 3,
            initial_backoff_ms: 1000,
            pass_k: 5,
            output_dir: PathBuf::from("results"),
            library_dir: None,
            generator: GeneratorConfig::default(),
        }
    }
}

impl BatchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Checks that do not need the library.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trials_per_task == 0 {
            return Err(ConfigError::Invalid("trials_per_task must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.parallelism == 0 {
            return Err(ConfigError::Invalid("parallelism must be at least 1".into()));
        }
        if self.feedback_modes.is_empty() {
            return Err(ConfigError::Invalid("feedback_modes must not be empty".into()));
        }
        if self.pass_k == 0 {
            return Err(ConfigError::Invalid("pass_k must be at least 1".into()));
        }
        TaskSelection::parse(&self.tasks)?;
        Ok(())
    }

    /// Task ids to run, in task-number order for ranges and list order otherwise.
    pub fn resolve_tasks(&self, library: &ReferenceLibrary) -> Result<Vec<String>, ConfigError> {
        self.validate()?;
        let ids = TaskSelection::parse(&self.tasks)?.resolve(library)?;
        if ids.is_empty() {
            return Err(ConfigError::Invalid(format!("no tasks match '{}'", self.tasks)));
        }
        Ok(ids)
    }

    /// Modes deduplicated, order kept.
    pub fn modes(&self) -> Vec<FeedbackMode> {
        let mut modes = Vec::new();
        for mode in &self.feedback_modes {
            if !modes.contains(mode) {
                modes.push(*mode);
            }
        }
        modes
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            external_call_retries: self.external_call_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSelector {
    Range(u32, u32),
    Key(String),
}

/// Parsed form of the `tasks` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSelection {
    All,
    Some(Vec<TaskSelector>),
}

impl TaskSelection {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let text = text.trim();
        if text.is_empty() || text.eq_ignore_ascii_case("all") {
            return Ok(TaskSelection::All);
        }

        let mut selectors = Vec::new();
        for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let range = item.split_once('-').or_else(|| item.split_once(':'));
            match range {
                Some((a, b)) if is_number(a) && is_number(b) => {
                    let (a, b) = (parse_number(a)?, parse_number(b)?);
                    selectors.push(TaskSelector::Range(a.min(b), a.max(b)));
                }
                _ => selectors.push(TaskSelector::Key(item.to_string())),
            }
        }
        if selectors.is_empty() {
            return Err(ConfigError::Invalid(format!("empty task selection '{}'", text)));
        }
        Ok(TaskSelection::Some(selectors))
    }

    /// Unknown explicit keys are rejected. Misconfigured tasks are kept so
    /// their trials end with a configuration error.
    pub fn resolve(&self, library: &ReferenceLibrary) -> Result<Vec<String>, ConfigError> {
        let selectors = match self {
            TaskSelection::All => return Ok(library.task_ids().into_iter().map(|(_, id)| id).collect()),
            TaskSelection::Some(selectors) => selectors,
        };

        let mut ids: Vec<String> = Vec::new();
        let mut push = |id: String| {
            if !ids.contains(&id) {
                ids.push(id);
            }
        };
        for selector in selectors {
            match selector {
                TaskSelector::Range(lo, hi) => {
                    for (number, id) in library.task_ids() {
                        if number.map_or(false, |n| (*lo..=*hi).contains(&n)) {
                            push(id);
                        }
                    }
                }
                TaskSelector::Key(key) => match library.get(key) {
                    Ok(entry) => push(entry.task.id.clone()),
                    Err(LibraryError::InvalidTask { task, .. }) => push(task),
                    Err(_) => {
                        return Err(ConfigError::Invalid(format!("unknown task id '{}'", key)));
                    }
                },
            }
        }
        Ok(ids)
    }
}

fn is_number(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn parse_number(s: &str) -> Result<u32, ConfigError> {
    s.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("invalid task number '{}'", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_defaults_and_overrides() {
        let config = BatchConfig::from_toml(
            r#"
            tasks = "1-8"
            feedback_modes = ["full", "none"]
            trials_per_task = 3

            [generator]
            model = "test/model"
            "#,
        )
        .unwrap();
        assert_eq!(config.tasks, "1-8");
        assert_eq!(config.modes(), vec![FeedbackMode::Full, FeedbackMode::None]);
        assert_eq!(config.trials_per_task, 3);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.pass_k, 5);
        assert_eq!(config.generator.model, "test/model");
        assert_eq!(config.generator.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn test_range_forms() {
        assert_eq!(
            TaskSelection::parse("1-16").unwrap(),
            TaskSelection::Some(vec![TaskSelector::Range(1, 16)])
        );
        assert_eq!(
            TaskSelection::parse("16:1").unwrap(),
            TaskSelection::Some(vec![TaskSelector::Range(1, 16)])
        );
        assert_eq!(TaskSelection::parse("all").unwrap(), TaskSelection::All);
        assert_eq!(
            TaskSelection::parse("5, VDIV_BUS_SENSE").unwrap(),
            TaskSelection::Some(vec![
                TaskSelector::Key("5".into()),
                TaskSelector::Key("VDIV_BUS_SENSE".into())
            ])
        );
    }

    #[test]
    fn test_resolve_against_library() {
        let library = ReferenceLibrary::builtin().unwrap();
        let ids = TaskSelection::parse("1-8").unwrap().resolve(&library).unwrap();
        assert_eq!(ids, vec!["VDIV_BUS_SENSE", "LDO_AUX_LOGIC", "HB_TO2473_STAGE"]);

        let ids = TaskSelection::parse("vdiv_bus_sense,1,14").unwrap().resolve(&library).unwrap();
        assert_eq!(ids, vec!["VDIV_BUS_SENSE", "DRV_BOOTSTRAP_HB"]);

        assert!(matches!(
            TaskSelection::parse("NOT_A_TASK").unwrap().resolve(&library),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_misconfigured_tasks_stay_selected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("broken.json"),
            r#"{"id": "BROKEN", "number": 2, "difficulty": "easy"}"#,
        )
        .unwrap();
        let library = ReferenceLibrary::builtin_with_dir(dir.path()).unwrap();

        let ids = TaskSelection::parse("1-2").unwrap().resolve(&library).unwrap();
        assert_eq!(ids, vec!["VDIV_BUS_SENSE", "BROKEN"]);
        let ids = TaskSelection::parse("2").unwrap().resolve(&library).unwrap();
        assert_eq!(ids, vec!["BROKEN"]);
        let all = TaskSelection::All.resolve(&library).unwrap();
        assert!(all.contains(&"BROKEN".to_string()));
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        let mut config = BatchConfig::default();
        assert!(config.validate().is_ok());
        config.parallelism = 0;
        assert!(config.validate().is_err());

        let config = BatchConfig {
            feedback_modes: vec![],
            ..BatchConfig::default()
        };
        assert!(config.validate().is_err());

        let config = BatchConfig {
            trials_per_task: 0,
            ..BatchConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
