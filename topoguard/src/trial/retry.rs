//! Per-trial retry loop.
//!
//! One controller drives a single (task, feedback mode, trial) to PASS,
//! EXHAUSTED or a configuration abort. Everything carried between attempts
//! lives in a [`RetryContext`] value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::ai::{
    build_system_prompt, build_task_prompt, AIError, ChatMessage, CostCounters, Generation,
    GenerationRequest, Generator, Pricing,
};
use crate::analyzer::{MatchResult, Violation, ViolationKind};
use crate::circuit::CircuitGraph;
use crate::core::{parse_violation, Verifier};
use crate::feedback::{FeedbackComposer, FeedbackMode, Verdict};
use crate::library::ReferenceLibrary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptState {
    Init,
    Generating,
    Verifying,
    Pass,
    Retry,
    Exhausted,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Pass | AttemptState::Exhausted)
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptState::Init => "INIT",
            AttemptState::Generating => "GENERATING",
            AttemptState::Verifying => "VERIFYING",
            AttemptState::Pass => "PASS",
            AttemptState::Retry => "RETRY",
            AttemptState::Exhausted => "EXHAUSTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptEvent {
    Start,
    /// Generator output (or an exhausted external-call budget) arrived
    OutputReceived,
    Verified { passed: bool, attempts_remaining: bool },
    Resume,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: AttemptState,
    pub event: AttemptEvent,
}

pub fn transition(from: AttemptState, event: AttemptEvent) -> Result<AttemptState, InvalidTransition> {
    use AttemptEvent::*;
    use AttemptState::*;

    match (from, event) {
        (Init, Start) | (Retry, Resume) => Ok(Generating),
        (Generating, OutputReceived) => Ok(Verifying),
        (Verifying, Verified { passed: true, .. }) => Ok(Pass),
        (Verifying, Verified { passed: false, attempts_remaining: true }) => Ok(Retry),
        (Verifying, Verified { passed: false, attempts_remaining: false }) => Ok(Exhausted),
        _ => Err(InvalidTransition { from, event }),
    }
}

/// State handed from one attempt to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryContext {
    pub task_id: String,
    /// 1-based
    pub attempt: u32,
    /// Feedback composed after the previous attempt
    pub feedback: Option<String>,
    pub messages: Vec<ChatMessage>,
}

impl RetryContext {
    pub fn new(task_id: impl Into<String>, system_prompt: impl Into<String>, task_prompt: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            attempt: 1,
            feedback: None,
            messages: vec![ChatMessage::system(system_prompt), ChatMessage::user(task_prompt)],
        }
    }

    pub fn request(&self) -> GenerationRequest {
        GenerationRequest {
            task_id: self.task_id.clone(),
            attempt: self.attempt,
            messages: self.messages.clone(),
        }
    }

    /// Context for the following attempt. `output` is absent when the
    /// generator never answered.
    pub fn next(&self, output: Option<&str>, feedback: &str) -> RetryContext {
        let mut messages = self.messages.clone();
        if let Some(output) = output {
            messages.push(ChatMessage::assistant(output));
        }
        messages.push(ChatMessage::user(feedback));
        RetryContext {
            task_id: self.task_id.clone(),
            attempt: self.attempt + 1,
            feedback: Some(feedback.to_string()),
            messages,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub call_timeout: Duration,
    /// Extra calls allowed per attempt after a timeout or transient failure
    pub external_call_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            call_timeout: Duration::from_secs(120),
            external_call_retries: 3,
            initial_backoff: Duration::from_millis(1000),
        }
    }
}

/// Wall time per stage, milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub generate_ms: f64,
    pub parse_ms: f64,
    pub match_ms: f64,
    pub rules_ms: f64,
    pub feedback_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub passed: bool,
    pub violations: Vec<Violation>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub feedback: String,
    pub timings: StageTimings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrialStatus {
    Pass,
    Fail,
    Error,
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrialStatus::Pass => "PASS",
            TrialStatus::Fail => "FAIL",
            TrialStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct TrialOutcome {
    pub task_id: String,
    pub mode: FeedbackMode,
    pub trial_index: u32,
    pub status: TrialStatus,
    pub attempts: Vec<AttemptRecord>,
    pub costs: CostCounters,
    pub duration: Duration,
    /// Raw text of the last attempt that produced output
    pub final_text: Option<String>,
    /// Graph of the last attempt that parsed
    pub final_graph: Option<CircuitGraph>,
    /// Why the trial ended in ERROR
    pub error: Option<String>,
}

impl TrialOutcome {
    pub fn errored(
        task_id: impl Into<String>,
        mode: FeedbackMode,
        trial_index: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            mode,
            trial_index,
            status: TrialStatus::Error,
            attempts: Vec::new(),
            costs: CostCounters::default(),
            duration: Duration::ZERO,
            final_text: None,
            final_graph: None,
            error: Some(error.into()),
        }
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts.len() as u32
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Drives generate → verify → feedback until PASS or the budget runs out.
#[derive(Clone)]
pub struct RetryController {
    library: Arc<ReferenceLibrary>,
    generator: Arc<dyn Generator>,
    policy: RetryPolicy,
    pricing: Pricing,
}

impl RetryController {
    pub fn new(library: Arc<ReferenceLibrary>, generator: Arc<dyn Generator>, policy: RetryPolicy) -> Self {
        Self {
            library,
            generator,
            policy,
            pricing: Pricing::default(),
        }
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub async fn run_trial(&self, task_id: &str, mode: FeedbackMode, trial_index: u32) -> TrialOutcome {
        let started = Instant::now();

        let entry = match self.library.get(task_id) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Aborting trial {} of {}: {}", trial_index, task_id, e);
                let mut outcome = TrialOutcome::errored(task_id, mode, trial_index, e.to_string());
                outcome.duration = started.elapsed();
                return outcome;
            }
        };
        let catalog = self.library.catalog();
        let verifier = Verifier::new(entry, catalog);

        let mut ctx = RetryContext::new(
            &entry.task.id,
            build_system_prompt(),
            build_task_prompt(entry, catalog),
        );
        let mut outcome = TrialOutcome {
            task_id: entry.task.id.clone(),
            mode,
            trial_index,
            status: TrialStatus::Fail,
            attempts: Vec::new(),
            costs: CostCounters::default(),
            duration: Duration::ZERO,
            final_text: None,
            final_graph: None,
            error: None,
        };

        let mut state = self.step(AttemptState::Init, AttemptEvent::Start);
        loop {
            let mut timings = StageTimings::default();

            let t = Instant::now();
            let generated = self.call_generator(&ctx.request(), &mut outcome.costs).await;
            timings.generate_ms = elapsed_ms(t);

            let (verdict, warnings, text) = match generated {
                Ok(generation) => {
                    let t = Instant::now();
                    let extraction = verifier.extract(&generation.text);
                    timings.parse_ms = elapsed_ms(t);
                    match extraction {
                        Ok(extraction) => {
                            let t = Instant::now();
                            let matching = verifier.match_graph(&extraction.graph);
                            timings.match_ms = elapsed_ms(t);

                            let t = Instant::now();
                            let rule_violations = verifier.check_rules(&extraction.graph);
                            timings.rules_ms = elapsed_ms(t);

                            outcome.final_graph = Some(extraction.graph);
                            (Verdict::new(matching, rule_violations), extraction.warnings, Some(generation.text))
                        }
                        Err(e) => {
                            // final.net and final_output.txt must describe the same attempt
                            outcome.final_graph = None;
                            (
                                Verdict::new(MatchResult::failed(parse_violation(&e)), Vec::new()),
                                Vec::new(),
                                Some(generation.text),
                            )
                        }
                    }
                }
                Err(e) if e.is_configuration() => {
                    tracing::warn!("Aborting trial {} of {}: {}", trial_index, outcome.task_id, e);
                    outcome.status = TrialStatus::Error;
                    outcome.error = Some(e.to_string());
                    outcome.duration = started.elapsed();
                    return outcome;
                }
                Err(e) => {
                    let violation = Violation::new(ViolationKind::ExternalCall, e.to_string())
                        .with_suggestion("Answer with the complete netlist in one ```netlist code block");
                    (Verdict::new(MatchResult::failed(violation), Vec::new()), Vec::new(), None)
                }
            };
            state = self.step(state, AttemptEvent::OutputReceived);

            let t = Instant::now();
            let feedback = FeedbackComposer::compose(&verdict, mode);
            timings.feedback_ms = elapsed_ms(t);

            let passed = verdict.passed();
            let attempts_remaining = ctx.attempt < self.policy.max_attempts;
            state = self.step(state, AttemptEvent::Verified { passed, attempts_remaining });
            tracing::debug!(
                "task={} mode={} trial={} attempt={} state={}",
                outcome.task_id,
                mode,
                trial_index,
                ctx.attempt,
                state
            );

            outcome.attempts.push(AttemptRecord {
                attempt: ctx.attempt,
                passed,
                violations: verdict.violations().cloned().collect(),
                warnings,
                feedback: feedback.clone(),
                timings,
            });
            if text.is_some() {
                outcome.final_text = text.clone();
            }

            match state {
                AttemptState::Retry => {
                    ctx = ctx.next(text.as_deref(), &feedback);
                    state = self.step(state, AttemptEvent::Resume);
                }
                AttemptState::Pass => {
                    outcome.status = TrialStatus::Pass;
                    break;
                }
                _ => {
                    outcome.status = TrialStatus::Fail;
                    break;
                }
            }
        }

        outcome.duration = started.elapsed();
        outcome
    }

    fn step(&self, state: AttemptState, event: AttemptEvent) -> AttemptState {
        match transition(state, event) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!("{}", e);
                AttemptState::Exhausted
            }
        }
    }

    /// One topology attempt's worth of generator calls, bounded by the
    /// per-call timeout and the external-call budget.
    async fn call_generator(
        &self,
        request: &GenerationRequest,
        costs: &mut CostCounters,
    ) -> Result<Generation, AIError> {
        let mut delay = self.policy.initial_backoff;
        let mut retries = 0;

        loop {
            let result = match tokio::time::timeout(self.policy.call_timeout, self.generator.generate(request)).await {
                Ok(result) => result,
                Err(_) => Err(AIError::Timeout(self.policy.call_timeout.as_secs())),
            };

            match result {
                Ok(generation) => {
                    costs.record_call(&generation.usage, &self.pricing);
                    return Ok(generation);
                }
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => {
                    costs.generator_calls += 1;
                    if retries >= self.policy.external_call_retries {
                        tracing::warn!(
                            "Generator gave up on {} attempt {} after {} retries: {}",
                            request.task_id,
                            request.attempt,
                            retries,
                            e
                        );
                        return Err(e);
                    }
                    retries += 1;
                    costs.record_retry();

                    let wait = match &e {
                        AIError::RateLimited { retry_after } => delay.max(Duration::from_secs(*retry_after)),
                        _ => delay,
                    };
                    tracing::warn!(
                        "Generator call failed for {} attempt {}: {}. Retrying in {:?} ({}/{})",
                        request.task_id,
                        request.attempt,
                        e,
                        wait,
                        retries,
                        self.policy.external_call_retries
                    );
                    tokio::time::sleep(wait).await;
                    delay *= 2;
                }
            }
        }
    }
}
