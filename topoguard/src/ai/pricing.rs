use serde::{Deserialize, Serialize};

use crate::ai::TokenUsage;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Pricing {
    pub fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 * self.input_per_million
            + usage.completion_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

/// Per-trial accounting of generator use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostCounters {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub generator_calls: u32,
    /// Calls repeated after a timeout or transient failure
    pub external_retries: u32,
    pub estimated_usd: f64,
}

impl CostCounters {
    pub fn record_call(&mut self, usage: &TokenUsage, pricing: &Pricing) {
        self.generator_calls += 1;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.estimated_usd += pricing.cost(usage);
    }

    pub fn record_retry(&mut self) {
        self.external_retries += 1;
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn merge(&mut self, other: &CostCounters) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.generator_calls += other.generator_calls;
        self.external_retries += other.external_retries;
        self.estimated_usd += other.estimated_usd;
    }
}
