//! Feedback composition.
//!
//! Turns a verdict into the text that goes back to the generator. The
//! output is a pure function of (match result, rule violations, mode) so
//! ablations across feedback strength are reproducible.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::analyzer::{MatchResult, Violation};

const RETRY_LINE: &str = "Please output the full code again.";

/// How much of the diagnosis the generator gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackMode {
    /// Every violation with location and suggested fix
    Full,
    /// Verdict plus kind tags
    Weak,
    /// Verdict only
    None,
}

impl FeedbackMode {
    pub const ALL: [FeedbackMode; 3] = [FeedbackMode::Full, FeedbackMode::Weak, FeedbackMode::None];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackMode::Full => "full",
            FeedbackMode::Weak => "weak",
            FeedbackMode::None => "none",
        }
    }
}

impl fmt::Display for FeedbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(FeedbackMode::Full),
            "weak" => Ok(FeedbackMode::Weak),
            "none" => Ok(FeedbackMode::None),
            other => Err(format!("unknown feedback mode '{}' (expected full, weak or none)", other)),
        }
    }
}

/// Combined verdict of one verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub matching: MatchResult,
    pub rule_violations: Vec<Violation>,
}

impl Verdict {
    pub fn new(matching: MatchResult, rule_violations: Vec<Violation>) -> Self {
        Self {
            matching,
            rule_violations,
        }
    }

    pub fn passed(&self) -> bool {
        self.matching.pass && self.rule_violations.is_empty()
    }

    /// Structural findings first, then rule findings.
    pub fn violations(&self) -> impl Iterator<Item = &Violation> {
        self.matching.violations.iter().chain(self.rule_violations.iter())
    }
}

pub struct FeedbackComposer;

impl FeedbackComposer {
    pub fn compose(verdict: &Verdict, mode: FeedbackMode) -> String {
        if verdict.passed() {
            return "Verification PASSED.".to_string();
        }
        match mode {
            FeedbackMode::None => format!("Attempt failed. Please try again.\n{}", RETRY_LINE),
            FeedbackMode::Weak => {
                let mut tags: Vec<&str> = Vec::new();
                for v in verdict.violations() {
                    let tag = v.kind.tag();
                    if !tags.contains(&tag) {
                        tags.push(tag);
                    }
                }
                format!("Verification FAILED.\nIssues: {}\n{}", tags.join(", "), RETRY_LINE)
            }
            FeedbackMode::Full => {
                let mut out = String::from("Verification FAILED.\n");
                for (i, v) in verdict.violations().enumerate() {
                    out.push_str(&format!("\n{}. [{}/{}] {}\n", i + 1, v.category(), v.kind, v.message));
                    if let Some(location) = v.location() {
                        out.push_str(&format!("   Location: {}\n", location));
                    }
                    if let Some(fix) = &v.suggestion {
                        out.push_str(&format!("   Suggested fix: {}\n", fix));
                    }
                }
                out.push('\n');
                out.push_str(RETRY_LINE);
                out
            }
        }
    }
}
