//! Core verification logic shared by the batch runner and the CLI.
//! No generator or filesystem state.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ai::AIError;
use crate::analyzer::{
    EquivalenceEngine, MatchResult, RuleChecker, RuleContext, Violation, ViolationKind,
};
use crate::circuit::{CircuitGraph, CircuitStats};
use crate::feedback::{FeedbackComposer, FeedbackMode, Verdict};
use crate::library::{LibraryError, PartCatalog, ReferenceEntry, ReferenceLibrary};
use crate::parser::{ExtractError, Extraction, NetlistExtractor, SExpError};
use crate::trial::config::ConfigError;
use crate::trial::stats::StatsError;

#[derive(Debug, thiserror::Error)]
pub enum TopoGuardError {
    #[error("Parse error: {0}")]
    Parse(#[from] ExtractError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] LibraryError),
    #[error("External call failed: {0}")]
    ExternalCall(#[from] AIError),
    #[error("Invalid batch configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Statistics error: {0}")]
    Stats(#[from] StatsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fold a parse failure into a violation so it reaches the generator
/// like any other finding.
pub fn parse_violation(error: &ExtractError) -> Violation {
    let v = Violation::new(ViolationKind::Parse, error.to_string());
    match error {
        ExtractError::MissingCodeBlock => v.with_suggestion(
            "Answer with the complete netlist inside one ```netlist code block",
        ),
        ExtractError::DanglingComponent { net, ref_des } => v
            .with_component(ref_des)
            .with_net(net)
            .with_suggestion(format!("Declare {} under (components) or remove it from {}", ref_des, net)),
        ExtractError::DanglingPin { net, ref_des, pin, .. } => v
            .with_component(ref_des)
            .with_net(net)
            .with_suggestion(format!("Use a pin number {} actually has instead of {}", ref_des, pin)),
        ExtractError::PinReused { pin, first, second } => v
            .with_component(&pin.ref_des)
            .with_net(first)
            .with_net(second)
            .with_suggestion(format!("Keep {} in exactly one of {} and {}", pin, first, second)),
        ExtractError::DuplicateNet(name) => v
            .with_net(name)
            .with_suggestion(format!("Merge the nets named {} into one", name)),
        ExtractError::DuplicateComponent(ref_des) => v
            .with_component(ref_des)
            .with_suggestion(format!("Give every component a unique reference; {} is used twice", ref_des)),
        ExtractError::Syntax(SExpError::TooDeep { .. }) => v.with_suggestion(
            "Write the netlist flat: (netlist (components ...) (nets ...)) with each list closed",
        ),
        _ => v.with_suggestion("Fix the netlist syntax so it parses as a single (netlist ...) expression"),
    }
}

/// Verification of one candidate against one task.
pub struct Verifier<'a> {
    entry: &'a ReferenceEntry,
    catalog: &'a PartCatalog,
    rules: RuleChecker,
}

impl<'a> Verifier<'a> {
    pub fn new(entry: &'a ReferenceEntry, catalog: &'a PartCatalog) -> Self {
        Self {
            entry,
            catalog,
            rules: RuleChecker::from_config(&entry.task.rules),
        }
    }

    pub fn entry(&self) -> &ReferenceEntry {
        self.entry
    }

    pub fn extract(&self, text: &str) -> Result<Extraction, ExtractError> {
        NetlistExtractor::new(self.catalog).extract(text)
    }

    pub fn match_graph(&self, graph: &CircuitGraph) -> MatchResult {
        EquivalenceEngine::new(&self.entry.reference).compare(graph)
    }

    pub fn check_rules(&self, graph: &CircuitGraph) -> Vec<Violation> {
        let ctx = RuleContext::new(graph, &self.entry.reference.substitutions, self.entry.task.voltage);
        self.rules.check(&ctx)
    }

    /// Extract, match and rule-check raw generator text.
    pub fn verify_text(&self, text: &str) -> Verification {
        match self.extract(text) {
            Ok(extraction) => {
                let verdict = Verdict::new(
                    self.match_graph(&extraction.graph),
                    self.check_rules(&extraction.graph),
                );
                Verification {
                    verdict,
                    warnings: extraction.warnings,
                    graph: Some(extraction.graph),
                }
            }
            Err(e) => Verification {
                verdict: Verdict::new(MatchResult::failed(parse_violation(&e)), Vec::new()),
                warnings: Vec::new(),
                graph: None,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub verdict: Verdict,
    pub warnings: Vec<String>,
    /// Absent when the text did not parse
    pub graph: Option<CircuitGraph>,
}

/// Serializable summary used by the CLI `verify` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub task_id: String,
    pub pass: bool,
    pub verdict: Verdict,
    pub feedback: String,
    pub warnings: Vec<String>,
    pub stats: Option<CircuitStats>,
}

/// Core verification API used by the CLI.
pub struct TopoGuardCore;

impl TopoGuardCore {
    pub fn verify_text(
        library: &ReferenceLibrary,
        task: &str,
        text: &str,
        mode: FeedbackMode,
    ) -> Result<VerificationReport, TopoGuardError> {
        let entry = library.get(task)?;
        let verification = Verifier::new(entry, library.catalog()).verify_text(text);
        let feedback = FeedbackComposer::compose(&verification.verdict, mode);
        Ok(VerificationReport {
            task_id: entry.task.id.clone(),
            pass: verification.verdict.passed(),
            verdict: verification.verdict,
            feedback,
            warnings: verification.warnings,
            stats: verification.graph.as_ref().map(|g| g.stats()),
        })
    }

    pub fn verify_file(
        library: &ReferenceLibrary,
        task: &str,
        path: &Path,
        mode: FeedbackMode,
    ) -> Result<VerificationReport, TopoGuardError> {
        let text = std::fs::read_to_string(path)?;
        Self::verify_text(library, task, &text, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VDIV: &str = "```netlist\n(netlist (components (comp (ref R1) (part R) (value 100k)) (comp (ref R2) (part R) (value 100k)))\n\
        (nets (net (name VIN) (node (ref R1) (pin 1))) (net (name VSENSE) (node (ref R1) (pin 2)) (node (ref R2) (pin 1)))\n\
        (net (name GND) (node (ref R2) (pin 2)))))\n```";

    #[test]
    fn test_verify_text_pass() {
        let library = ReferenceLibrary::builtin().unwrap();
        let report = TopoGuardCore::verify_text(&library, "VDIV_BUS_SENSE", VDIV, FeedbackMode::Full).unwrap();
        assert!(report.pass, "{}", report.feedback);
        assert_eq!(report.feedback, "Verification PASSED.");
        assert_eq!(report.stats.map(|s| s.component_count), Some(2));
    }

    #[test]
    fn test_parse_error_becomes_violation() {
        let library = ReferenceLibrary::builtin().unwrap();
        let report = TopoGuardCore::verify_text(&library, "1", "no code here", FeedbackMode::Full).unwrap();
        assert!(!report.pass);
        assert_eq!(report.verdict.matching.violations[0].kind, ViolationKind::Parse);
        assert!(report.feedback.contains("[ParseError/ParseError]"));
        assert!(report.stats.is_none());
    }

    #[test]
    fn test_unknown_task_is_configuration_error() {
        let library = ReferenceLibrary::builtin().unwrap();
        let err = TopoGuardCore::verify_text(&library, "NOPE", VDIV, FeedbackMode::None).unwrap_err();
        assert!(matches!(err, TopoGuardError::Configuration(LibraryError::UnknownTask(_))));
    }
}
