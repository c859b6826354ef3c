//! TopoGuard - topology verification for generated circuit netlists
//!
//! Checks a generated netlist against a reference sub-circuit and a set of
//! design rules, turns the findings into feedback, and runs batches of
//! feedback-driven retry trials against a text generator.
//!
//! # Quick Start
//!
//! ```no_run
//! use topoguard::{FeedbackMode, ReferenceLibrary, TopoGuardCore};
//! use std::path::Path;
//!
//! let library = ReferenceLibrary::builtin().unwrap();
//! let report = TopoGuardCore::verify_file(
//!     &library,
//!     "VDIV_BUS_SENSE",
//!     Path::new("answer.txt"),
//!     FeedbackMode::Full,
//! ).unwrap();
//!
//! println!("{}", report.feedback);
//! ```
//!
//! # Features
//!
//! - **Netlist extraction**: S-expression code blocks into a typed circuit graph
//! - **Equivalence matching**: port-anchored, with substitution classes and declared symmetries
//! - **Design rules**: voltage ratings, decoupling, Kelvin source wiring, required bridges
//! - **Batch trials**: bounded worker pool, pass@k statistics, markdown and JSON reports

pub mod ai;
pub mod analyzer;
pub mod circuit;
pub mod core;
pub mod feedback;
pub mod library;
pub mod parser;
pub mod trial;

// Re-export main types
pub use core::{parse_violation, TopoGuardCore, TopoGuardError, Verification, VerificationReport, Verifier};
pub use analyzer::{EquivalenceEngine, MatchResult, RuleChecker, Violation, ViolationCategory, ViolationKind};
pub use circuit::{CircuitGraph, CircuitStats};
pub use feedback::{FeedbackComposer, FeedbackMode, Verdict};
pub use library::{LibraryError, ReferenceEntry, ReferenceLibrary};
pub use parser::{ExtractError, Extraction, NetlistExtractor};
pub use trial::{BatchConfig, RetryController, TrialOrchestrator, TrialStatus};

/// Extract a netlist from generator text using the builtin part catalog.
pub fn extract_netlist(text: &str) -> Result<Extraction, TopoGuardError> {
    let library = ReferenceLibrary::builtin()?;
    Ok(NetlistExtractor::new(library.catalog()).extract(text)?)
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::ai::{Generator, ReplayGenerator};
    pub use crate::{
        BatchConfig, CircuitGraph, EquivalenceEngine, FeedbackComposer, FeedbackMode, MatchResult,
        NetlistExtractor, ReferenceLibrary, RuleChecker, TopoGuardCore, TopoGuardError, TrialOrchestrator,
        TrialStatus, Verdict, Violation, ViolationKind,
    };
}
