//! Integration tests for TopoGuard verification

use topoguard::prelude::*;
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).unwrap()
}

fn graph(library: &ReferenceLibrary, name: &str) -> CircuitGraph {
    NetlistExtractor::new(library.catalog())
        .extract(&fixture(name))
        .unwrap()
        .graph
}

#[test]
fn test_vdiv_midpoint_passes_end_to_end() {
    let library = ReferenceLibrary::builtin().unwrap();
    let report = TopoGuardCore::verify_file(
        &library,
        "VDIV_BUS_SENSE",
        &fixture_path("vdiv_midpoint.txt"),
        FeedbackMode::Full,
    )
    .unwrap();

    assert!(report.pass, "{}", report.feedback);
    assert!(report.verdict.matching.violations.is_empty());
    assert_eq!(report.feedback, "Verification PASSED.");
}

#[test]
fn test_vdiv_tapped_at_vin_fails_on_divider_node() {
    let library = ReferenceLibrary::builtin().unwrap();
    let report = TopoGuardCore::verify_file(
        &library,
        "VDIV_BUS_SENSE",
        &fixture_path("vdiv_tapped_at_vin.txt"),
        FeedbackMode::Full,
    )
    .unwrap();

    assert!(!report.pass);
    let v = &report.verdict.matching.violations[0];
    assert_eq!(v.category(), topoguard::ViolationCategory::StructuralViolation);
    assert!(v.message.contains("VSENSE"), "{}", v.message);
    assert!(v.message.contains("R1 pin 2, R2 pin 1"), "{}", v.message);
    assert!(report.feedback.starts_with("Verification FAILED."));
}

#[test]
fn test_renamed_copy_of_reference_passes() {
    let library = ReferenceLibrary::builtin().unwrap();
    let entry = library.get("HB_TO2473_STAGE").unwrap();
    let candidate = graph(&library, "hb_eight_caps.net");

    let result = EquivalenceEngine::new(&entry.reference).compare(&candidate);
    assert!(result.pass, "{:?}", result.violations);
    assert!(result.violations.is_empty());
    assert_eq!(result.mapping.get("Q1").map(String::as_str), Some("Q10"));
    assert_eq!(result.symmetry, None);
}

#[test]
fn test_single_rewire_is_one_structural_violation() {
    let library = ReferenceLibrary::builtin().unwrap();
    let entry = library.get("LDO_AUX_LOGIC").unwrap();
    let candidate = graph(&library, "ldo_rewired.net");

    let result = EquivalenceEngine::new(&entry.reference).compare(&candidate);
    assert!(!result.pass);
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].kind, ViolationKind::NetMismatch);
    assert!(result.violations[0].nets.contains(&"GND".to_string()));
}

#[test]
fn test_matching_is_deterministic() {
    let library = ReferenceLibrary::builtin().unwrap();
    for (task, file) in [
        ("LDO_AUX_LOGIC", "ldo_rewired.net"),
        ("HB_TO2473_STAGE", "hb_seven_caps.net"),
        ("VDIV_BUS_SENSE", "vdiv_tapped_at_vin.txt"),
    ] {
        let entry = library.get(task).unwrap();
        let candidate = graph(&library, file);
        let engine = EquivalenceEngine::new(&entry.reference);
        let first = serde_json::to_string(&engine.compare(&candidate)).unwrap();
        let second = serde_json::to_string(&engine.compare(&candidate)).unwrap();
        assert_eq!(first, second, "{}", task);
    }
}

#[test]
fn test_swapped_arms_pass_through_declared_symmetry() {
    let library = ReferenceLibrary::builtin().unwrap();
    let entry = library.get("HB_TO2473_STAGE").unwrap();
    let candidate = graph(&library, "hb_swapped_arms.net");

    let result = EquivalenceEngine::new(&entry.reference).compare(&candidate);
    assert!(result.pass, "{:?}", result.violations);
    assert_eq!(result.symmetry.as_deref(), Some("gate_arms"));
}

#[test]
fn test_weak_and_none_feedback_hide_details() {
    let library = ReferenceLibrary::builtin().unwrap();
    let text = fixture("vdiv_tapped_at_vin.txt");

    let weak = TopoGuardCore::verify_text(&library, "VDIV_BUS_SENSE", &text, FeedbackMode::Weak).unwrap();
    assert_eq!(
        weak.feedback,
        "Verification FAILED.\nIssues: PortMismatch\nPlease output the full code again."
    );

    let none = TopoGuardCore::verify_text(&library, "VDIV_BUS_SENSE", &text, FeedbackMode::None).unwrap();
    assert_eq!(none.feedback, "Attempt failed. Please try again.\nPlease output the full code again.");
}

#[test]
fn test_extract_netlist_convenience() {
    let extraction = topoguard::extract_netlist(&fixture("vdiv_midpoint.txt")).unwrap();
    assert_eq!(extraction.graph.component_count(), 2);
    assert_eq!(extraction.graph.inputs, vec!["VIN"]);
}
