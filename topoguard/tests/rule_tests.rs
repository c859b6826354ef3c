//! Design rule checks on fixture circuits

use topoguard::prelude::*;
use topoguard::analyzer::RuleConfig;
use topoguard::Verifier;
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn rule_violations(task: &str, file: &str) -> Vec<Violation> {
    let library = ReferenceLibrary::builtin().unwrap();
    let entry = library.get(task).unwrap();
    let verifier = Verifier::new(entry, library.catalog());
    let text = std::fs::read_to_string(fixture_path(file)).unwrap();
    let graph = verifier.extract(&text).unwrap().graph;
    verifier.check_rules(&graph)
}

#[test]
fn test_seven_bus_caps_is_one_decoupling_violation() {
    let violations = rule_violations("HB_TO2473_STAGE", "hb_seven_caps.net");
    let decoupling: Vec<&Violation> = violations
        .iter()
        .filter(|v| v.kind == ViolationKind::InsufficientDecoupling)
        .collect();

    assert_eq!(decoupling.len(), 1, "{:?}", violations);
    assert_eq!(decoupling[0].nets, vec!["VBUS+", "PGND"]);
    assert!(decoupling[0].message.contains("at least 8"), "{}", decoupling[0].message);
}

#[test]
fn test_eight_bus_caps_satisfy_decoupling() {
    let violations = rule_violations("HB_TO2473_STAGE", "hb_eight_caps.net");
    assert!(
        violations.iter().all(|v| v.kind != ViolationKind::InsufficientDecoupling),
        "{:?}",
        violations
    );
    assert!(violations.is_empty(), "{:?}", violations);
}

#[test]
fn test_rewired_cap_is_shorted_and_undecoupled() {
    let violations = rule_violations("LDO_AUX_LOGIC", "ldo_rewired.net");
    let kinds: Vec<ViolationKind> = violations.iter().map(|v| v.kind).collect();
    assert!(kinds.contains(&ViolationKind::ShortedTerminals), "{:?}", kinds);
    assert!(kinds.contains(&ViolationKind::InsufficientDecoupling), "{:?}", kinds);
}

#[test]
fn test_rule_checker_order_is_stable() {
    let checker = RuleChecker::from_config(&RuleConfig::default());
    assert_eq!(
        checker.rule_ids(),
        vec!["unknown_part", "unconnected_pin", "voltage_rating", "kelvin_source", "shorted_terminals"]
    );
}

#[test]
fn test_tied_grounds_breach_isolation_barrier() {
    let violations = rule_violations("DRV_ISOLATED_GATE", "drv_isolated_grounds_tied.net");
    let breaches: Vec<&Violation> = violations
        .iter()
        .filter(|v| v.kind == ViolationKind::IsolationBreach)
        .collect();

    assert_eq!(breaches.len(), 1, "{:?}", violations);
    assert_eq!(breaches[0].components, vec!["U1"]);
    assert_eq!(breaches[0].nets, vec!["GND1"]);
    assert!(breaches[0].message.contains("primary and the secondary side"));
}

#[test]
fn test_isolated_driver_reference_keeps_barrier() {
    let library = ReferenceLibrary::builtin().unwrap();
    let entry = library.get("DRV_ISOLATED_GATE").unwrap();
    assert!(entry.task.rules.isolation_boundary);
    assert!(RuleChecker::from_config(&entry.task.rules)
        .rule_ids()
        .contains(&"isolation_boundary"));

    let verifier = Verifier::new(entry, library.catalog());
    assert!(verifier.check_rules(&entry.reference.graph).is_empty());
}
