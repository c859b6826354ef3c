//! Design-rule checks.
//!
//! Rules are independent of topology matching and of each other. Every
//! enabled rule runs to completion and the checker concatenates their
//! violations in a fixed rule order, so one attempt surfaces every rule
//! failure at once.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::analyzer::violation::{Violation, ViolationKind};
use crate::circuit::{CircuitGraph, Component, IsolationSide, PinConnection, PinRole};
use crate::library::{SubstitutionTable, VoltageSpec};

fn default_capacitor_class() -> String {
    "capacitor".to_string()
}

/// Minimum number of components of `class` bridging a rail pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecouplingRequirement {
    pub rail: String,
    pub return_net: String,
    pub min_count: usize,
    #[serde(default = "default_capacitor_class")]
    pub class: String,
}

/// A component of `class` that must sit directly between nets `a` and `b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequirement {
    pub a: String,
    pub b: String,
    #[serde(default = "default_capacitor_class")]
    pub class: String,
    #[serde(default)]
    pub purpose: Option<String>,
}

/// Per-task rule configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub unknown_part: bool,
    pub unconnected_pin: bool,
    pub voltage_rating: bool,
    pub decoupling: Vec<DecouplingRequirement>,
    pub kelvin_source: bool,
    pub shorted_terminals: bool,
    pub required_bridges: Vec<BridgeRequirement>,
    pub isolation_boundary: bool,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            unknown_part: true,
            unconnected_pin: true,
            voltage_rating: true,
            decoupling: Vec::new(),
            kelvin_source: true,
            shorted_terminals: true,
            required_bridges: Vec::new(),
            isolation_boundary: false,
        }
    }
}

/// What a rule gets to look at.
pub struct RuleContext<'a> {
    pub graph: &'a CircuitGraph,
    pub substitutions: &'a SubstitutionTable,
    pub voltage: Option<VoltageSpec>,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        graph: &'a CircuitGraph,
        substitutions: &'a SubstitutionTable,
        voltage: Option<VoltageSpec>,
    ) -> Self {
        Self {
            graph,
            substitutions,
            voltage,
        }
    }

    fn is_class(&self, component: &Component, class: &str) -> bool {
        self.substitutions.class_of(&component.part) == Some(class)
    }
}

pub trait Rule: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation>;
}

/// Ordered set of rules built from a [`RuleConfig`].
#[derive(Clone, Default)]
pub struct RuleChecker {
    rules: Vec<Arc<dyn Rule>>,
}

impl RuleChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RuleConfig) -> Self {
        let mut checker = Self::new();
        if config.unknown_part {
            checker.add_rule(Arc::new(UnknownPartRule));
        }
        if config.unconnected_pin {
            checker.add_rule(Arc::new(UnconnectedPinRule));
        }
        if config.voltage_rating {
            checker.add_rule(Arc::new(VoltageRatingRule));
        }
        if !config.decoupling.is_empty() {
            checker.add_rule(Arc::new(DecouplingRule {
                requirements: config.decoupling.clone(),
            }));
        }
        if config.kelvin_source {
            checker.add_rule(Arc::new(KelvinSourceRule));
        }
        if config.shorted_terminals {
            checker.add_rule(Arc::new(ShortedTerminalsRule));
        }
        if !config.required_bridges.is_empty() {
            checker.add_rule(Arc::new(RequiredBridgeRule {
                requirements: config.required_bridges.clone(),
            }));
        }
        if config.isolation_boundary {
            checker.add_rule(Arc::new(IsolationBoundaryRule));
        }
        checker
    }

    pub fn add_rule(&mut self, rule: Arc<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    pub fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            let found = rule.check(ctx);
            if !found.is_empty() {
                tracing::debug!("Rule {} reported {} violation(s)", rule.id(), found.len());
            }
            violations.extend(found);
        }
        violations
    }
}

impl std::fmt::Debug for RuleChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleChecker")
            .field("rules", &self.rule_ids())
            .finish()
    }
}

pub struct UnknownPartRule;

impl Rule for UnknownPartRule {
    fn id(&self) -> &str {
        "unknown_part"
    }

    fn name(&self) -> &str {
        "Unknown Part"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let known: Vec<&str> = ctx
            .substitutions
            .classes()
            .flat_map(|(_, parts)| parts.iter().map(|p| p.as_str()))
            .collect();

        ctx.graph
            .components()
            .filter(|c| ctx.substitutions.class_of(&c.part).is_none())
            .map(|c| {
                Violation::new(
                    ViolationKind::UnknownPart,
                    format!("{} uses part {}, which belongs to no known substitution class", c.ref_des, c.part),
                )
                .with_component(&c.ref_des)
                .with_suggestion(format!("Use one of the known part types: {}", known.join(", ")))
            })
            .collect()
    }
}

pub struct UnconnectedPinRule;

impl Rule for UnconnectedPinRule {
    fn id(&self) -> &str {
        "unconnected_pin"
    }

    fn name(&self) -> &str {
        "Unconnected Pin"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let mut violations = Vec::new();
        for component in ctx.graph.components() {
            for pin in &component.pins {
                if pin.connection != PinConnection::Unassigned || pin.role == PinRole::Nc {
                    continue;
                }
                let label = match &pin.name {
                    Some(name) => format!("{} pin {} ({})", component.ref_des, pin.number, name),
                    None => format!("{} pin {}", component.ref_des, pin.number),
                };
                violations.push(
                    Violation::new(
                        ViolationKind::UnconnectedPin,
                        format!("{} is not connected to any net and not tied to NC", label),
                    )
                    .with_component(&component.ref_des)
                    .with_suggestion(format!(
                        "Connect {} to its net, or list it under (no_connect) if it is intentionally unused",
                        label
                    )),
                );
            }
        }
        violations
    }
}

pub struct VoltageRatingRule;

impl Rule for VoltageRatingRule {
    fn id(&self) -> &str {
        "voltage_rating"
    }

    fn name(&self) -> &str {
        "Voltage Rating"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let Some(voltage) = ctx.voltage else {
            return Vec::new();
        };
        let required = voltage.max();

        ctx.graph
            .components()
            .filter_map(|c| c.rating.map(|r| (c, r)))
            .filter(|(_, rating)| required > *rating)
            .map(|(c, rating)| {
                Violation::new(
                    ViolationKind::OverVoltage,
                    format!(
                        "{} ({}) is rated {} V but the circuit operates at {} V",
                        c.ref_des, c.part, rating, required
                    ),
                )
                .with_component(&c.ref_des)
                .with_suggestion(format!(
                    "Replace {} with a part rated for at least {} V",
                    c.ref_des, required
                ))
            })
            .collect()
    }
}

pub struct DecouplingRule {
    pub requirements: Vec<DecouplingRequirement>,
}

impl Rule for DecouplingRule {
    fn id(&self) -> &str {
        "decoupling"
    }

    fn name(&self) -> &str {
        "Decoupling Minimum"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let mut violations = Vec::new();
        for req in &self.requirements {
            let bridging = ctx
                .graph
                .bridging(&req.rail, &req.return_net, |c| ctx.is_class(c, &req.class));
            if bridging.len() >= req.min_count {
                continue;
            }
            let missing = req.min_count - bridging.len();
            let mut violation = Violation::new(
                ViolationKind::InsufficientDecoupling,
                format!(
                    "Only {} {}(s) bridge {} and {}; at least {} required",
                    bridging.len(),
                    req.class,
                    req.rail,
                    req.return_net,
                    req.min_count
                ),
            )
            .with_net(&req.rail)
            .with_net(&req.return_net)
            .with_suggestion(format!(
                "Add {} more {}(s) between {} and {}",
                missing, req.class, req.rail, req.return_net
            ));
            for c in bridging {
                violation = violation.with_component(&c.ref_des);
            }
            violations.push(violation);
        }
        violations
    }
}

pub struct KelvinSourceRule;

impl KelvinSourceRule {
    /// Driver output driving `gate_net` directly or across one resistor,
    /// with the net its return pin sits on.
    fn driver_for<'g>(ctx: &RuleContext<'g>, gate_net: &str) -> Option<(&'g Component, Option<&'g str>)> {
        for driver in ctx.graph.components() {
            let outs: Vec<_> = driver.pins_with_role(PinRole::DriverOut).collect();
            if outs.is_empty() {
                continue;
            }
            let returns: Vec<_> = driver.pins_with_role(PinRole::DriverReturn).collect();
            for (i, out) in outs.iter().enumerate() {
                let Some(out_net) = out.net() else {
                    continue;
                };
                let drives = out_net == gate_net
                    || ctx
                        .graph
                        .nets_across(out_net, |c| ctx.is_class(c, "resistor"))
                        .contains(&gate_net);
                if !drives {
                    continue;
                }
                // outputs pair with return pins in order; a low-side output
                // without its own return references ground
                let return_net = returns
                    .get(i)
                    .and_then(|p| p.net())
                    .or_else(|| driver.net_for_role(PinRole::Ground));
                return Some((driver, return_net));
            }
        }
        None
    }
}

impl Rule for KelvinSourceRule {
    fn id(&self) -> &str {
        "kelvin_source"
    }

    fn name(&self) -> &str {
        "Kelvin Source Wiring"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let mut violations = Vec::new();
        let mut seen: Vec<(&str, &str)> = Vec::new();

        for fet in ctx.graph.components() {
            let Some(ks_net) = fet.net_for_role(PinRole::KelvinSource) else {
                continue;
            };
            let source_net = fet.net_for_role(PinRole::Source);
            let gate_net = fet.net_for_role(PinRole::Gate);

            match gate_net.and_then(|g| Self::driver_for(ctx, g)) {
                Some((driver, Some(return_net))) if return_net != ks_net => {
                    let via = if Some(return_net) == source_net {
                        " (it is referenced to the power source instead)"
                    } else {
                        ""
                    };
                    violations.push(
                        Violation::new(
                            ViolationKind::KelvinSource,
                            format!(
                                "{} drives {} but its return is on {} while the Kelvin source is on {}{}",
                                driver.ref_des, fet.ref_des, return_net, ks_net, via
                            ),
                        )
                        .with_component(&fet.ref_des)
                        .with_component(&driver.ref_des)
                        .with_net(ks_net)
                        .with_net(return_net)
                        .with_suggestion(format!(
                            "Connect the {} return pin to {} (the Kelvin source of {})",
                            driver.ref_des, ks_net, fet.ref_des
                        )),
                    );
                }
                Some(_) => {}
                None => {
                    if Some(ks_net) == source_net {
                        violations.push(
                            Violation::new(
                                ViolationKind::KelvinSource,
                                format!(
                                    "{} Kelvin source shares net {} with its power source",
                                    fet.ref_des, ks_net
                                ),
                            )
                            .with_component(&fet.ref_des)
                            .with_net(ks_net)
                            .with_suggestion(format!(
                                "Bring the Kelvin source of {} out on its own net for the gate driver return",
                                fet.ref_des
                            )),
                        );
                    }
                }
            }

            if let Some((other, _)) = seen.iter().find(|(_, net)| *net == ks_net) {
                violations.push(
                    Violation::new(
                        ViolationKind::KelvinSource,
                        format!(
                            "{} and {} share Kelvin source net {}",
                            other, fet.ref_des, ks_net
                        ),
                    )
                    .with_component(*other)
                    .with_component(&fet.ref_des)
                    .with_net(ks_net)
                    .with_suggestion("Give each MOSFET its own Kelvin source net"),
                );
            }
            seen.push((fet.ref_des.as_str(), ks_net));
        }
        violations
    }
}

pub struct ShortedTerminalsRule;

impl Rule for ShortedTerminalsRule {
    fn id(&self) -> &str {
        "shorted_terminals"
    }

    fn name(&self) -> &str {
        "Shorted Terminals"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let mut violations = Vec::new();
        for c in ctx.graph.components() {
            let drain = c.net_for_role(PinRole::Drain);
            let source = c.net_for_role(PinRole::Source);
            if let (Some(d), Some(s)) = (drain, source) {
                if d == s {
                    violations.push(
                        Violation::new(
                            ViolationKind::ShortedTerminals,
                            format!("{} drain and source are both on {}", c.ref_des, d),
                        )
                        .with_component(&c.ref_des)
                        .with_net(d)
                        .with_suggestion(format!(
                            "Move the drain or source of {} to the correct net",
                            c.ref_des
                        )),
                    );
                }
                continue;
            }

            if c.is_two_terminal() {
                if let [Some(a), Some(b)] = [c.pins[0].net(), c.pins[1].net()] {
                    if a == b {
                        violations.push(
                            Violation::new(
                                ViolationKind::ShortedTerminals,
                                format!("{} has both terminals on {}", c.ref_des, a),
                            )
                            .with_component(&c.ref_des)
                            .with_net(a)
                            .with_suggestion(format!(
                                "Connect the two terminals of {} to different nets",
                                c.ref_des
                            )),
                        );
                    }
                }
            }
        }
        violations
    }
}

pub struct RequiredBridgeRule {
    pub requirements: Vec<BridgeRequirement>,
}

impl Rule for RequiredBridgeRule {
    fn id(&self) -> &str {
        "required_bridge"
    }

    fn name(&self) -> &str {
        "Required Bridge"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        self.requirements
            .iter()
            .filter(|req| {
                ctx.graph
                    .bridging(&req.a, &req.b, |c| ctx.is_class(c, &req.class))
                    .is_empty()
            })
            .map(|req| {
                let purpose = req
                    .purpose
                    .as_ref()
                    .map(|p| format!(" ({})", p))
                    .unwrap_or_default();
                Violation::new(
                    ViolationKind::MissingBridge,
                    format!("No {} connects {} and {} directly{}", req.class, req.a, req.b, purpose),
                )
                .with_net(&req.a)
                .with_net(&req.b)
                .with_suggestion(format!("Place a {} between {} and {}", req.class, req.a, req.b))
            })
            .collect()
    }
}

/// Net adjacency through components: net -> (neighbour net, via ref).
type NetAdjacency<'g> = HashMap<&'g str, Vec<(&'g str, &'g str)>>;

/// Nothing but an isolating part may join the two sides of its barrier,
/// whether by one shared net or through other components.
pub struct IsolationBoundaryRule;

impl IsolationBoundaryRule {
    /// An isolating part only links nets on the same side of its barrier.
    fn adjacency(graph: &CircuitGraph) -> NetAdjacency<'_> {
        let mut adjacency: NetAdjacency<'_> = HashMap::new();
        for c in graph.components() {
            let groups = if c.is_isolator() {
                vec![
                    c.nets_on_side(IsolationSide::Primary),
                    c.nets_on_side(IsolationSide::Secondary),
                ]
            } else {
                vec![c.connected_nets()]
            };
            for nets in groups {
                for (i, a) in nets.iter().enumerate() {
                    for b in &nets[i + 1..] {
                        adjacency.entry(*a).or_default().push((*b, c.ref_des.as_str()));
                        adjacency.entry(*b).or_default().push((*a, c.ref_des.as_str()));
                    }
                }
            }
        }
        adjacency
    }

    /// Shortest path from any net in `from` to any net in `to`, as
    /// (start, end, components crossed).
    fn path<'g>(
        adjacency: &NetAdjacency<'g>,
        from: &[&'g str],
        to: &[&'g str],
    ) -> Option<(&'g str, &'g str, Vec<&'g str>)> {
        let mut previous: HashMap<&str, (&str, &str)> = HashMap::new();
        let mut queue: VecDeque<&str> = from.iter().copied().collect();
        let mut seen: Vec<&str> = from.to_vec();

        while let Some(net) = queue.pop_front() {
            if to.contains(&net) {
                let mut via = Vec::new();
                let mut cursor = net;
                while let Some(&(prev, component)) = previous.get(cursor) {
                    if !via.contains(&component) {
                        via.push(component);
                    }
                    cursor = prev;
                }
                via.reverse();
                return Some((cursor, net, via));
            }
            for &(next, component) in adjacency.get(net).into_iter().flatten() {
                if !seen.contains(&next) {
                    seen.push(next);
                    previous.insert(next, (net, component));
                    queue.push_back(next);
                }
            }
        }
        None
    }
}

impl Rule for IsolationBoundaryRule {
    fn id(&self) -> &str {
        "isolation_boundary"
    }

    fn name(&self) -> &str {
        "Isolation Boundary"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let isolators: Vec<&Component> = ctx.graph.components().filter(|c| c.is_isolator()).collect();
        if isolators.is_empty() {
            return Vec::new();
        }
        let adjacency = Self::adjacency(ctx.graph);

        let mut violations = Vec::new();
        for iso in isolators {
            let primary = iso.nets_on_side(IsolationSide::Primary);
            let secondary = iso.nets_on_side(IsolationSide::Secondary);

            let shared: Vec<&str> = primary.iter().copied().filter(|n| secondary.contains(n)).collect();
            for net in &shared {
                violations.push(
                    Violation::new(
                        ViolationKind::IsolationBreach,
                        format!(
                            "{}: net {} connects both the primary and the secondary side of the isolation barrier",
                            iso.ref_des, net
                        ),
                    )
                    .with_component(&iso.ref_des)
                    .with_net(*net)
                    .with_suggestion(format!(
                        "Give the primary and secondary pins of {} separate nets (e.g. GND1 and GND2 must not be joined)",
                        iso.ref_des
                    )),
                );
            }
            if !shared.is_empty() {
                continue;
            }

            if let Some((from, to, via)) = Self::path(&adjacency, &primary, &secondary) {
                let mut violation = Violation::new(
                    ViolationKind::IsolationBreach,
                    format!(
                        "{}: primary net {} reaches secondary net {} through {}, bypassing the isolation barrier",
                        iso.ref_des,
                        from,
                        to,
                        via.join(", ")
                    ),
                )
                .with_component(&iso.ref_des);
                for component in &via {
                    violation = violation.with_component(*component);
                }
                violations.push(
                    violation
                        .with_net(from)
                        .with_net(to)
                        .with_suggestion(format!(
                            "Remove the connection through {} so only {} crosses between {} and {}",
                            via.join(", "),
                            iso.ref_des,
                            from,
                            to
                        )),
                );
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::PartCatalog;
    use crate::parser::NetlistExtractor;

    fn graph(catalog: &PartCatalog, text: &str) -> CircuitGraph {
        NetlistExtractor::new(catalog).parse_netlist(text).unwrap().graph
    }

    fn hb_with_caps(count: usize) -> String {
        let mut comps = String::new();
        let mut rail = String::new();
        let mut ret = String::new();
        for i in 1..=count {
            comps.push_str(&format!("(comp (ref C{}) (part C) (value 100nF)) ", i));
            rail.push_str(&format!("(node C{} 1) ", i));
            ret.push_str(&format!("(node C{} 2) ", i));
        }
        format!(
            "(netlist (components {comps} (comp (ref Q1) (part IMW65R015M2H)) (comp (ref Q2) (part IMW65R015M2H))) \
             (nets (net (name VBUS+) {rail} (node Q1 2)) (net (name PGND) {ret} (node Q2 3)) \
             (net (name VSW) (node Q1 3) (node Q2 2)) (net (name PWM_H) (node Q1 1)) (net (name PWM_L) (node Q2 1))))"
        )
    }

    fn power_stage_config() -> RuleConfig {
        RuleConfig {
            decoupling: vec![DecouplingRequirement {
                rail: "VBUS+".into(),
                return_net: "PGND".into(),
                min_count: 8,
                class: "capacitor".into(),
            }],
            ..RuleConfig::default()
        }
    }

    #[test]
    fn test_rule_config_defaults_from_json() {
        let config: RuleConfig = serde_json::from_str(
            r#"{"decoupling": [{"rail": "VIN", "return_net": "GND", "min_count": 1}]}"#,
        )
        .unwrap();
        assert!(config.kelvin_source);
        assert_eq!(config.decoupling[0].class, "capacitor");

        let checker = RuleChecker::from_config(&config);
        assert_eq!(
            checker.rule_ids(),
            vec!["unknown_part", "unconnected_pin", "voltage_rating", "decoupling", "kelvin_source", "shorted_terminals"]
        );
    }

    #[test]
    fn test_seven_caps_is_one_decoupling_violation() {
        let catalog = PartCatalog::builtin().unwrap();
        let subs = catalog.default_substitutions();
        let checker = RuleChecker::from_config(&power_stage_config());

        let seven = graph(&catalog, &hb_with_caps(7));
        let violations = checker.check(&RuleContext::new(&seven, &subs, None));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::InsufficientDecoupling);
        assert_eq!(violations[0].nets, vec!["VBUS+", "PGND"]);

        let eight = graph(&catalog, &hb_with_caps(8));
        assert!(checker.check(&RuleContext::new(&eight, &subs, None)).is_empty());
    }

    #[test]
    fn test_over_voltage() {
        let catalog = PartCatalog::builtin().unwrap();
        let subs = catalog.default_substitutions();
        let g = graph(&catalog, &hb_with_caps(8));
        let voltage = Some(VoltageSpec { input: 800.0, output: 400.0 });

        let violations = VoltageRatingRule.check(&RuleContext::new(&g, &subs, voltage));
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().all(|v| v.kind == ViolationKind::OverVoltage));
        assert_eq!(violations[0].components, vec!["Q1"]);
    }

    #[test]
    fn test_unknown_part_and_unconnected_pin_accumulate() {
        let catalog = PartCatalog::builtin().unwrap();
        let subs = catalog.default_substitutions();
        let g = graph(
            &catalog,
            "(netlist (components (comp (ref U1) (part TLV1117-33)) (comp (ref X1) (part MYSTERY))) \
             (nets (net (name VIN) (node U1 3) (node X1 1)) (net (name VOUT) (node U1 2)) (net (name GND) (node U1 1) (node X1 2))))",
        );
        let violations = RuleChecker::from_config(&RuleConfig::default())
            .check(&RuleContext::new(&g, &subs, None));
        let kinds: Vec<_> = violations.iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![ViolationKind::UnknownPart, ViolationKind::UnconnectedPin]);
        assert!(violations[1].message.contains("U1 pin 4 (TAB)"));
    }

    #[test]
    fn test_kelvin_driver_return_on_power_source() {
        let catalog = PartCatalog::builtin().unwrap();
        let subs = catalog.default_substitutions();
        let text = |ret: &str| {
            format!(
                "(netlist (components (comp (ref U1) (part UCC5390E)) (comp (ref R1) (part R)) (comp (ref Q1) (part IMZA65R015M2H))) \
                 (nets (net (name DRV) (node U1 6) (node R1 1)) (net (name GATE) (node R1 2) (node Q1 4)) \
                 (net (name VSW) (node Q1 2) {src}) (net (name KS) (node Q1 3) {ks}) (net (name VBUS) (node Q1 1))))",
                src = if ret == "VSW" { "(node U1 7)" } else { "" },
                ks = if ret == "KS" { "(node U1 7)" } else { "" },
            )
        };

        let good = graph(&catalog, &text("KS"));
        assert!(KelvinSourceRule.check(&RuleContext::new(&good, &subs, None)).is_empty());

        let bad = graph(&catalog, &text("VSW"));
        let violations = KelvinSourceRule.check(&RuleContext::new(&bad, &subs, None));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::KelvinSource);
        assert!(violations[0].message.contains("power source"));
        assert_eq!(violations[0].nets, vec!["KS", "VSW"]);
    }

    #[test]
    fn test_kelvin_without_driver_and_shared_nets() {
        let catalog = PartCatalog::builtin().unwrap();
        let subs = catalog.default_substitutions();
        let g = graph(
            &catalog,
            "(netlist (components (comp (ref Q1) (part IMZA65R015M2H)) (comp (ref Q2) (part IMZA65R015M2H))) \
             (nets (net (name VBUS) (node Q1 1)) (net (name VSW) (node Q1 2) (node Q1 3) (node Q2 1)) \
             (net (name PGND) (node Q2 2)) (net (name KS) (node Q2 3)) (net (name G1) (node Q1 4)) (net (name G2) (node Q2 4))))",
        );
        let violations = KelvinSourceRule.check(&RuleContext::new(&g, &subs, None));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("Q1 Kelvin source shares net VSW"));
    }

    fn isolated_driver(extra: &str, gnd2: &str) -> String {
        format!(
            "(netlist (components (comp (ref U1) (part UCC5390E)) (comp (ref C1) (part C)) (comp (ref C3) (part C)) {extra}) \
             (nets (net (name VCCI) (node U1 1) (node C1 1)) (net (name GND1) (node U1 3) (node U1 4) (node C1 2) {gnd1}) \
             (net (name IN_P) (node U1 2)) (net (name VCC2) (node U1 5) (node C3 1)) \
             (net (name {gnd2}) (node U1 7) (node C3 2) {gnd2_extra}) (net (name VEE2) (node U1 8)) (net (name OUT) (node U1 6))))",
            extra = if extra.is_empty() { "" } else { "(comp (ref R9) (part R))" },
            gnd1 = if extra.is_empty() { "" } else { "(node R9 1)" },
            gnd2 = gnd2,
            gnd2_extra = if extra.is_empty() { "" } else { "(node R9 2)" },
        )
    }

    #[test]
    fn test_isolation_boundary() {
        let catalog = PartCatalog::builtin().unwrap();
        let subs = catalog.default_substitutions();

        let good = graph(&catalog, &isolated_driver("", "GND2"));
        assert!(IsolationBoundaryRule.check(&RuleContext::new(&good, &subs, None)).is_empty());

        // GND1 and GND2 bridged by a resistor
        let bridged = graph(&catalog, &isolated_driver("R9", "GND2"));
        let violations = IsolationBoundaryRule.check(&RuleContext::new(&bridged, &subs, None));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::IsolationBreach);
        assert_eq!(violations[0].components, vec!["U1", "R9"]);
        assert_eq!(violations[0].nets, vec!["GND1", "GND2"]);
    }

    #[test]
    fn test_shorted_terminals_and_missing_bridge() {
        let catalog = PartCatalog::builtin().unwrap();
        let subs = catalog.default_substitutions();
        let g = graph(
            &catalog,
            "(netlist (components (comp (ref C1) (part C)) (comp (ref Q1) (part IMW65R015M2H))) \
             (nets (net (name VB) (node C1 1) (node C1 2)) (net (name VS) (node Q1 2) (node Q1 3)) (net (name G) (node Q1 1))))",
        );
        let shorted = ShortedTerminalsRule.check(&RuleContext::new(&g, &subs, None));
        assert_eq!(shorted.len(), 2);
        assert_eq!(shorted[0].components, vec!["C1"]);
        assert!(shorted[1].message.contains("drain and source"));

        let bridge = RequiredBridgeRule {
            requirements: vec![BridgeRequirement {
                a: "VB".into(),
                b: "VS".into(),
                class: "capacitor".into(),
                purpose: Some("bootstrap".into()),
            }],
        };
        let missing = bridge.check(&RuleContext::new(&g, &subs, None));
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].kind, ViolationKind::MissingBridge);
    }
}
