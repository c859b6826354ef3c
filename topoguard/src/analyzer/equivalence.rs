//! Port-anchored constrained subgraph matching.
//!
//! The candidate's port nets are pinned to the reference's port nets
//! first. The search then extends that mapping outward, one reference
//! component at a time, in breadth-first order from the port nets. Each
//! component carries a signature (substitution class plus the sorted roles
//! of its connected pins) and may only map onto a candidate component with
//! the same signature. Pin assignments must keep the induced net mapping
//! injective in both directions.
//!
//! When no complete mapping exists the deepest partial mapping is
//! diagnosed and only the first divergence is reported.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::analyzer::violation::{MatchResult, Violation, ViolationKind};
use crate::circuit::{CircuitGraph, Component, Net, PinRef, PinRole};
use crate::library::{ReferenceSubCircuit, SubstitutionTable, SymmetrySwap};

/// Search nodes explored before the engine gives up and diagnoses.
pub const DEFAULT_NODE_BUDGET: usize = 200_000;

type Signature = (String, Vec<PinRole>);

/// Index-based view of one graph.
struct Side<'g> {
    graph: &'g CircuitGraph,
    comps: Vec<&'g Component>,
    nets: Vec<&'g Net>,
    net_index: HashMap<&'g str, usize>,
    classes: Vec<String>,
    signatures: Vec<Signature>,
    /// comp -> pin -> net
    pin_nets: Vec<Vec<Option<usize>>>,
    /// net -> (comp, pin), member order, no duplicates
    net_members: Vec<Vec<(usize, usize)>>,
}

impl<'g> Side<'g> {
    fn new(graph: &'g CircuitGraph, substitutions: &SubstitutionTable) -> Self {
        let comps: Vec<&Component> = graph.components().collect();
        let nets: Vec<&Net> = graph.nets().collect();
        let net_index: HashMap<&str, usize> = nets
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.as_str(), i))
            .collect();
        let comp_index: HashMap<&str, usize> = comps
            .iter()
            .enumerate()
            .map(|(i, c)| (c.ref_des.as_str(), i))
            .collect();

        let pin_nets = comps
            .iter()
            .map(|c| {
                c.pins
                    .iter()
                    .map(|p| p.net().and_then(|n| net_index.get(n).copied()))
                    .collect()
            })
            .collect();

        let net_members = nets
            .iter()
            .map(|net| {
                let mut members: Vec<(usize, usize)> = Vec::new();
                for m in &net.members {
                    let Some(&ci) = comp_index.get(m.ref_des.as_str()) else {
                        continue;
                    };
                    let Some(pi) = comps[ci].pins.iter().position(|p| p.number == m.pin) else {
                        continue;
                    };
                    if !members.contains(&(ci, pi)) {
                        members.push((ci, pi));
                    }
                }
                members
            })
            .collect();

        let classes: Vec<String> = comps
            .iter()
            .map(|c| substitutions.class_or_unknown(&c.part).to_string())
            .collect();

        let signatures = comps
            .iter()
            .zip(&classes)
            .map(|(c, class)| {
                let mut roles: Vec<PinRole> = c
                    .pins
                    .iter()
                    .filter(|p| p.net().is_some())
                    .map(|p| p.role)
                    .collect();
                roles.sort();
                (class.clone(), roles)
            })
            .collect();

        Self {
            graph,
            comps,
            nets,
            net_index,
            classes,
            signatures,
            pin_nets,
            net_members,
        }
    }

    fn port_net(&self, name: &str) -> Option<usize> {
        self.graph
            .resolve_net(name)
            .and_then(|n| self.net_index.get(n).copied())
    }

    /// Distinct components on `net`, member order.
    fn comps_on(&self, net: usize) -> Vec<usize> {
        let mut out: Vec<usize> = Vec::new();
        for &(c, _) in &self.net_members[net] {
            if !out.contains(&c) {
                out.push(c);
            }
        }
        out
    }

    fn connected_pins(&self, comp: usize) -> impl Iterator<Item = usize> + '_ {
        self.pin_nets[comp]
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| i)
    }

    /// Roles and nets of the connected pins; equal fingerprints mean the
    /// two components are interchangeable.
    fn fingerprint(&self, comp: usize) -> Vec<(PinRole, usize)> {
        let mut fp: Vec<(PinRole, usize)> = self
            .connected_pins(comp)
            .filter_map(|p| Some((self.comps[comp].pins[p].role, self.pin_nets[comp][p]?)))
            .collect();
        fp.sort();
        fp
    }

    fn pin_label(&self, comp: usize, pin: usize) -> String {
        PinRef::new(&self.comps[comp].ref_des, &self.comps[comp].pins[pin].number).to_string()
    }

    fn members_label(&self, net: usize) -> String {
        self.net_members[net]
            .iter()
            .map(|&(c, p)| self.pin_label(c, p))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone)]
struct State {
    comp_map: Vec<Option<usize>>,
    /// ref comp -> ref pin -> candidate pin
    pin_map: Vec<Vec<Option<usize>>>,
    used: Vec<bool>,
    net_map: Vec<Option<usize>>,
    net_rev: Vec<Option<usize>>,
    mapped: usize,
}

impl State {
    fn new(reference: &Side<'_>, candidate: &Side<'_>) -> Self {
        Self {
            comp_map: vec![None; reference.comps.len()],
            pin_map: reference.comps.iter().map(|c| vec![None; c.pins.len()]).collect(),
            used: vec![false; candidate.comps.len()],
            net_map: vec![None; reference.nets.len()],
            net_rev: vec![None; candidate.nets.len()],
            mapped: 0,
        }
    }

    fn bind_net(&mut self, rn: usize, cn: usize) -> bool {
        match (self.net_map[rn], self.net_rev[cn]) {
            (Some(c), _) => c == cn,
            (None, None) => {
                self.net_map[rn] = Some(cn);
                self.net_rev[cn] = Some(rn);
                true
            }
            (None, Some(_)) => false,
        }
    }

    fn bind_component(&mut self, r: usize, c: usize, pins: Vec<Option<usize>>) {
        self.comp_map[r] = Some(c);
        self.pin_map[r] = pins;
        self.used[c] = true;
        self.mapped += 1;
    }
}

/// Every ordering of `items`, lexicographic in input order.
fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let first = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, first);
            out.push(tail);
        }
    }
    out
}

/// Cartesian product of per-role permutations: (ref pin, candidate pin) lists.
fn pin_assignments(groups: &[(Vec<usize>, Vec<usize>)]) -> Vec<Vec<(usize, usize)>> {
    let mut acc: Vec<Vec<(usize, usize)>> = vec![Vec::new()];
    for (ref_pins, cand_pins) in groups {
        let mut next = Vec::new();
        for partial in &acc {
            for perm in permutations(cand_pins) {
                let mut combo = partial.clone();
                combo.extend(ref_pins.iter().copied().zip(perm));
                next.push(combo);
            }
        }
        acc = next;
    }
    acc
}

/// Reference components in breadth-first order from the anchored nets;
/// disconnected leftovers restart the walk in declaration order.
fn traversal_order(reference: &Side<'_>, anchors: &[usize]) -> Vec<usize> {
    let mut order = Vec::with_capacity(reference.comps.len());
    let mut seen_comp = vec![false; reference.comps.len()];
    let mut seen_net = vec![false; reference.nets.len()];
    let mut queue: VecDeque<usize> = VecDeque::new();

    for &rn in anchors {
        if !seen_net[rn] {
            seen_net[rn] = true;
            queue.push_back(rn);
        }
    }

    loop {
        while let Some(net) = queue.pop_front() {
            for &(comp, _) in &reference.net_members[net] {
                if seen_comp[comp] {
                    continue;
                }
                seen_comp[comp] = true;
                order.push(comp);
                for &n in reference.pin_nets[comp].iter().flatten() {
                    if !seen_net[n] {
                        seen_net[n] = true;
                        queue.push_back(n);
                    }
                }
            }
        }

        let Some(next) = (0..reference.comps.len()).find(|&c| !seen_comp[c]) else {
            break;
        };
        seen_comp[next] = true;
        order.push(next);
        for &n in reference.pin_nets[next].iter().flatten() {
            if !seen_net[n] {
                seen_net[n] = true;
                queue.push_back(n);
            }
        }
    }
    order
}

struct Search<'s, 'g> {
    reference: &'s Side<'g>,
    candidate: &'s Side<'g>,
    order: Vec<usize>,
    budget: usize,
    exhausted: bool,
    best: State,
}

impl<'s, 'g> Search<'s, 'g> {
    fn extend(&mut self, depth: usize, state: State) -> Option<State> {
        if self.budget == 0 {
            self.exhausted = true;
            return None;
        }
        self.budget -= 1;
        if state.mapped > self.best.mapped {
            self.best = state.clone();
        }
        if depth == self.order.len() {
            let complete = self.candidate.comps.len() == self.reference.comps.len();
            return complete.then_some(state);
        }

        let r = self.order[depth];
        let mut tried: Vec<Vec<(PinRole, usize)>> = Vec::new();
        for c in self.candidates_for(r, &state) {
            let fingerprint = self.candidate.fingerprint(c);
            if tried.contains(&fingerprint) {
                continue;
            }
            tried.push(fingerprint);

            for next in self.extensions(r, c, &state) {
                if let Some(found) = self.extend(depth + 1, next) {
                    return Some(found);
                }
                if self.exhausted {
                    return None;
                }
            }
        }
        None
    }

    fn candidates_for(&self, r: usize, state: &State) -> Vec<usize> {
        let anchor = self.reference.pin_nets[r]
            .iter()
            .flatten()
            .find_map(|&rn| state.net_map[rn]);
        let pool: Vec<usize> = match anchor {
            Some(cn) => self.candidate.comps_on(cn),
            None => (0..self.candidate.comps.len()).collect(),
        };
        pool.into_iter()
            .filter(|&c| !state.used[c])
            .filter(|&c| self.candidate.signatures[c] == self.reference.signatures[r])
            .collect()
    }

    /// States that map `r` onto `c`, one per distinct induced net mapping.
    fn extensions(&self, r: usize, c: usize, state: &State) -> Vec<State> {
        let ref_comp = self.reference.comps[r];
        let cand_comp = self.candidate.comps[c];

        let mut roles: Vec<PinRole> = self
            .reference
            .connected_pins(r)
            .map(|p| ref_comp.pins[p].role)
            .collect();
        roles.sort();
        roles.dedup();

        let groups: Vec<(Vec<usize>, Vec<usize>)> = roles
            .iter()
            .map(|role| {
                let ref_pins = self
                    .reference
                    .connected_pins(r)
                    .filter(|&p| ref_comp.pins[p].role == *role)
                    .collect();
                let cand_pins = self
                    .candidate
                    .connected_pins(c)
                    .filter(|&p| cand_comp.pins[p].role == *role)
                    .collect();
                (ref_pins, cand_pins)
            })
            .collect();

        let mut seen: Vec<Vec<(usize, usize)>> = Vec::new();
        let mut out = Vec::new();
        for combo in pin_assignments(&groups) {
            let mut pairs: Vec<(usize, usize)> = combo
                .iter()
                .filter_map(|&(rp, cp)| {
                    Some((self.reference.pin_nets[r][rp]?, self.candidate.pin_nets[c][cp]?))
                })
                .collect();
            pairs.sort();
            pairs.dedup();
            if seen.contains(&pairs) {
                continue;
            }
            seen.push(pairs.clone());

            let mut next = state.clone();
            if pairs.iter().all(|&(rn, cn)| next.bind_net(rn, cn)) {
                let mut pins = vec![None; ref_comp.pins.len()];
                for (rp, cp) in combo {
                    pins[rp] = Some(cp);
                }
                next.bind_component(r, c, pins);
                out.push(next);
            }
        }
        out
    }
}

/// Matches candidates against one reference sub-circuit.
pub struct EquivalenceEngine<'r> {
    reference: &'r ReferenceSubCircuit,
    node_budget: usize,
}

impl<'r> EquivalenceEngine<'r> {
    pub fn new(reference: &'r ReferenceSubCircuit) -> Self {
        Self {
            reference,
            node_budget: DEFAULT_NODE_BUDGET,
        }
    }

    pub fn with_node_budget(mut self, budget: usize) -> Self {
        self.node_budget = budget.max(1);
        self
    }

    /// Compare `candidate` against the reference.
    ///
    /// The identity port anchoring is tried first, then each declared
    /// symmetry swap the reference actually admits. On failure the
    /// diagnosis of the identity anchoring is returned.
    pub fn compare(&self, candidate: &CircuitGraph) -> MatchResult {
        let substitutions = &self.reference.substitutions;
        let reference = Side::new(&self.reference.graph, substitutions);
        let cand = Side::new(candidate, substitutions);

        let identity = match self.attempt(&reference, &cand, None) {
            Ok(mapping) => return MatchResult::passed(mapping, None),
            Err(violation) => violation,
        };

        for swap in &self.reference.symmetry {
            if !self.admits(swap) {
                tracing::debug!("Skipping symmetry {}: reference is not symmetric under it", swap.name);
                continue;
            }
            if let Ok(mapping) = self.attempt(&reference, &cand, Some(swap)) {
                tracing::debug!("Matched under symmetry {}", swap.name);
                return MatchResult::passed(mapping, Some(swap.name.clone()));
            }
        }

        MatchResult::failed(identity)
    }

    /// A swap is admissible only when every swapped component pair agrees
    /// on class, rating and value.
    fn admits(&self, swap: &SymmetrySwap) -> bool {
        let graph = &self.reference.graph;
        let subs = &self.reference.substitutions;
        swap.components.iter().all(|(x, y)| {
            match (graph.component(x), graph.component(y)) {
                (Some(a), Some(b)) => {
                    subs.class_or_unknown(&a.part) == subs.class_or_unknown(&b.part)
                        && a.rating == b.rating
                        && a.value == b.value
                }
                _ => false,
            }
        })
    }

    fn attempt(
        &self,
        reference: &Side<'_>,
        candidate: &Side<'_>,
        swap: Option<&SymmetrySwap>,
    ) -> Result<BTreeMap<String, String>, Violation> {
        let (state, anchors) = self.anchor(reference, candidate, swap)?;
        let order = traversal_order(reference, &anchors);

        let mut search = Search {
            reference,
            candidate,
            order,
            budget: self.node_budget,
            exhausted: false,
            best: state.clone(),
        };

        match search.extend(0, state) {
            Some(found) => Ok(found
                .comp_map
                .iter()
                .enumerate()
                .filter_map(|(r, c)| {
                    let c = (*c)?;
                    Some((
                        reference.comps[r].ref_des.clone(),
                        candidate.comps[c].ref_des.clone(),
                    ))
                })
                .collect()),
            None => {
                if search.exhausted {
                    tracing::warn!(
                        "Equivalence search exhausted its budget of {} nodes; diagnosing best partial mapping",
                        self.node_budget
                    );
                }
                Err(Diagnosis::new(reference, candidate, search.best).first_divergence())
            }
        }
    }

    /// Pin reference ports onto candidate nets.
    fn anchor(
        &self,
        reference: &Side<'_>,
        candidate: &Side<'_>,
        swap: Option<&SymmetrySwap>,
    ) -> Result<(State, Vec<usize>), Violation> {
        let ref_graph = &self.reference.graph;
        let cand_graph = candidate.graph;

        if !cand_graph.inputs.is_empty() || !cand_graph.outputs.is_empty() {
            let sorted = |v: &[String]| {
                let mut v = v.to_vec();
                v.sort();
                v
            };
            if sorted(&cand_graph.inputs) != sorted(&ref_graph.inputs)
                || sorted(&cand_graph.outputs) != sorted(&ref_graph.outputs)
            {
                let mut v = Violation::new(
                    ViolationKind::PortMismatch,
                    format!(
                        "Declared ports do not match: expected inputs [{}] and outputs [{}], found inputs [{}] and outputs [{}]",
                        ref_graph.inputs.join(", "),
                        ref_graph.outputs.join(", "),
                        cand_graph.inputs.join(", "),
                        cand_graph.outputs.join(", ")
                    ),
                )
                .with_suggestion(format!(
                    "Declare exactly (ports (input {}) (output {}))",
                    ref_graph.inputs.join(" "),
                    ref_graph.outputs.join(" ")
                ));
                for port in ref_graph.ports() {
                    v = v.with_net(port);
                }
                return Err(v);
            }
        }

        let mut state = State::new(reference, candidate);
        let mut anchored: Vec<(&str, usize)> = Vec::new();
        for port in ref_graph.ports() {
            let Some(rn) = reference.port_net(port) else {
                continue;
            };
            let wanted = swap.map(|s| s.apply(port)).unwrap_or(port);
            let Some(cn) = candidate.port_net(wanted) else {
                return Err(Violation::new(
                    ViolationKind::PortMismatch,
                    format!("Port {} is not a net in the candidate", wanted),
                )
                .with_net(wanted)
                .with_suggestion(format!("Name the net that carries {} exactly {}", wanted, wanted)));
            };

            if !state.bind_net(rn, cn) {
                return Err(self.port_conflict(reference, candidate, &state, &anchored, wanted, rn, cn));
            }
            anchored.push((wanted, rn));
        }

        let nets = anchored.iter().map(|(_, rn)| *rn).collect();
        Ok((state, nets))
    }

    #[allow(clippy::too_many_arguments)]
    fn port_conflict(
        &self,
        reference: &Side<'_>,
        candidate: &Side<'_>,
        state: &State,
        anchored: &[(&str, usize)],
        port: &str,
        rn: usize,
        cn: usize,
    ) -> Violation {
        let cand_net = &candidate.nets[cn].name;
        if let Some(other_rn) = state.net_rev[cn].filter(|&other| other != rn) {
            let other = anchored
                .iter()
                .find(|(_, r)| *r == other_rn)
                .map(|(p, _)| *p)
                .unwrap_or(cand_net.as_str());
            let node = &reference.nets[rn].name;
            let members = reference.members_label(rn);
            let mut v = Violation::new(
                ViolationKind::PortMismatch,
                format!(
                    "Port {} is on the same net as port {} ({}); the node {} joining {} is missing",
                    port, other, cand_net, node, members
                ),
            )
            .with_net(port)
            .with_net(other)
            .with_suggestion(format!(
                "Give {} its own net joining {}, separate from {}",
                port, members, other
            ));
            for &(c, _) in &reference.net_members[rn] {
                v = v.with_component(&reference.comps[c].ref_des);
            }
            return v;
        }

        let split_from = state.net_map[rn]
            .map(|c| candidate.nets[c].name.clone())
            .unwrap_or_default();
        Violation::new(
            ViolationKind::PortMismatch,
            format!(
                "Port {} must be the same node as {}, but the candidate keeps them on separate nets",
                port, split_from
            ),
        )
        .with_net(port)
        .with_net(split_from.clone())
        .with_suggestion(format!("Merge {} and {} into one net", port, split_from))
    }
}

/// Post-mortem of a failed search.
struct Diagnosis<'s, 'g> {
    reference: &'s Side<'g>,
    candidate: &'s Side<'g>,
    state: State,
}

impl<'s, 'g> Diagnosis<'s, 'g> {
    fn new(reference: &'s Side<'g>, candidate: &'s Side<'g>, best: State) -> Self {
        let mut diagnosis = Self {
            reference,
            candidate,
            state: best,
        };
        diagnosis.pair_leftovers();
        diagnosis.infer_nets();
        diagnosis
    }

    /// Candidate pin for each pin of `r` when paired with `c`: pins already
    /// on the image net first, the rest in order, roles kept.
    fn correspond(&self, r: usize, c: usize) -> Vec<Option<usize>> {
        let ref_comp = self.reference.comps[r];
        let cand_comp = self.candidate.comps[c];
        let mut map = vec![None; ref_comp.pins.len()];
        let mut taken = vec![false; cand_comp.pins.len()];

        for (rp, pin) in ref_comp.pins.iter().enumerate() {
            let Some(image) = self.reference.pin_nets[r][rp].and_then(|rn| self.state.net_map[rn]) else {
                continue;
            };
            if let Some(cp) = (0..cand_comp.pins.len()).find(|&cp| {
                !taken[cp]
                    && cand_comp.pins[cp].role == pin.role
                    && self.candidate.pin_nets[c][cp] == Some(image)
            }) {
                taken[cp] = true;
                map[rp] = Some(cp);
            }
        }

        for (rp, pin) in ref_comp.pins.iter().enumerate() {
            if map[rp].is_some() {
                continue;
            }
            if let Some(cp) =
                (0..cand_comp.pins.len()).find(|&cp| !taken[cp] && cand_comp.pins[cp].role == pin.role)
            {
                taken[cp] = true;
                map[rp] = Some(cp);
            }
        }
        map
    }

    fn agreement(&self, r: usize, pins: &[Option<usize>], c: usize) -> usize {
        pins.iter()
            .enumerate()
            .filter(|(rp, cp)| {
                let image = self.reference.pin_nets[r][*rp].and_then(|rn| self.state.net_map[rn]);
                let actual = cp.and_then(|cp| self.candidate.pin_nets[c][cp]);
                image.is_some() && image == actual
            })
            .count()
    }

    fn pair_leftovers(&mut self) {
        for r in 0..self.reference.comps.len() {
            if self.state.comp_map[r].is_some() {
                continue;
            }
            let mut choice: Option<(usize, usize, Vec<Option<usize>>)> = None;
            for c in 0..self.candidate.comps.len() {
                if self.state.used[c] || self.candidate.classes[c] != self.reference.classes[r] {
                    continue;
                }
                let pins = self.correspond(r, c);
                let score = self.agreement(r, &pins, c);
                if choice.as_ref().map_or(true, |(best, _, _)| score > *best) {
                    choice = Some((score, c, pins));
                }
            }
            if let Some((_, c, pins)) = choice {
                self.state.bind_component(r, c, pins);
            }
        }
    }

    /// Give unmapped reference nets the candidate net most of their
    /// paired pins landed on.
    fn infer_nets(&mut self) {
        for rn in 0..self.reference.nets.len() {
            if self.state.net_map[rn].is_some() {
                continue;
            }
            let mut votes: BTreeMap<usize, usize> = BTreeMap::new();
            for &(r, rp) in &self.reference.net_members[rn] {
                let Some(c) = self.state.comp_map[r] else {
                    continue;
                };
                let Some(cn) = self.state.pin_map[r][rp].and_then(|cp| self.candidate.pin_nets[c][cp]) else {
                    continue;
                };
                if self.state.net_rev[cn].is_none() {
                    *votes.entry(cn).or_default() += 1;
                }
            }
            let mut winner: Option<(usize, usize)> = None;
            for (cn, count) in votes {
                if winner.map_or(true, |(_, best)| count > best) {
                    winner = Some((cn, count));
                }
            }
            if let Some((cn, _)) = winner {
                self.state.bind_net(rn, cn);
            }
        }
    }

    /// Candidate-facing name of a reference net.
    fn net_name(&self, rn: usize) -> &str {
        match self.state.net_map[rn] {
            Some(cn) => &self.candidate.nets[cn].name,
            None => &self.reference.nets[rn].name,
        }
    }

    fn first_divergence(&self) -> Violation {
        self.missing_member()
            .or_else(|| self.missing_component())
            .or_else(|| self.unexpected_member())
            .or_else(|| self.extra_component())
            .unwrap_or_else(|| {
                Violation::new(
                    ViolationKind::NetMismatch,
                    "The candidate's connectivity does not match the expected topology",
                )
                .with_suggestion("Compare each net against the task description and fix the connections")
            })
    }

    fn missing_component_violation(&self, r: usize) -> Violation {
        let comp = self.reference.comps[r];
        let nets: Vec<&str> = self.reference.pin_nets[r]
            .iter()
            .flatten()
            .map(|&rn| self.net_name(rn))
            .fold(Vec::new(), |mut acc, n| {
                if !acc.contains(&n) {
                    acc.push(n);
                }
                acc
            });
        let class = &self.reference.classes[r];
        let mut v = Violation::new(
            ViolationKind::MissingComponent,
            format!(
                "Missing a {} ({}) connecting {}; no candidate component corresponds to it",
                class,
                comp.part,
                nets.join(", ")
            ),
        )
        .with_component(&comp.ref_des)
        .with_suggestion(format!("Add a {} between {}", class, nets.join(" and ")));
        for net in nets {
            v = v.with_net(net);
        }
        v
    }

    fn missing_member(&self) -> Option<Violation> {
        for rn in 0..self.reference.nets.len() {
            let expected = self.state.net_map[rn];
            for &(r, rp) in &self.reference.net_members[rn] {
                let Some(c) = self.state.comp_map[r] else {
                    return Some(self.missing_component_violation(r));
                };
                let net = self.net_name(rn).to_string();
                let Some(cp) = self.state.pin_map[r][rp] else {
                    let ref_pin = &self.reference.comps[r].pins[rp];
                    return Some(
                        Violation::new(
                            ViolationKind::NetMismatch,
                            format!(
                                "Net {} is missing a {} pin of {}",
                                net, ref_pin.role, self.candidate.comps[c].ref_des
                            ),
                        )
                        .with_component(&self.candidate.comps[c].ref_des)
                        .with_net(net.clone())
                        .with_suggestion(format!(
                            "Connect the {} pin of {} to {}",
                            ref_pin.role, self.candidate.comps[c].ref_des, net
                        )),
                    );
                };

                let actual = self.candidate.pin_nets[c][cp];
                if actual.is_some() && actual == expected {
                    continue;
                }
                let label = self.candidate.pin_label(c, cp);
                let mut v = Violation::new(
                    ViolationKind::NetMismatch,
                    match actual {
                        Some(an) => format!(
                            "Net {} is missing {} (it is connected to {})",
                            net, label, self.candidate.nets[an].name
                        ),
                        None => format!("Net {} is missing {} (it is not connected)", net, label),
                    },
                )
                .with_component(&self.candidate.comps[c].ref_des)
                .with_net(net.clone());
                if let Some(an) = actual {
                    v = v.with_net(&self.candidate.nets[an].name);
                }
                return Some(v.with_suggestion(format!("Connect {} to {}", label, net)));
            }
        }
        None
    }

    fn missing_component(&self) -> Option<Violation> {
        (0..self.reference.comps.len())
            .find(|&r| self.state.comp_map[r].is_none())
            .map(|r| self.missing_component_violation(r))
    }

    fn unexpected_member(&self) -> Option<Violation> {
        let mut inverse: Vec<Option<usize>> = vec![None; self.candidate.comps.len()];
        for (r, c) in self.state.comp_map.iter().enumerate() {
            if let Some(c) = c {
                inverse[*c] = Some(r);
            }
        }

        for rn in 0..self.reference.nets.len() {
            let Some(cn) = self.state.net_map[rn] else {
                continue;
            };
            for &(c, cp) in &self.candidate.net_members[cn] {
                let Some(r) = inverse[c] else {
                    continue;
                };
                let Some(rp) = self.state.pin_map[r].iter().position(|&p| p == Some(cp)) else {
                    continue;
                };
                let belongs = self.reference.pin_nets[r][rp];
                if belongs == Some(rn) {
                    continue;
                }
                let label = self.candidate.pin_label(c, cp);
                let net = self.net_name(rn).to_string();
                let mut v = Violation::new(
                    ViolationKind::NetMismatch,
                    match belongs {
                        Some(bn) => format!(
                            "Net {} has an unexpected connection to {} (it belongs on {})",
                            net,
                            label,
                            self.net_name(bn)
                        ),
                        None => format!("Net {} has an unexpected connection to {}", net, label),
                    },
                )
                .with_component(&self.candidate.comps[c].ref_des)
                .with_net(net.clone());
                v = match belongs {
                    Some(bn) => {
                        let target = self.net_name(bn).to_string();
                        v.with_net(target.clone())
                            .with_suggestion(format!("Move {} from {} to {}", label, net, target))
                    }
                    None => v.with_suggestion(format!("Disconnect {} from {}", label, net)),
                };
                return Some(v);
            }
        }
        None
    }

    fn extra_component(&self) -> Option<Violation> {
        let c = (0..self.candidate.comps.len()).find(|&c| !self.state.used[c])?;
        let comp = self.candidate.comps[c];
        let mut v = Violation::new(
            ViolationKind::ExtraComponent,
            format!(
                "{} ({}) has no counterpart in the expected circuit",
                comp.ref_des, comp.part
            ),
        )
        .with_component(&comp.ref_des)
        .with_suggestion(format!("Remove {}", comp.ref_des));
        for net in comp.connected_nets() {
            v = v.with_net(net);
        }
        Some(v)
    }
}
