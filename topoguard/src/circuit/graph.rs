//! Circuit Graph Implementation
//!
//! A bipartite petgraph representation of a netlist: component nodes and
//! net nodes, joined by one edge per pin connection. Insertion order is
//! declaration order, which the equivalence engine and rule checker rely
//! on for deterministic reporting.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::schema::*;
use crate::parser::sexp::SExp;

/// Node type in the circuit graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CircuitNode {
    Component(Component),
    Net(Net),
}

impl CircuitNode {
    pub fn as_component(&self) -> Option<&Component> {
        match self {
            CircuitNode::Component(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_net(&self) -> Option<&Net> {
        match self {
            CircuitNode::Net(n) => Some(n),
            _ => None,
        }
    }

    fn as_component_mut(&mut self) -> Option<&mut Component> {
        match self {
            CircuitNode::Component(c) => Some(c),
            _ => None,
        }
    }
}

/// Edge from a component to a net: the pin that makes the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinEdge {
    pub pin_number: String,
    pub role: PinRole,
}

/// A parsed circuit: components, nets and declared port nodes.
#[derive(Debug, Clone, Default)]
pub struct CircuitGraph {
    graph: DiGraph<CircuitNode, PinEdge>,
    component_indices: HashMap<String, NodeIndex>,
    net_indices: HashMap<String, NodeIndex>,
    /// Every name and alias -> canonical net name
    net_names: HashMap<String, String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl CircuitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component(&mut self, component: Component) -> NodeIndex {
        let ref_des = component.ref_des.clone();
        let idx = self.graph.add_node(CircuitNode::Component(component));
        self.component_indices.insert(ref_des, idx);
        idx
    }

    /// Add a net and create an edge for each member pin.
    ///
    /// Members naming unknown components or pins are skipped; the
    /// extractor rejects those before the graph is built.
    pub fn add_net(&mut self, net: Net) -> NodeIndex {
        let members = net.members.clone();
        let name = net.name.clone();
        for alias in net.names() {
            self.net_names.insert(alias.to_string(), name.clone());
        }
        let net_idx = self.graph.add_node(CircuitNode::Net(net));
        self.net_indices.insert(name.clone(), net_idx);

        for member in members {
            let Some(&comp_idx) = self.component_indices.get(&member.ref_des) else {
                continue;
            };
            let role = self
                .graph
                .node_weight_mut(comp_idx)
                .and_then(|n| n.as_component_mut())
                .and_then(|c| c.pin_mut(&member.pin))
                .map(|pin| {
                    pin.connection = PinConnection::Net(name.clone());
                    pin.role
                });
            if let Some(role) = role {
                self.graph.add_edge(
                    comp_idx,
                    net_idx,
                    PinEdge {
                        pin_number: member.pin.clone(),
                        role,
                    },
                );
            }
        }

        net_idx
    }

    /// Tie a pin to the NC sentinel.
    pub fn mark_no_connect(&mut self, pin: &PinRef) -> bool {
        let Some(&idx) = self.component_indices.get(&pin.ref_des) else {
            return false;
        };
        match self
            .graph
            .node_weight_mut(idx)
            .and_then(|n| n.as_component_mut())
            .and_then(|c| c.pin_mut(&pin.pin))
        {
            Some(p) => {
                p.connection = PinConnection::NoConnect;
                true
            }
            None => false,
        }
    }

    pub fn component(&self, ref_des: &str) -> Option<&Component> {
        self.component_indices
            .get(ref_des)
            .and_then(|&idx| self.graph.node_weight(idx))
            .and_then(|n| n.as_component())
    }

    /// Look up a net by its name or one of its aliases.
    pub fn net(&self, name: &str) -> Option<&Net> {
        let canonical = self.net_names.get(name)?;
        self.net_indices
            .get(canonical)
            .and_then(|&idx| self.graph.node_weight(idx))
            .and_then(|n| n.as_net())
    }

    /// Canonical net name for a name or alias.
    pub fn resolve_net(&self, name: &str) -> Option<&str> {
        self.net_names.get(name).map(|s| s.as_str())
    }

    /// Components in declaration order.
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.graph.node_weights().filter_map(|n| n.as_component())
    }

    /// Nets in declaration order.
    pub fn nets(&self) -> impl Iterator<Item = &Net> {
        self.graph.node_weights().filter_map(|n| n.as_net())
    }

    pub fn component_count(&self) -> usize {
        self.component_indices.len()
    }

    pub fn net_count(&self) -> usize {
        self.net_indices.len()
    }

    /// Declared ports, inputs first.
    pub fn ports(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().chain(self.outputs.iter()).map(|s| s.as_str())
    }

    pub fn nets_for_component(&self, ref_des: &str) -> Vec<&Net> {
        let Some(&comp_idx) = self.component_indices.get(ref_des) else {
            return Vec::new();
        };

        let mut nets: Vec<(NodeIndex, &Net)> = self
            .graph
            .edges_directed(comp_idx, Direction::Outgoing)
            .filter_map(|edge| {
                self.graph
                    .node_weight(edge.target())
                    .and_then(|n| n.as_net())
                    .map(|n| (edge.target(), n))
            })
            .collect();
        nets.sort_by_key(|(idx, _)| *idx);
        nets.dedup_by_key(|(idx, _)| *idx);
        nets.into_iter().map(|(_, n)| n).collect()
    }

    /// Components with at least one pin on `net_name`, in member order.
    pub fn components_on_net(&self, net_name: &str) -> Vec<&Component> {
        let Some(net) = self.net(net_name) else {
            return Vec::new();
        };
        let mut seen: Vec<&str> = Vec::new();
        net.members
            .iter()
            .filter_map(|m| {
                if seen.contains(&m.ref_des.as_str()) {
                    return None;
                }
                seen.push(m.ref_des.as_str());
                self.component(&m.ref_des)
            })
            .collect()
    }

    /// Net the given pin sits on.
    pub fn net_of(&self, pin: &PinRef) -> Option<&str> {
        self.component(&pin.ref_des)?.pin(&pin.pin)?.net()
    }

    /// Two-terminal components with one pin on `a` and the other on `b`.
    pub fn bridging<F>(&self, a: &str, b: &str, mut filter: F) -> Vec<&Component>
    where
        F: FnMut(&Component) -> bool,
    {
        let (Some(a), Some(b)) = (self.resolve_net(a), self.resolve_net(b)) else {
            return Vec::new();
        };
        self.components()
            .filter(|c| c.is_two_terminal())
            .filter(|c| {
                let nets: Vec<Option<&str>> = c.pins.iter().map(|p| p.net()).collect();
                matches!(nets.as_slice(), [Some(x), Some(y)] if (*x == a && *y == b) || (*x == b && *y == a))
            })
            .filter(|c| filter(c))
            .collect()
    }

    /// Nets reachable from `net` across one two-terminal component
    /// accepted by `filter`.
    pub fn nets_across<F>(&self, net: &str, mut filter: F) -> Vec<&str>
    where
        F: FnMut(&Component) -> bool,
    {
        let Some(net) = self.resolve_net(net) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = Vec::new();
        for comp in self.components_on_net(net) {
            if !comp.is_two_terminal() || !filter(comp) {
                continue;
            }
            for other in comp.pins.iter().filter_map(|p| p.net()) {
                if other != net && !out.contains(&other) {
                    out.push(other);
                }
            }
        }
        out
    }

    pub fn stats(&self) -> CircuitStats {
        let unconnected_pins = self
            .components()
            .flat_map(|c| c.pins.iter())
            .filter(|p| p.connection == PinConnection::Unassigned)
            .count();
        CircuitStats {
            component_count: self.component_count(),
            net_count: self.net_count(),
            connection_count: self.graph.edge_count(),
            unconnected_pins,
        }
    }

    /// Render back into the netlist code-block syntax.
    pub fn to_netlist(&self) -> String {
        let atom = |s: &str| SExp::Atom(s.to_string());
        let keyed = |k: &str, v: &str| SExp::List(vec![atom(k), atom(v)]);
        let node = |r: &PinRef| {
            SExp::List(vec![atom("node"), keyed("ref", &r.ref_des), keyed("pin", &r.pin)])
        };

        let mut out = String::from("(netlist\n");

        if !self.inputs.is_empty() || !self.outputs.is_empty() {
            let mut ports = vec![atom("ports")];
            for (kind, names) in [("input", &self.inputs), ("output", &self.outputs)] {
                if !names.is_empty() {
                    let mut list = vec![atom(kind)];
                    list.extend(names.iter().map(|n| atom(n)));
                    ports.push(SExp::List(list));
                }
            }
            out.push_str(&format!("  {}\n", SExp::List(ports)));
        }

        out.push_str("  (components\n");
        for comp in self.components() {
            let mut list = vec![atom("comp"), keyed("ref", &comp.ref_des), keyed("part", &comp.part)];
            if let Some(v) = &comp.value {
                list.push(keyed("value", v));
            }
            if let Some(fp) = &comp.footprint {
                list.push(keyed("footprint", fp));
            }
            if let Some(r) = comp.rating {
                list.push(keyed("rating", &r.to_string()));
            }
            out.push_str(&format!("    {}\n", SExp::List(list)));
        }
        out.push_str("  )\n  (nets\n");
        for net in self.nets() {
            let mut list = vec![atom("net"), keyed("name", &net.name)];
            list.extend(net.aliases.iter().map(|a| keyed("alias", a)));
            list.extend(net.members.iter().map(|m| node(m)));
            out.push_str(&format!("    {}\n", SExp::List(list)));
        }
        out.push_str("  )\n");

        let nc: Vec<SExp> = self
            .components()
            .flat_map(|c| {
                c.pins
                    .iter()
                    .filter(|p| p.connection == PinConnection::NoConnect)
                    .map(move |p| node(&PinRef::new(&c.ref_des, &p.number)))
            })
            .collect();
        if !nc.is_empty() {
            let mut list = vec![atom("no_connect")];
            list.extend(nc);
            out.push_str(&format!("  {}\n", SExp::List(list)));
        }
        out.push_str(")\n");
        out
    }
}

/// Statistics about a circuit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStats {
    pub component_count: usize,
    pub net_count: usize,
    pub connection_count: usize,
    pub unconnected_pins: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passive(ref_des: &str, part: &str) -> Component {
        Component::new(ref_des, part)
            .with_category(PartCategory::Passive)
            .with_pin(Pin::new("1", PinRole::Passive))
            .with_pin(Pin::new("2", PinRole::Passive))
    }

    fn create_divider() -> CircuitGraph {
        let mut graph = CircuitGraph::new();
        graph.add_component(passive("R1", "R").with_value("100k"));
        graph.add_component(passive("R2", "R").with_value("100k"));
        graph.add_component(passive("C1", "C").with_value("10nF"));
        graph.add_net(Net::new("VIN").with_member("R1", "1"));
        graph.add_net(
            Net::new("VSENSE")
                .with_alias("MID")
                .with_member("R1", "2")
                .with_member("R2", "1")
                .with_member("C1", "1"),
        );
        graph.add_net(Net::new("GND").with_member("R2", "2"));
        graph.inputs.push("VIN".into());
        graph.outputs.push("VSENSE".into());
        graph
    }

    #[test]
    fn test_pin_connections_follow_nets() {
        let graph = create_divider();
        let r2 = graph.component("R2").unwrap();
        assert_eq!(r2.pin("1").and_then(|p| p.net()), Some("VSENSE"));
        assert_eq!(graph.net_of(&PinRef::new("R1", "1")), Some("VIN"));
        assert_eq!(
            graph.component("C1").unwrap().pin("2").unwrap().connection,
            PinConnection::Unassigned
        );
    }

    #[test]
    fn test_alias_resolution() {
        let graph = create_divider();
        assert_eq!(graph.resolve_net("MID"), Some("VSENSE"));
        assert_eq!(graph.net("MID").map(|n| n.members.len()), Some(3));
    }

    #[test]
    fn test_components_on_net_in_declaration_order() {
        let graph = create_divider();
        let refs: Vec<_> = graph
            .components_on_net("VSENSE")
            .iter()
            .map(|c| c.ref_des.as_str())
            .collect();
        assert_eq!(refs, vec!["R1", "R2", "C1"]);
    }

    #[test]
    fn test_bridging_and_nets_across() {
        let graph = create_divider();
        let bridging = graph.bridging("VIN", "VSENSE", |c| c.part == "R");
        assert_eq!(bridging.len(), 1);
        assert_eq!(bridging[0].ref_des, "R1");
        assert_eq!(graph.nets_across("VSENSE", |c| c.part == "R"), vec!["VIN", "GND"]);
    }

    #[test]
    fn test_stats() {
        let stats = create_divider().stats();
        assert_eq!(stats.component_count, 3);
        assert_eq!(stats.net_count, 3);
        assert_eq!(stats.connection_count, 5);
        assert_eq!(stats.unconnected_pins, 1);
    }

    #[test]
    fn test_to_netlist_mentions_everything() {
        let text = create_divider().to_netlist();
        assert!(text.starts_with("(netlist"));
        assert!(text.contains("(ports (input VIN) (output VSENSE))"));
        assert!(text.contains("(comp (ref R1) (part R) (value 100k))"));
        assert!(text.contains("(net (name VSENSE) (alias MID) (node (ref R1) (pin 2))"));
    }
}
