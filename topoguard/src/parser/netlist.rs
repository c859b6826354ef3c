//! Netlist Extractor
//!
//! Pulls the single structured code block out of free-form generator text
//! and turns it into a [`CircuitGraph`]. Pins are resolved against the part
//! catalog, so a node naming a pin the part does not have is rejected
//! instead of silently creating a new pin.
//!
//! ```text
//! (netlist
//!   (ports (input VIN) (output VSENSE))
//!   (components
//!     (comp (ref R1) (part R) (value 100k)))
//!   (nets
//!     (net (name VIN) (node (ref R1) (pin 1))))
//!   (no_connect (node (ref U1) (pin 5))))
//! ```

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::circuit::{CircuitGraph, Component, Net, PartCategory, Pin, PinConnection, PinRef, PinRole};
use crate::library::PartCatalog;
use crate::parser::sexp::{SExp, SExpError, SExpParser};

/// Fence tags recognised as netlist blocks, checked before the generic fallback.
const NETLIST_FENCE_TAGS: [&str; 4] = ["netlist", "sexp", "lisp", "scheme"];

/// Malformed generator output. Every variant costs one retry attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("no code block found in generator output")]
    MissingCodeBlock,
    #[error("syntax error: {0}")]
    Syntax(#[from] SExpError),
    #[error("expected a (netlist ...) block, found {0}")]
    NotANetlist(String),
    #[error("{context}: missing ({field} ...)")]
    MissingField { context: String, field: String },
    #[error("duplicate component reference {0}")]
    DuplicateComponent(String),
    #[error("duplicate net name {0}")]
    DuplicateNet(String),
    #[error("net {net} references undeclared component {ref_des}")]
    DanglingComponent { net: String, ref_des: String },
    #[error("net {net} references pin {pin} which {ref_des} ({part}) does not have")]
    DanglingPin {
        net: String,
        ref_des: String,
        part: String,
        pin: String,
    },
    #[error("{pin} is placed in both {first} and {second}")]
    PinReused {
        pin: PinRef,
        first: String,
        second: String,
    },
    #[error("{ref_des}: cannot read rating {value:?}")]
    InvalidRating { ref_des: String, value: String },
}

/// Result of a successful extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub graph: CircuitGraph,
    /// Non-fatal findings, e.g. pins omitted without an NC tie.
    pub warnings: Vec<String>,
}

/// Locate the netlist code block in generator text.
///
/// Prefers a block fenced with a netlist-ish language tag, then the first
/// fenced block of any kind. Text that is itself a bare S-expression is
/// accepted as-is.
pub fn extract_code_block(text: &str) -> Option<&str> {
    let blocks = fenced_blocks(text);
    blocks
        .iter()
        .find(|(lang, _)| NETLIST_FENCE_TAGS.contains(&lang.to_lowercase().as_str()))
        .or_else(|| blocks.first())
        .map(|(_, body)| *body)
        .or_else(|| {
            let trimmed = text.trim();
            trimmed.starts_with('(').then_some(trimmed)
        })
}

fn fenced_blocks(text: &str) -> Vec<(&str, &str)> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        let line_end = after_fence.find('\n').unwrap_or(after_fence.len());
        let lang = after_fence[..line_end].trim();
        let body_start = (line_end + 1).min(after_fence.len());
        let body_and_rest = &after_fence[body_start..];

        match body_and_rest.find("```") {
            Some(close) => {
                blocks.push((lang, &body_and_rest[..close]));
                rest = &body_and_rest[close + 3..];
            }
            None => {
                // truncated output: take what is there
                blocks.push((lang, body_and_rest));
                break;
            }
        }
    }

    blocks
}

/// Parse "650", "650V", "1.2kV" into volts. Negative and non-finite
/// values are rejected.
pub fn parse_voltage(raw: &str) -> Option<f64> {
    let s = raw.trim().trim_end_matches(|c: char| c == 'V' || c == 'v');
    let (number, scale) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1_000.0),
        Some('m') => (&s[..s.len() - 1], 0.001),
        _ => (s, 1.0),
    };
    let volts = number.trim().parse::<f64>().ok()? * scale;
    if !volts.is_finite() || volts < 0.0 {
        tracing::warn!("Rejecting voltage {:?}: not a finite, non-negative value", raw);
        return None;
    }
    Some(volts)
}

/// Turns generator text into a circuit graph.
pub struct NetlistExtractor<'a> {
    catalog: &'a PartCatalog,
}

impl<'a> NetlistExtractor<'a> {
    pub fn new(catalog: &'a PartCatalog) -> Self {
        Self { catalog }
    }

    /// Extract the code block from `text` and parse it.
    pub fn extract(&self, text: &str) -> Result<Extraction, ExtractError> {
        let body = extract_code_block(text).ok_or(ExtractError::MissingCodeBlock)?;
        self.parse_netlist(body)
    }

    /// Parse a netlist S-expression (no fences).
    pub fn parse_netlist(&self, body: &str) -> Result<Extraction, ExtractError> {
        let root = SExpParser::new(body).parse()?;
        if root.head() != Some("netlist") {
            return Err(ExtractError::NotANetlist(
                root.head().unwrap_or("a bare atom").to_string(),
            ));
        }

        let mut warnings = Vec::new();
        let mut components = self.read_components(&root)?;
        let index: HashMap<String, usize> = components
            .iter()
            .enumerate()
            .map(|(i, c)| (c.ref_des.clone(), i))
            .collect();
        let known: HashSet<String> = components
            .iter()
            .filter(|c| self.catalog.get(&c.part).is_some())
            .map(|c| c.ref_des.clone())
            .collect();

        let mut placed: HashMap<PinRef, String> = HashMap::new();
        let mut nets = Vec::new();
        let mut net_names: HashSet<String> = HashSet::new();

        for net_sexp in section(&root, "nets", "net") {
            let name = net_sexp.value_of("name").ok_or_else(|| ExtractError::MissingField {
                context: "net".into(),
                field: "name".into(),
            })?;
            let mut net = Net::new(name);
            net.aliases = net_sexp.values_of("alias").into_iter().map(String::from).collect();
            for n in net.names() {
                if !net_names.insert(n.to_string()) {
                    return Err(ExtractError::DuplicateNet(n.to_string()));
                }
            }

            for node in net_sexp.get_all("node") {
                let pin = self.resolve_node(node, name, &mut components, &index, &known)?;
                if let Some(first) = placed.insert(pin.clone(), name.to_string()) {
                    if first != name {
                        return Err(ExtractError::PinReused {
                            pin,
                            first,
                            second: name.to_string(),
                        });
                    }
                }
                if !net.members.contains(&pin) {
                    net.members.push(pin);
                }
            }

            if net.members.is_empty() {
                warnings.push(format!("net {} has no members", name));
            }
            nets.push(net);
        }

        let mut no_connects = Vec::new();
        for node in section(&root, "no_connect", "node") {
            let pin = self.resolve_node(node, "no_connect", &mut components, &index, &known)?;
            match placed.insert(pin.clone(), "no_connect".to_string()) {
                Some(first) if first != "no_connect" => {
                    return Err(ExtractError::PinReused {
                        pin,
                        first,
                        second: "no_connect".into(),
                    });
                }
                Some(_) => {}
                None => no_connects.push(pin),
            }
        }

        let mut graph = CircuitGraph::new();
        for component in components {
            graph.add_component(component);
        }
        for net in nets {
            graph.add_net(net);
        }
        for pin in &no_connects {
            graph.mark_no_connect(pin);
        }

        if let Some(ports) = root.get("ports") {
            graph.inputs = ports.values_of("input").into_iter().map(String::from).collect();
            graph.outputs = ports.values_of("output").into_iter().map(String::from).collect();
            for port in graph.ports() {
                if graph.resolve_net(port).is_none() {
                    warnings.push(format!("port {} does not name any net", port));
                }
            }
        }

        for component in graph.components() {
            for pin in &component.pins {
                if pin.connection == PinConnection::Unassigned {
                    warnings.push(format!(
                        "{} pin {}{} is not connected and not tied to NC",
                        component.ref_des,
                        pin.number,
                        pin.name
                            .as_deref()
                            .map(|n| format!(" ({})", n))
                            .unwrap_or_default()
                    ));
                }
            }
        }

        for warning in &warnings {
            tracing::debug!("netlist warning: {}", warning);
        }

        Ok(Extraction { graph, warnings })
    }

    fn read_components(&self, root: &SExp) -> Result<Vec<Component>, ExtractError> {
        let mut components: Vec<Component> = Vec::new();

        for comp in section(root, "components", "comp") {
            let ref_des = comp.value_of("ref").ok_or_else(|| ExtractError::MissingField {
                context: "comp".into(),
                field: "ref".into(),
            })?;
            let part = comp.value_of("part").ok_or_else(|| ExtractError::MissingField {
                context: ref_des.to_string(),
                field: "part".into(),
            })?;
            if components.iter().any(|c| c.ref_des == ref_des) {
                return Err(ExtractError::DuplicateComponent(ref_des.to_string()));
            }

            let mut component = match self.catalog.get(part) {
                Some(def) => def.instantiate(ref_des),
                None => Component::new(ref_des, part)
                    .with_category(PartCatalog::infer_category(part, ref_des)),
            };
            component.value = comp.value_of("value").map(String::from);
            component.footprint = comp.value_of("footprint").map(String::from);
            if let Some(raw) = comp.value_of("rating") {
                component.rating = Some(parse_voltage(raw).ok_or_else(|| {
                    ExtractError::InvalidRating {
                        ref_des: ref_des.to_string(),
                        value: raw.to_string(),
                    }
                })?);
            }
            components.push(component);
        }

        Ok(components)
    }

    /// Resolve `(node (ref R1) (pin 2))` or the short `(node R1 2)` form
    /// to a canonical pin reference.
    fn resolve_node(
        &self,
        node: &SExp,
        context: &str,
        components: &mut [Component],
        index: &HashMap<String, usize>,
        known: &HashSet<String>,
    ) -> Result<PinRef, ExtractError> {
        let (ref_des, label) = match (node.value_of("ref"), node.value_of("pin")) {
            (Some(r), Some(p)) => (r, p),
            _ => {
                let atoms: Vec<&str> = node.tail().iter().filter_map(|a| a.as_atom()).collect();
                match atoms.as_slice() {
                    [r, p] => (*r, *p),
                    _ => {
                        return Err(ExtractError::MissingField {
                            context: format!("node in {}", context),
                            field: "ref/pin".into(),
                        })
                    }
                }
            }
        };

        let Some(&idx) = index.get(ref_des) else {
            return Err(ExtractError::DanglingComponent {
                net: context.to_string(),
                ref_des: ref_des.to_string(),
            });
        };
        let component = &mut components[idx];

        if let Some(pin) = component.pin(label) {
            return Ok(PinRef::new(ref_des, &pin.number));
        }
        if known.contains(ref_des) {
            return Err(ExtractError::DanglingPin {
                net: context.to_string(),
                ref_des: ref_des.to_string(),
                part: component.part.clone(),
                pin: label.to_string(),
            });
        }

        // parts outside the catalog grow pins as they are referenced
        let role = if component.category == PartCategory::Passive {
            PinRole::Passive
        } else {
            PinRole::Signal
        };
        component.pins.push(Pin::new(label, role));
        Ok(PinRef::new(ref_des, label))
    }
}

/// Children with head `item` inside the `(section ...)` list.
fn section<'s>(root: &'s SExp, section: &str, item: &str) -> Vec<&'s SExp> {
    root.get(section)
        .map(|s| s.get_all(item))
        .unwrap_or_default()
}
