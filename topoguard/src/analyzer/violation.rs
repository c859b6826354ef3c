use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Top-level failure taxonomy a violation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationCategory {
    ParseError,
    StructuralViolation,
    RuleViolation,
    ExternalCallError,
}

impl fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationCategory::ParseError => "ParseError",
            ViolationCategory::StructuralViolation => "StructuralViolation",
            ViolationCategory::RuleViolation => "RuleViolation",
            ViolationCategory::ExternalCallError => "ExternalCallError",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    Parse,
    PortMismatch,
    MissingComponent,
    ExtraComponent,
    NetMismatch,
    OverVoltage,
    InsufficientDecoupling,
    KelvinSource,
    UnconnectedPin,
    UnknownPart,
    ShortedTerminals,
    MissingBridge,
    IsolationBreach,
    ExternalCall,
}

impl ViolationKind {
    pub fn category(&self) -> ViolationCategory {
        match self {
            ViolationKind::Parse => ViolationCategory::ParseError,
            ViolationKind::PortMismatch
            | ViolationKind::MissingComponent
            | ViolationKind::ExtraComponent
            | ViolationKind::NetMismatch => ViolationCategory::StructuralViolation,
            ViolationKind::OverVoltage
            | ViolationKind::InsufficientDecoupling
            | ViolationKind::KelvinSource
            | ViolationKind::UnconnectedPin
            | ViolationKind::UnknownPart
            | ViolationKind::ShortedTerminals
            | ViolationKind::MissingBridge
            | ViolationKind::IsolationBreach => ViolationCategory::RuleViolation,
            ViolationKind::ExternalCall => ViolationCategory::ExternalCallError,
        }
    }

    /// Short tag used in weak feedback and stats summaries.
    pub fn tag(&self) -> &'static str {
        match self {
            ViolationKind::Parse => "ParseError",
            ViolationKind::PortMismatch => "PortMismatch",
            ViolationKind::MissingComponent => "MissingComponent",
            ViolationKind::ExtraComponent => "ExtraComponent",
            ViolationKind::NetMismatch => "NetMismatch",
            ViolationKind::OverVoltage => "OverVoltage",
            ViolationKind::InsufficientDecoupling => "InsufficientDecoupling",
            ViolationKind::KelvinSource => "KelvinSource",
            ViolationKind::UnconnectedPin => "UnconnectedPin",
            ViolationKind::UnknownPart => "UnknownPart",
            ViolationKind::ShortedTerminals => "ShortedTerminals",
            ViolationKind::MissingBridge => "MissingBridge",
            ViolationKind::IsolationBreach => "IsolationBreach",
            ViolationKind::ExternalCall => "ExternalCallError",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One finding, with the components and nets it implicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub nets: Vec<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl Violation {
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            components: Vec::new(),
            nets: Vec::new(),
            suggestion: None,
        }
    }

    pub fn with_component(mut self, ref_des: impl Into<String>) -> Self {
        let ref_des = ref_des.into();
        if !self.components.contains(&ref_des) {
            self.components.push(ref_des);
        }
        self
    }

    pub fn with_net(mut self, net: impl Into<String>) -> Self {
        let net = net.into();
        if !self.nets.contains(&net) {
            self.nets.push(net);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn category(&self) -> ViolationCategory {
        self.kind.category()
    }

    /// "component U1; nets VIN, GND" style location line.
    pub fn location(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.components.is_empty() {
            let label = if self.components.len() == 1 { "component" } else { "components" };
            parts.push(format!("{} {}", label, self.components.join(", ")));
        }
        if !self.nets.is_empty() {
            let label = if self.nets.len() == 1 { "net" } else { "nets" };
            parts.push(format!("{} {}", label, self.nets.join(", ")));
        }
        (!parts.is_empty()).then(|| parts.join("; "))
    }
}

/// Outcome of comparing a candidate against a reference sub-circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub pass: bool,
    pub violations: Vec<Violation>,
    /// Symmetry swap that produced the match, if not the identity.
    #[serde(default)]
    pub symmetry: Option<String>,
    /// Reference ref -> candidate ref, filled on a pass.
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
}

impl MatchResult {
    pub fn passed(mapping: BTreeMap<String, String>, symmetry: Option<String>) -> Self {
        Self {
            pass: true,
            violations: Vec::new(),
            symmetry,
            mapping,
        }
    }

    pub fn failed(violation: Violation) -> Self {
        Self {
            pass: false,
            violations: vec![violation],
            symmetry: None,
            mapping: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_categories() {
        assert_eq!(
            ViolationKind::NetMismatch.category(),
            ViolationCategory::StructuralViolation
        );
        assert_eq!(
            ViolationKind::InsufficientDecoupling.category(),
            ViolationCategory::RuleViolation
        );
        assert_eq!(ViolationKind::Parse.category(), ViolationCategory::ParseError);
    }

    #[test]
    fn test_location_line() {
        let v = Violation::new(ViolationKind::NetMismatch, "x")
            .with_component("C1")
            .with_net("GND")
            .with_net("VIN")
            .with_net("GND");
        assert_eq!(v.location().as_deref(), Some("component C1; nets GND, VIN"));
        assert_eq!(Violation::new(ViolationKind::Parse, "x").location(), None);
    }
}
