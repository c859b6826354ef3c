//! Circuit data model: components, pins and nets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared electrical role of a pin.
///
/// Roles come from the part catalog and drive both the equivalence
/// signature and the Kelvin/short checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinRole {
    Power,
    Ground,
    Gate,
    Drain,
    Source,
    KelvinSource,
    DriverOut,
    DriverReturn,
    Input,
    Output,
    Passive,
    Anode,
    Cathode,
    Signal,
    Nc,
}

impl PinRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinRole::Power => "power",
            PinRole::Ground => "ground",
            PinRole::Gate => "gate",
            PinRole::Drain => "drain",
            PinRole::Source => "source",
            PinRole::KelvinSource => "kelvin_source",
            PinRole::DriverOut => "driver_out",
            PinRole::DriverReturn => "driver_return",
            PinRole::Input => "input",
            PinRole::Output => "output",
            PinRole::Passive => "passive",
            PinRole::Anode => "anode",
            PinRole::Cathode => "cathode",
            PinRole::Signal => "signal",
            PinRole::Nc => "nc",
        }
    }
}

impl fmt::Display for PinRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse part category, used for inference and rule scoping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartCategory {
    Passive,
    Mosfet,
    Driver,
    Regulator,
    IsolatedSupply,
    Amplifier,
    #[default]
    Unknown,
}

/// Side of an isolation barrier a pin sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationSide {
    Primary,
    Secondary,
}

/// Where a pin is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinConnection {
    Net(String),
    /// Explicitly tied to the NC sentinel.
    NoConnect,
    /// Declared by the part but absent from every net.
    Unassigned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub number: String,
    pub name: Option<String>,
    pub role: PinRole,
    pub connection: PinConnection,
    #[serde(default)]
    pub side: Option<IsolationSide>,
}

impl Pin {
    pub fn new(number: impl Into<String>, role: PinRole) -> Self {
        Self {
            number: number.into(),
            name: None,
            role,
            connection: PinConnection::Unassigned,
            side: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn on_side(mut self, side: IsolationSide) -> Self {
        self.side = Some(side);
        self
    }

    pub fn net(&self) -> Option<&str> {
        match &self.connection {
            PinConnection::Net(name) => Some(name),
            _ => None,
        }
    }

    /// True when `label` names this pin by number or by pin name.
    pub fn answers_to(&self, label: &str) -> bool {
        self.number == label
            || self
                .name
                .as_deref()
                .map(|n| n.eq_ignore_ascii_case(label))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub ref_des: String,
    pub part: String,
    pub value: Option<String>,
    pub footprint: Option<String>,
    /// Maximum rated voltage, from the netlist or the catalog.
    pub rating: Option<f64>,
    pub category: PartCategory,
    pub pins: Vec<Pin>,
}

impl Component {
    pub fn new(ref_des: impl Into<String>, part: impl Into<String>) -> Self {
        Self {
            ref_des: ref_des.into(),
            part: part.into(),
            value: None,
            footprint: None,
            rating: None,
            category: PartCategory::Unknown,
            pins: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_category(mut self, category: PartCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_pin(mut self, pin: Pin) -> Self {
        self.pins.push(pin);
        self
    }

    pub fn pin(&self, label: &str) -> Option<&Pin> {
        self.pins.iter().find(|p| p.number == label)
            .or_else(|| self.pins.iter().find(|p| p.answers_to(label)))
    }

    pub fn pin_mut(&mut self, label: &str) -> Option<&mut Pin> {
        let idx = self
            .pins
            .iter()
            .position(|p| p.number == label)
            .or_else(|| self.pins.iter().position(|p| p.answers_to(label)))?;
        self.pins.get_mut(idx)
    }

    pub fn pins_with_role(&self, role: PinRole) -> impl Iterator<Item = &Pin> {
        self.pins.iter().filter(move |p| p.role == role)
    }

    /// Net of the first pin with `role`.
    pub fn net_for_role(&self, role: PinRole) -> Option<&str> {
        self.pins_with_role(role).find_map(|p| p.net())
    }

    /// Distinct nets this component touches, in pin order.
    pub fn connected_nets(&self) -> Vec<&str> {
        let mut nets: Vec<&str> = Vec::new();
        for net in self.pins.iter().filter_map(|p| p.net()) {
            if !nets.contains(&net) {
                nets.push(net);
            }
        }
        nets
    }

    /// Pins on both sides of an isolation barrier.
    pub fn is_isolator(&self) -> bool {
        let has = |side| self.pins.iter().any(|p| p.side == Some(side));
        has(IsolationSide::Primary) && has(IsolationSide::Secondary)
    }

    /// Distinct nets on one side of the barrier, in pin order.
    pub fn nets_on_side(&self, side: IsolationSide) -> Vec<&str> {
        let mut nets: Vec<&str> = Vec::new();
        for net in self.pins.iter().filter(|p| p.side == Some(side)).filter_map(|p| p.net()) {
            if !nets.contains(&net) {
                nets.push(net);
            }
        }
        nets
    }

    pub fn is_mosfet(&self) -> bool {
        self.category == PartCategory::Mosfet
    }

    /// Two-terminal part with exactly two connected pins.
    pub fn is_two_terminal(&self) -> bool {
        self.pins.len() == 2
    }
}

/// A (component, pin) reference as it appears in a net.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PinRef {
    pub ref_des: String,
    pub pin: String,
}

impl PinRef {
    pub fn new(ref_des: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            ref_des: ref_des.into(),
            pin: pin.into(),
        }
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pin {}", self.ref_des, self.pin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    pub name: String,
    /// Additional names for the same node (e.g. an output tapped on a rail).
    pub aliases: Vec<String>,
    pub members: Vec<PinRef>,
}

impl Net {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_member(mut self, ref_des: impl Into<String>, pin: impl Into<String>) -> Self {
        self.members.push(PinRef::new(ref_des, pin));
        self
    }

    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(|a| a.as_str()))
    }
}
