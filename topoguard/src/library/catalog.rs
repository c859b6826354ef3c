//! Part catalog and substitution classes.
//!
//! The catalog says which pins a part has and what role each pin plays.
//! The substitution table says which concrete parts may stand in for a
//! reference role. Both are plain data loaded from JSON.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::circuit::{Component, IsolationSide, PartCategory, Pin, PinRole};
use crate::library::LibraryError;

const EMBEDDED_CATALOG: &str = include_str!("../../library/catalog.json");

/// Class name reported for parts no table entry covers.
pub const UNKNOWN_CLASS: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinDefinition {
    pub number: String,
    #[serde(default)]
    pub name: Option<String>,
    pub role: PinRole,
    /// Barrier side, for isolating parts only.
    #[serde(default)]
    pub side: Option<IsolationSide>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: PartCategory,
    /// Default substitution class.
    pub class: String,
    #[serde(default)]
    pub max_voltage: Option<f64>,
    pub pins: Vec<PinDefinition>,
}

impl PartDefinition {
    /// Create a fresh, unconnected component of this part.
    pub fn instantiate(&self, ref_des: &str) -> Component {
        let mut component = Component::new(ref_des, &self.name).with_category(self.category);
        component.rating = self.max_voltage;
        for def in &self.pins {
            let mut pin = Pin::new(&def.number, def.role);
            pin.name = def.name.clone();
            pin.side = def.side;
            component.pins.push(pin);
        }
        component
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogFile {
    parts: Vec<PartDefinition>,
}

/// Known parts, looked up case-insensitively by name.
#[derive(Debug, Clone, Default)]
pub struct PartCatalog {
    parts: Vec<PartDefinition>,
    index: HashMap<String, usize>,
}

impl PartCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, LibraryError> {
        Self::from_json(EMBEDDED_CATALOG)
    }

    pub fn from_json(json: &str) -> Result<Self, LibraryError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        for part in file.parts {
            catalog.insert(part);
        }
        Ok(catalog)
    }

    /// Add or replace a part definition.
    pub fn insert(&mut self, part: PartDefinition) {
        let key = part.name.to_uppercase();
        match self.index.get(&key) {
            Some(&idx) => self.parts[idx] = part,
            None => {
                self.index.insert(key, self.parts.len());
                self.parts.push(part);
            }
        }
    }

    pub fn extend(&mut self, other: PartCatalog) {
        for part in other.parts {
            self.insert(part);
        }
    }

    pub fn get(&self, name: &str) -> Option<&PartDefinition> {
        self.index
            .get(&name.to_uppercase())
            .and_then(|&idx| self.parts.get(idx))
    }

    pub fn parts(&self) -> impl Iterator<Item = &PartDefinition> {
        self.parts.iter()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Default class -> parts table derived from each part's `class`.
    pub fn default_substitutions(&self) -> SubstitutionTable {
        let mut table = SubstitutionTable::default();
        for part in &self.parts {
            table.allow(&part.class, &part.name);
        }
        table
    }

    /// Category guess for parts the catalog does not know.
    pub fn infer_category(part: &str, ref_des: &str) -> PartCategory {
        match part.to_uppercase().as_str() {
            "R" | "C" | "L" | "D" => PartCategory::Passive,
            _ if ref_des.to_uppercase().starts_with('Q') => PartCategory::Mosfet,
            _ => PartCategory::Unknown,
        }
    }
}

/// Explicit substitution classes: each class lists the concrete part
/// types that satisfy it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubstitutionTable {
    classes: BTreeMap<String, BTreeSet<String>>,
}

impl SubstitutionTable {
    pub fn allow(&mut self, class: &str, part: &str) {
        self.classes
            .entry(class.to_string())
            .or_default()
            .insert(part.to_uppercase());
    }

    /// Replace the part list of every class named in `overrides`.
    pub fn overridden_by(&self, overrides: &SubstitutionTable) -> SubstitutionTable {
        let mut merged = self.clone();
        for (class, parts) in &overrides.classes {
            // a part belongs to one class only
            for other in merged.classes.values_mut() {
                other.retain(|p| !parts.contains(&p.to_uppercase()));
            }
            merged.classes.insert(
                class.clone(),
                parts.iter().map(|p| p.to_uppercase()).collect(),
            );
        }
        merged.classes.retain(|_, parts| !parts.is_empty());
        merged
    }

    /// Class a part type resolves to, if any.
    pub fn class_of(&self, part: &str) -> Option<&str> {
        let key = part.to_uppercase();
        self.classes
            .iter()
            .find(|(_, parts)| parts.contains(&key))
            .map(|(class, _)| class.as_str())
    }

    /// Class name used in signatures; unknown parts share one class.
    pub fn class_or_unknown(&self, part: &str) -> &str {
        self.class_of(part).unwrap_or(UNKNOWN_CLASS)
    }

    pub fn parts_in(&self, class: &str) -> impl Iterator<Item = &str> {
        self.classes
            .get(class)
            .into_iter()
            .flat_map(|parts| parts.iter().map(|p| p.as_str()))
    }

    pub fn classes(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.classes.iter().map(|(c, p)| (c.as_str(), p))
    }
}
