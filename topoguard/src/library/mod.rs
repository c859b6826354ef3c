//! Reference Library
//!
//! Immutable catalog of benchmark tasks. Each entry pairs a [`TaskSpec`]
//! (what the generator is asked to build) with a [`ReferenceSubCircuit`]
//! (what a correct answer looks like, plus the declared substitution and
//! symmetry data the equivalence engine is allowed to use).
//!
//! The library is built once and shared read-only across workers.

pub mod builtin;
pub mod catalog;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::analyzer::rules::RuleConfig;
use crate::circuit::CircuitGraph;
use crate::parser::{ExtractError, NetlistExtractor};

pub use catalog::{PartCatalog, PartDefinition, PinDefinition, SubstitutionTable, UNKNOWN_CLASS};

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("failed to read library file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse library JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown task {0}")]
    UnknownTask(String),
    #[error("task {task} is misconfigured: {reason}")]
    InvalidTask { task: String, reason: String },
    #[error("task {0} is defined twice")]
    DuplicateTask(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        f.write_str(s)
    }
}

/// Declared operating voltages of a task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltageSpec {
    pub input: f64,
    pub output: f64,
}

impl VoltageSpec {
    pub fn max(&self) -> f64 {
        self.input.max(self.output)
    }
}

/// A permutation of port nets under which the reference is interchangeable,
/// e.g. the high-side and low-side arms of a half-bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymmetrySwap {
    pub name: String,
    #[serde(default)]
    pub nets: Vec<(String, String)>,
    /// Reference components that trade places under the swap.
    #[serde(default)]
    pub components: Vec<(String, String)>,
}

impl SymmetrySwap {
    /// Image of a net name under the swap.
    pub fn apply<'a>(&'a self, net: &'a str) -> &'a str {
        for (a, b) in &self.nets {
            if a == net {
                return b;
            }
            if b == net {
                return a;
            }
        }
        net
    }
}

/// What the generator is asked to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub number: u32,
    pub difficulty: Difficulty,
    pub description: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub voltage: Option<VoltageSpec>,
    #[serde(default)]
    pub rules: RuleConfig,
}

/// Canonical answer for a task.
#[derive(Debug, Clone)]
pub struct ReferenceSubCircuit {
    pub graph: CircuitGraph,
    pub symmetry: Vec<SymmetrySwap>,
    pub substitutions: SubstitutionTable,
}

#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub task: TaskSpec,
    pub reference: ReferenceSubCircuit,
}

/// On-disk shape of one task file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(flatten)]
    pub task: TaskSpec,
    /// Reference netlist in code-block syntax.
    pub reference: String,
    #[serde(default)]
    pub substitutions: SubstitutionTable,
    #[serde(default)]
    pub symmetry: Vec<SymmetrySwap>,
}

/// A task definition that failed to load. Kept so selections by id, number
/// or range still reach it and its trials end in a configuration error.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidTask {
    /// Task id, or the source file when the id is unreadable
    pub id: String,
    pub number: Option<u32>,
    pub reason: String,
}

impl InvalidTask {
    /// Read `id` and `number` from a definition that does not deserialize.
    fn from_malformed(source: &str, json: &str, reason: String) -> Self {
        let header: serde_json::Value = serde_json::from_str(json).unwrap_or(serde_json::Value::Null);
        let id = header
            .get("id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| source.to_string());
        let number = header
            .get("number")
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| u32::try_from(n).ok());
        Self { id, number, reason }
    }
}

/// Immutable task catalog keyed by task id.
#[derive(Debug, Clone, Default)]
pub struct ReferenceLibrary {
    catalog: PartCatalog,
    entries: BTreeMap<String, ReferenceEntry>,
    /// Tasks whose definition failed to load, keyed by id.
    invalid: BTreeMap<String, InvalidTask>,
}

impl ReferenceLibrary {
    /// The builtin benchmark tasks and part catalog.
    pub fn builtin() -> Result<Self, LibraryError> {
        let catalog = PartCatalog::builtin()?;
        let mut library = Self::with_catalog(catalog);
        for (name, json) in builtin::embedded_tasks() {
            library.add_json(name, json)?;
        }
        Ok(library)
    }

    pub fn with_catalog(catalog: PartCatalog) -> Self {
        Self {
            catalog,
            entries: BTreeMap::new(),
            invalid: BTreeMap::new(),
        }
    }

    /// Builtin library extended (and overridden) by a directory.
    pub fn builtin_with_dir(dir: &Path) -> Result<Self, LibraryError> {
        let mut library = Self::builtin()?;
        library.load_dir(dir)?;
        Ok(library)
    }

    /// Load `catalog.json` and every task `*.json` under `dir` (and `dir/tasks`).
    ///
    /// Tasks that fail to compile are kept as invalid entries so requesting
    /// them yields a configuration error instead of an unknown-task error.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, LibraryError> {
        let catalog_path = dir.join("catalog.json");
        if catalog_path.is_file() {
            let extra = PartCatalog::from_json(&std::fs::read_to_string(&catalog_path)?)?;
            self.catalog.extend(extra);
        }

        let mut loaded = 0;
        for path in builtin::task_files(dir)? {
            let json = std::fs::read_to_string(&path)?;
            let name = path.display().to_string();
            // an external file replaces a builtin task of the same id
            self.add_json_replacing(&name, &json)?;
            loaded += 1;
        }
        tracing::info!("Loaded {} task file(s) from {}", loaded, dir.display());
        Ok(loaded)
    }

    fn add_json(&mut self, source: &str, json: &str) -> Result<(), LibraryError> {
        self.insert_json(source, json, false)
    }

    fn add_json_replacing(&mut self, source: &str, json: &str) -> Result<(), LibraryError> {
        self.insert_json(source, json, true)
    }

    fn insert_json(&mut self, source: &str, json: &str, replace: bool) -> Result<(), LibraryError> {
        let definition: TaskDefinition = match serde_json::from_str(json) {
            Ok(d) => d,
            Err(e) => {
                let invalid = InvalidTask::from_malformed(source, json, e.to_string());
                tracing::warn!("Task {} in {} is malformed: {}", invalid.id, source, e);
                if replace {
                    self.entries.remove(&invalid.id);
                }
                self.invalid.insert(invalid.id.clone(), invalid);
                return Ok(());
            }
        };
        let id = definition.task.id.clone();
        let number = definition.task.number;
        if !replace && (self.entries.contains_key(&id) || self.invalid.contains_key(&id)) {
            return Err(LibraryError::DuplicateTask(id));
        }

        match self.compile(definition) {
            Ok(entry) => {
                self.invalid.remove(&id);
                self.entries.insert(id, entry);
            }
            Err(reason) => {
                tracing::warn!("Task {} is misconfigured: {}", id, reason);
                self.entries.remove(&id);
                self.invalid.insert(id.clone(), InvalidTask { id, number: Some(number), reason });
            }
        }
        Ok(())
    }

    /// Turn a task definition into a checked entry.
    pub fn compile(&self, definition: TaskDefinition) -> Result<ReferenceEntry, String> {
        let TaskDefinition {
            task,
            reference,
            substitutions,
            symmetry,
        } = definition;

        let extraction = NetlistExtractor::new(&self.catalog)
            .parse_netlist(&reference)
            .map_err(|e: ExtractError| format!("reference netlist: {}", e))?;
        let mut graph = extraction.graph;
        graph.inputs = task.inputs.clone();
        graph.outputs = task.outputs.clone();

        if task.inputs.is_empty() && task.outputs.is_empty() {
            return Err("declares no input or output ports".into());
        }
        for port in graph.ports() {
            if graph.resolve_net(port).is_none() {
                return Err(format!("port {} is not a net of the reference", port));
            }
        }

        let substitutions = self.catalog.default_substitutions().overridden_by(&substitutions);
        for component in graph.components() {
            if substitutions.class_of(&component.part).is_none() {
                return Err(format!(
                    "reference part {} ({}) has no substitution class",
                    component.part, component.ref_des
                ));
            }
        }

        for swap in &symmetry {
            for (a, b) in &swap.nets {
                for net in [a, b] {
                    if graph.resolve_net(net).is_none() {
                        return Err(format!("symmetry {} names unknown net {}", swap.name, net));
                    }
                }
            }
            for (x, y) in &swap.components {
                for r in [x, y] {
                    if graph.component(r).is_none() {
                        return Err(format!("symmetry {} names unknown component {}", swap.name, r));
                    }
                }
            }
        }

        Ok(ReferenceEntry {
            task,
            reference: ReferenceSubCircuit {
                graph,
                symmetry,
                substitutions,
            },
        })
    }

    pub fn catalog(&self) -> &PartCatalog {
        &self.catalog
    }

    /// Look up a task by id (case-insensitive) or by number.
    pub fn get(&self, key: &str) -> Result<&ReferenceEntry, LibraryError> {
        let key = key.trim();
        let number = key.parse::<u32>().ok();
        if let Some(number) = number {
            if let Some(entry) = self.entries.values().find(|e| e.task.number == number) {
                return Ok(entry);
            }
        }
        if let Some(invalid) = self
            .invalid
            .values()
            .find(|t| t.id.eq_ignore_ascii_case(key) || (number.is_some() && t.number == number))
        {
            return Err(LibraryError::InvalidTask {
                task: invalid.id.clone(),
                reason: invalid.reason.clone(),
            });
        }
        self.entries
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(key))
            .map(|(_, e)| e)
            .ok_or_else(|| LibraryError::UnknownTask(key.to_string()))
    }

    /// Entries ordered by task number.
    pub fn entries(&self) -> Vec<&ReferenceEntry> {
        let mut entries: Vec<&ReferenceEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.task.number);
        entries
    }

    /// Ids of tasks that failed to load, with the reason.
    pub fn invalid_tasks(&self) -> impl Iterator<Item = (&str, &str)> {
        self.invalid.values().map(|t| (t.id.as_str(), t.reason.as_str()))
    }

    /// Every task id with its number, misconfigured tasks included, ordered
    /// by number. Tasks whose number could not be read sort last.
    pub fn task_ids(&self) -> Vec<(Option<u32>, String)> {
        let mut ids: Vec<(Option<u32>, String)> = self
            .entries
            .values()
            .map(|e| (Some(e.task.number), e.task.id.clone()))
            .chain(self.invalid.values().map(|t| (t.number, t.id.clone())))
            .collect();
        ids.sort_by_key(|(number, id)| (number.is_none(), *number, id.clone()));
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
