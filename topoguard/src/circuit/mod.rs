//! In-memory circuit representation shared by the extractor, the
//! equivalence engine and the rule checker.

pub mod graph;
pub mod schema;

pub use graph::{CircuitGraph, CircuitNode, CircuitStats, PinEdge};
pub use schema::{Component, IsolationSide, Net, PartCategory, Pin, PinConnection, PinRef, PinRole};
