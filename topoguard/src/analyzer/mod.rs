pub mod equivalence;
pub mod rules;
pub mod violation;

pub use equivalence::{EquivalenceEngine, DEFAULT_NODE_BUDGET};
pub use rules::{
    BridgeRequirement, DecouplingRequirement, Rule, RuleChecker, RuleConfig, RuleContext,
};
pub use violation::{MatchResult, Violation, ViolationCategory, ViolationKind};
