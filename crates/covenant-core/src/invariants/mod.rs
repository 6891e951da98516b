//! Invariant rules and the engine that evaluates them.
//!
//! Rule kinds:
//! - [`PrecedenceRule`]: type A needs an earlier type B for the same task
//! - [`UniquenessRule`]: exact duplicates
//! - [`OrphanRule`]: events without a task
//! - [`SequenceRule`]: per-task timestamps never go backwards
//! - [`WorkflowOrderRule`]: multi-step workflows in relative order
//! - [`ForbiddenTypeRule`]: event types that must never appear
//! - [`ScreeningRule`]: pattern screening over payload text

pub mod engine;
pub mod forbidden;
pub mod orphan;
pub mod precedence;
pub mod rule;
pub mod screening;
pub mod sequence;
pub mod table;
pub mod uniqueness;
pub mod workflow;

pub use engine::{InvariantEngine, InvariantEngineBuilder};
pub use forbidden::ForbiddenTypeRule;
pub use orphan::OrphanRule;
pub use precedence::PrecedenceRule;
pub use rule::{InvariantRule, RuleMeta};
pub use screening::ScreeningRule;
pub use sequence::SequenceRule;
pub use table::{standard_rules, standard_screen_patterns, RuleKind, RuleSpec, RuleTable, ScreenPattern};
pub use uniqueness::UniquenessRule;
pub use workflow::WorkflowOrderRule;
