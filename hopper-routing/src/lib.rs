//! ABOUTME: Routing engine for Hopper - decides where a task should run
//! ABOUTME: Layered resolver: explicit project, learned patterns, similar tasks, rules, fallback
//!
//! The router is stateless over snapshots: it reads the instance tree,
//! pattern store, and similarity index without holding task locks, then
//! commits through the delegation engine, which re-validates under the
//! per-task lock.

pub mod router;
pub mod rules;

pub use router::{Router, RouterConfig, RoutingResult, RoutingStrategy};
pub use rules::{
    default_rules, load_rules_from_file, load_rules_from_str, save_rules_to_file,
    save_rules_to_string, CompositeOperator, Rule, RuleContext, RuleDecision, RuleKind, RuleMatch,
    RulesEngine,
};
