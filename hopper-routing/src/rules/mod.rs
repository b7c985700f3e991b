//! ABOUTME: Declarative routing rules
//! ABOUTME: Keyword, tag, priority, and composite rules with a YAML config format

mod config;
mod engine;
mod rule;

pub use config::{
    default_rules, load_rules_from_file, load_rules_from_str, save_rules_to_file,
    save_rules_to_string,
};
pub use engine::{RuleDecision, RulesEngine};
pub use rule::{CompositeOperator, Rule, RuleContext, RuleKind, RuleMatch};
