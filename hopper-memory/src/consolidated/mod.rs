//! Consolidated memory: learned routing patterns
//!
//! Patterns are generalized rules mined from successful routing episodes.
//! Each maps matching criteria (tags, keywords, priority) to a target
//! instance with a confidence that adapts to observed outcomes.

mod extractor;
mod pattern;
mod store;

pub use extractor::{ConsolidationReport, PatternCandidate, PatternExtractor};
pub use pattern::{PatternType, RoutingPattern, TagCriteria, TextCriteria};
pub use store::{ConsolidatedStore, PatternStatistics};
