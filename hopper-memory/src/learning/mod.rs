//! Learning engine: the facade binding all memory tiers together

mod engine;
mod suggestion;

pub use engine::{LearningEngine, LearningReport};
pub use suggestion::{RoutingSuggestion, SuggestionSource};
