//! Routing suggestion types

use serde::{Deserialize, Serialize};

/// Where a suggestion came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    /// A consolidated pattern matched
    Pattern,
    /// Similar past tasks voted for a target
    SimilarTask,
    /// The declarative rules engine matched
    Rules,
    /// Fallback load balancing
    Default,
}

impl SuggestionSource {
    /// Canonical string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::SimilarTask => "similar_task",
            Self::Rules => "rules",
            Self::Default => "default",
        }
    }
}

/// A routing suggestion from the learning system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSuggestion {
    /// Suggested target instance
    pub target_instance: String,
    /// Suggestion confidence in [0, 1]
    pub confidence: f64,
    /// Where the suggestion came from
    pub source: SuggestionSource,
    /// Human-readable reasoning
    pub reasoning: String,
    /// Pattern behind the suggestion, when source is a pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,
    /// Similar tasks behind the suggestion, when source is similar-task
    #[serde(default)]
    pub similar_task_ids: Vec<String>,
}

impl RoutingSuggestion {
    /// Suggestion from a matched pattern
    #[must_use]
    pub fn from_pattern(
        target_instance: impl Into<String>,
        confidence: f64,
        pattern_id: impl Into<String>,
        pattern_name: &str,
    ) -> Self {
        Self {
            target_instance: target_instance.into(),
            confidence,
            source: SuggestionSource::Pattern,
            reasoning: format!("matched pattern: {pattern_name}"),
            pattern_id: Some(pattern_id.into()),
            similar_task_ids: Vec::new(),
        }
    }

    /// Suggestion from similar-task analysis
    #[must_use]
    pub fn from_similar_tasks(
        target_instance: impl Into<String>,
        confidence: f64,
        similar_task_ids: Vec<String>,
        success_rate: f64,
    ) -> Self {
        let count = similar_task_ids.len();
        Self {
            target_instance: target_instance.into(),
            confidence,
            source: SuggestionSource::SimilarTask,
            reasoning: format!(
                "based on {count} similar tasks ({:.0}% success rate)",
                success_rate * 100.0
            ),
            pattern_id: None,
            similar_task_ids,
        }
    }
}
