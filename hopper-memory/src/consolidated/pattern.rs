//! Routing pattern model and matching

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hopper_core::{short_id, TaskPriority};

/// Tag matching criteria
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagCriteria {
    /// Tags that must all be present on the task
    #[serde(default)]
    pub required: Vec<String>,
    /// Tags that raise the score when present
    #[serde(default)]
    pub optional: Vec<String>,
}

impl TagCriteria {
    /// Whether both lists are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.optional.is_empty()
    }
}

/// Text matching criteria
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextCriteria {
    /// Keywords checked against the task title
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// What signals a pattern carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Tag criteria only
    Tag,
    /// Text criteria only
    Text,
    /// Priority criterion only
    Priority,
    /// More than one kind of criterion
    Combined,
}

/// A learned routing rule: criteria → target instance
///
/// Confidence adapts to outcomes: below five usages it keeps its mined
/// value; afterwards each outcome folds the observed success rate in with
/// `0.3·confidence + 0.7·success_rate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPattern {
    /// Opaque id
    pub id: String,
    /// Name; the extractor derives it from the criteria, which makes
    /// repeated consolidation runs idempotent
    pub name: String,
    /// Human description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Signal kinds carried
    pub pattern_type: PatternType,
    /// Tag criteria
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_criteria: Option<TagCriteria>,
    /// Text criteria
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_criteria: Option<TextCriteria>,
    /// Single priority constraint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_criteria: Option<TaskPriority>,
    /// Where matching tasks should go
    pub target_instance: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Times the pattern drove a decision
    pub usage_count: u64,
    /// Successful outcomes observed
    pub success_count: u64,
    /// Failed outcomes observed
    pub failure_count: u64,
    /// Episodes that contributed to this pattern
    #[serde(default)]
    pub source_episodes: Vec<String>,
    /// Whether the pattern participates in matching
    pub is_active: bool,
    /// Last time the pattern drove a decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Last time consolidation refined the criteria
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refined_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl RoutingPattern {
    /// Create an active pattern
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        target_instance: impl Into<String>,
        pattern_type: PatternType,
        confidence: f64,
    ) -> Self {
        Self {
            id: short_id("pat"),
            name: name.into(),
            description: None,
            pattern_type,
            tag_criteria: None,
            text_criteria: None,
            priority_criteria: None,
            target_instance: target_instance.into(),
            confidence,
            usage_count: 0,
            success_count: 0,
            failure_count: 0,
            source_episodes: Vec::new(),
            is_active: true,
            last_used_at: None,
            last_refined_at: None,
            created_at: Utc::now(),
        }
    }

    /// Observed success rate, zero before any outcome
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.success_count as f64 / total as f64
        }
    }

    /// Record one usage outcome and update confidence
    pub fn record_usage(&mut self, success: bool) {
        self.usage_count += 1;
        self.last_used_at = Some(Utc::now());
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }

        // Not enough signal below five usages; keep the mined confidence.
        if self.usage_count >= 5 {
            self.confidence = 0.3 * self.confidence + 0.7 * self.success_rate();
        }
    }

    /// Match this pattern against a task's routing-relevant fields.
    ///
    /// Tag criteria always apply when the pattern carries any: a task whose
    /// tag set (empty included) misses a required tag is disqualified
    /// outright. The priority and text criteria apply only when the query
    /// side provides the matching field. With no applicable criteria at all
    /// the pattern matches unconditionally at its own confidence (internal
    /// catchall). Otherwise the mean criterion score must reach 0.5, and
    /// the returned score is that mean scaled by the pattern's confidence.
    #[must_use]
    pub fn matches(
        &self,
        tags: &[String],
        priority: Option<TaskPriority>,
        title: Option<&str>,
    ) -> (bool, f64) {
        let mut score = 0.0;
        let mut criteria_count = 0u32;

        if let Some(criteria) = &self.tag_criteria {
            if !criteria.is_empty() {
                criteria_count += 1;

                let missing_required = criteria
                    .required
                    .iter()
                    .any(|req| !tags.iter().any(|t| t == req));
                if !criteria.required.is_empty() && missing_required {
                    return (false, 0.0);
                }

                if criteria.optional.is_empty() {
                    score += 1.0;
                } else {
                    let matched = criteria
                        .optional
                        .iter()
                        .filter(|opt| tags.iter().any(|t| t == *opt))
                        .count();
                    #[allow(clippy::cast_precision_loss)]
                    let bonus = matched as f64 / criteria.optional.len() as f64;
                    score += 1.0 + 0.2 * bonus;
                }
            }
        }

        if let (Some(wanted), Some(priority)) = (self.priority_criteria, priority) {
            criteria_count += 1;
            if wanted == priority {
                score += 1.0;
            }
        }

        if let (Some(criteria), Some(title)) = (&self.text_criteria, title) {
            if !criteria.keywords.is_empty() {
                criteria_count += 1;
                let title_lower = title.to_lowercase();
                let hits = criteria
                    .keywords
                    .iter()
                    .filter(|k| title_lower.contains(&k.to_lowercase()))
                    .count();
                #[allow(clippy::cast_precision_loss)]
                {
                    score += hits as f64 / criteria.keywords.len() as f64;
                }
            }
        }

        if criteria_count == 0 {
            return (true, self.confidence);
        }

        let normalized = score / f64::from(criteria_count);
        (normalized >= 0.5, normalized * self.confidence)
    }

    /// Whether the pattern carries no criteria at all
    #[must_use]
    pub fn has_no_criteria(&self) -> bool {
        self.tag_criteria.as_ref().is_none_or(TagCriteria::is_empty)
            && self
                .text_criteria
                .as_ref()
                .is_none_or(|c| c.keywords.is_empty())
            && self.priority_criteria.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged_pattern(required: &[&str], optional: &[&str]) -> RoutingPattern {
        let mut pattern = RoutingPattern::new("p", "svc-api", PatternType::Tag, 0.8);
        pattern.tag_criteria = Some(TagCriteria {
            required: required.iter().map(ToString::to_string).collect(),
            optional: optional.iter().map(ToString::to_string).collect(),
        });
        pattern
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn required_tags_gate_the_match() {
        let pattern = tagged_pattern(&["api", "python"], &[]);

        let (matched, score) = pattern.matches(&tags(&["api", "python", "backend"]), None, None);
        assert!(matched);
        assert!((score - 0.8).abs() < 1e-9); // 1.0 × confidence

        let (matched, score) = pattern.matches(&tags(&["api"]), None, None);
        assert!(!matched);
        assert!(score.abs() < 1e-9);
    }

    #[test]
    fn optional_tags_add_bounded_bonus() {
        let pattern = tagged_pattern(&["api"], &["backend", "urgent"]);
        let (matched, score) = pattern.matches(&tags(&["api", "backend"]), None, None);
        assert!(matched);
        // (1.0 + 0.2 × 1/2) × 0.8
        assert!((score - 1.1 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn priority_counts_as_criterion_even_on_mismatch() {
        let mut pattern = tagged_pattern(&["api"], &[]);
        pattern.priority_criteria = Some(TaskPriority::High);
        pattern.pattern_type = PatternType::Combined;

        // tags match (1.0), priority mismatches (0.0) → mean 0.5, still a match
        let (matched, score) =
            pattern.matches(&tags(&["api"]), Some(TaskPriority::Low), None);
        assert!(matched);
        assert!((score - 0.5 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn keyword_fraction_scores_title() {
        let mut pattern = RoutingPattern::new("p", "svc-api", PatternType::Text, 1.0);
        pattern.text_criteria = Some(TextCriteria {
            keywords: vec!["deploy".into(), "rollback".into()],
        });

        let (matched, score) = pattern.matches(&[], None, Some("Deploy the new build"));
        assert!(matched);
        assert!((score - 0.5).abs() < 1e-9);

        let (matched, _) = pattern.matches(&[], None, Some("unrelated work"));
        assert!(!matched);
    }

    #[test]
    fn tagless_task_fails_required_tags() {
        // an empty tag set can never cover a required tag; it must not
        // slip into the catchall branch
        let pattern = tagged_pattern(&["api"], &[]);
        let (matched, score) = pattern.matches(&[], None, Some("fix typo"));
        assert!(!matched);
        assert!(score.abs() < 1e-9);
    }

    #[test]
    fn optional_only_criteria_still_count_for_tagless_tasks() {
        // no required tags: the criterion applies and scores the (empty)
        // optional overlap instead of being skipped
        let pattern = tagged_pattern(&[], &["backend"]);
        let (matched, score) = pattern.matches(&[], None, None);
        assert!(matched);
        // 1.0 base + 0.2 × 0 overlap, scaled by confidence
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn catchall_needs_truly_inapplicable_criteria() {
        // a priority-only pattern queried without a priority has no
        // applicable criterion and matches at its own confidence
        let mut pattern = RoutingPattern::new("p", "svc-api", PatternType::Priority, 0.8);
        pattern.priority_criteria = Some(TaskPriority::High);
        let (matched, score) = pattern.matches(&[], None, None);
        assert!(matched);
        assert!((score - 0.8).abs() < 1e-9);

        // but with the field supplied, the criterion is evaluated
        let (matched, _) = pattern.matches(&[], Some(TaskPriority::Low), None);
        assert!(!matched);
    }

    #[test]
    fn confidence_freezes_below_five_usages() {
        let mut pattern = tagged_pattern(&["api"], &[]);
        for _ in 0..4 {
            pattern.record_usage(false);
        }
        assert!((pattern.confidence - 0.8).abs() < 1e-9);

        pattern.record_usage(false);
        // 0.3 × 0.8 + 0.7 × 0.0
        assert!((pattern.confidence - 0.24).abs() < 1e-9);
        assert_eq!(pattern.usage_count, 5);
        assert_eq!(
            pattern.success_count + pattern.failure_count,
            pattern.usage_count
        );
    }

    #[test]
    fn ema_tracks_success_rate() {
        let mut pattern = tagged_pattern(&["api"], &[]);
        for _ in 0..10 {
            pattern.record_usage(true);
        }
        // converges toward 1.0
        assert!(pattern.confidence > 0.9);
    }
}
