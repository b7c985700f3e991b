//! Consolidated pattern store

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use hopper_core::{HopperError, Result, TaskPriority};

use super::pattern::{PatternType, RoutingPattern, TagCriteria, TextCriteria};

/// Aggregate pattern statistics
#[derive(Debug, Clone, Serialize)]
pub struct PatternStatistics {
    /// Patterns stored
    pub total_patterns: usize,
    /// Active patterns
    pub active_patterns: usize,
    /// Inactive patterns
    pub inactive_patterns: usize,
    /// Sum of usage counts
    pub total_usage: u64,
    /// Mean confidence
    pub average_confidence: f64,
    /// Count per pattern type
    pub by_type: HashMap<String, usize>,
    /// Count per target instance
    pub by_instance: HashMap<String, usize>,
}

/// Store for learned routing patterns
#[derive(Debug, Default)]
pub struct ConsolidatedStore {
    patterns: RwLock<HashMap<String, RoutingPattern>>,
}

impl ConsolidatedStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Persist a pattern.
    ///
    /// # Errors
    ///
    /// `Validation` when the pattern carries no criteria at all.
    pub fn create(&self, pattern: RoutingPattern) -> Result<RoutingPattern> {
        if pattern.has_no_criteria() {
            return Err(HopperError::validation(
                "criteria",
                "a pattern needs at least one tag, text, or priority criterion",
            ));
        }

        info!(pattern_id = %pattern.id, name = %pattern.name, target = %pattern.target_instance, "created pattern");
        self.patterns
            .write()
            .insert(pattern.id.clone(), pattern.clone());
        Ok(pattern)
    }

    /// Fetch by id
    #[must_use]
    pub fn get(&self, pattern_id: &str) -> Option<RoutingPattern> {
        self.patterns.read().get(pattern_id).cloned()
    }

    /// Fetch by name
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<RoutingPattern> {
        self.patterns
            .read()
            .values()
            .find(|p| p.name == name)
            .cloned()
    }

    /// Patterns targeting an instance, confidence descending
    #[must_use]
    pub fn for_instance(&self, instance_id: &str, active_only: bool) -> Vec<RoutingPattern> {
        let mut patterns: Vec<RoutingPattern> = self
            .patterns
            .read()
            .values()
            .filter(|p| p.target_instance == instance_id && (!active_only || p.is_active))
            .cloned()
            .collect();
        sort_by_confidence(&mut patterns);
        patterns
    }

    /// All patterns, confidence descending
    #[must_use]
    pub fn all(&self, active_only: bool, limit: usize) -> Vec<RoutingPattern> {
        let mut patterns: Vec<RoutingPattern> = self
            .patterns
            .read()
            .values()
            .filter(|p| !active_only || p.is_active)
            .cloned()
            .collect();
        sort_by_confidence(&mut patterns);
        patterns.truncate(limit);
        patterns
    }

    /// Find active patterns matching a query, best score first.
    ///
    /// Only patterns at or above `min_confidence` participate. Ties break
    /// on higher pattern confidence, then ascending id.
    #[must_use]
    pub fn find_matching(
        &self,
        tags: &[String],
        priority: Option<TaskPriority>,
        title: Option<&str>,
        min_confidence: f64,
        limit: usize,
    ) -> Vec<(RoutingPattern, f64)> {
        let patterns = self.patterns.read();
        let mut matches: Vec<(RoutingPattern, f64)> = patterns
            .values()
            .filter(|p| p.is_active && p.confidence >= min_confidence)
            .filter_map(|p| {
                let (matched, score) = p.matches(tags, priority, title);
                matched.then(|| (p.clone(), score))
            })
            .collect();

        matches.sort_by(|(a, a_score), (b, b_score)| {
            b_score
                .partial_cmp(a_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(limit);
        matches
    }

    /// Record a usage outcome on a pattern; returns the updated pattern
    pub fn update_confidence(&self, pattern_id: &str, success: bool) -> Result<RoutingPattern> {
        let mut patterns = self.patterns.write();
        let pattern = patterns
            .get_mut(pattern_id)
            .ok_or_else(|| HopperError::not_found("pattern", pattern_id))?;

        pattern.record_usage(success);
        info!(pattern_id, success, confidence = pattern.confidence, "updated pattern confidence");
        Ok(pattern.clone())
    }

    /// Refine a pattern's criteria with a union-style merge.
    ///
    /// Tag and keyword lists are merged and deduplicated; confidence is
    /// replaced when given. Stamps `last_refined_at`.
    pub fn refine(
        &self,
        pattern_id: &str,
        new_tag_criteria: Option<&TagCriteria>,
        new_text_criteria: Option<&TextCriteria>,
        new_confidence: Option<f64>,
    ) -> Result<RoutingPattern> {
        let mut patterns = self.patterns.write();
        let pattern = patterns
            .get_mut(pattern_id)
            .ok_or_else(|| HopperError::not_found("pattern", pattern_id))?;

        if let Some(new_tags) = new_tag_criteria {
            let merged = match pattern.tag_criteria.take() {
                Some(existing) => TagCriteria {
                    required: merge_dedup(existing.required, &new_tags.required),
                    optional: merge_dedup(existing.optional, &new_tags.optional),
                },
                None => new_tags.clone(),
            };
            pattern.tag_criteria = Some(merged);
        }

        if let Some(new_text) = new_text_criteria {
            let merged = match pattern.text_criteria.take() {
                Some(existing) => TextCriteria {
                    keywords: merge_dedup(existing.keywords, &new_text.keywords),
                },
                None => new_text.clone(),
            };
            pattern.text_criteria = Some(merged);
        }

        if let Some(confidence) = new_confidence {
            pattern.confidence = confidence;
        }

        pattern.last_refined_at = Some(Utc::now());
        debug!(pattern_id, "refined pattern");
        Ok(pattern.clone())
    }

    /// Reactivate a pattern; returns whether it exists
    pub fn activate(&self, pattern_id: &str) -> bool {
        self.set_active(pattern_id, true)
    }

    /// Take a pattern out of matching; returns whether it exists
    pub fn deactivate(&self, pattern_id: &str) -> bool {
        self.set_active(pattern_id, false)
    }

    fn set_active(&self, pattern_id: &str, active: bool) -> bool {
        let mut patterns = self.patterns.write();
        match patterns.get_mut(pattern_id) {
            Some(pattern) => {
                pattern.is_active = active;
                true
            }
            None => false,
        }
    }

    /// Delete a pattern; returns whether it existed
    pub fn delete(&self, pattern_id: &str) -> bool {
        self.patterns.write().remove(pattern_id).is_some()
    }

    /// Aggregate statistics over every stored pattern
    #[must_use]
    pub fn statistics(&self) -> PatternStatistics {
        let patterns = self.patterns.read();
        let total = patterns.len();
        let active = patterns.values().filter(|p| p.is_active).count();
        let total_usage = patterns.values().map(|p| p.usage_count).sum();
        #[allow(clippy::cast_precision_loss)]
        let average_confidence = if total > 0 {
            patterns.values().map(|p| p.confidence).sum::<f64>() / total as f64
        } else {
            0.0
        };

        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_instance: HashMap<String, usize> = HashMap::new();
        for p in patterns.values() {
            let type_key = match p.pattern_type {
                PatternType::Tag => "tag",
                PatternType::Text => "text",
                PatternType::Priority => "priority",
                PatternType::Combined => "combined",
            };
            *by_type.entry(type_key.to_string()).or_insert(0) += 1;
            *by_instance.entry(p.target_instance.clone()).or_insert(0) += 1;
        }

        PatternStatistics {
            total_patterns: total,
            active_patterns: active,
            inactive_patterns: total - active,
            total_usage,
            average_confidence,
            by_type,
            by_instance,
        }
    }
}

fn sort_by_confidence(patterns: &mut [RoutingPattern]) {
    patterns.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn merge_dedup(mut base: Vec<String>, extra: &[String]) -> Vec<String> {
    for item in extra {
        if !base.contains(item) {
            base.push(item.clone());
        }
    }
    base
}
