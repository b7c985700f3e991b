//! ABOUTME: Rule model and evaluation
//! ABOUTME: Scores are normalized to [0, 1] and scaled by the rule's weight

use std::collections::HashMap;

use regex::Regex;
use tracing::warn;

use hopper_core::{HopperError, Result, Task};

/// Priority ladder used by priority-range rules; lower index = higher
/// priority. Values outside the ladder never match a range.
const PRIORITY_ORDER: &[&str] = &["critical", "high", "medium", "low"];

/// Logical operator for composite rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeOperator {
    /// All sub-rules must match
    And,
    /// At least one sub-rule must match
    Or,
    /// The single sub-rule must not match
    Not,
}

impl CompositeOperator {
    /// Canonical lowercase form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
        }
    }

    /// Parse from the config form
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "and" => Ok(Self::And),
            "or" => Ok(Self::Or),
            "not" => Ok(Self::Not),
            other => Err(HopperError::validation(
                "operator",
                format!("unknown operator: {other}"),
            )),
        }
    }
}

/// The routing-relevant fields a rule evaluates against
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    /// Task title
    pub title: String,
    /// Task description
    pub description: String,
    /// Task tags
    pub tags: Vec<String>,
    /// Task priority as a string ("low".."urgent")
    pub priority: Option<String>,
}

impl From<&Task> for RuleContext {
    fn from(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone().unwrap_or_default(),
            tags: task.tags.clone(),
            priority: Some(task.priority.as_str().to_string()),
        }
    }
}

/// Result of evaluating one rule
#[derive(Debug, Clone)]
pub struct RuleMatch {
    /// Rule that was evaluated
    pub rule_id: String,
    /// Whether it matched
    pub matched: bool,
    /// Match strength in [0, 1]
    pub score: f64,
    /// Why it matched or didn't
    pub reason: String,
}

impl RuleMatch {
    fn miss(rule_id: &str, reason: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            matched: false,
            score: 0.0,
            reason: reason.into(),
        }
    }

    fn hit(rule_id: &str, score: f64, reason: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            matched: true,
            score,
            reason: reason.into(),
        }
    }
}

/// Type-specific matching logic
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Match keywords against title + description
    Keyword {
        /// Keywords to look for
        keywords: Vec<String>,
        /// Case-sensitive matching
        case_sensitive: bool,
        /// Whole-word matching
        whole_word: bool,
        /// Per-keyword weights (default 1.0)
        keyword_weights: HashMap<String, f64>,
    },
    /// Match against the tag set
    Tag {
        /// Tags that must all be present
        required_tags: Vec<String>,
        /// Tags that raise the score
        optional_tags: Vec<String>,
        /// Regex patterns matched against tags
        tag_patterns: Vec<String>,
    },
    /// Match the priority exactly or by range on the ladder
    Priority {
        /// Highest-priority bound, inclusive
        min_priority: Option<String>,
        /// Lowest-priority bound, inclusive
        max_priority: Option<String>,
        /// Exact priorities to match
        priorities: Vec<String>,
    },
    /// Combine sub-rules with a logical operator
    Composite {
        /// The operator
        operator: CompositeOperator,
        /// The sub-rules
        sub_rules: Vec<Rule>,
    },
}

impl RuleKind {
    /// Config `type` string for this kind
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Keyword { .. } => "keyword",
            Self::Tag { .. } => "tag",
            Self::Priority { .. } => "priority",
            Self::Composite { .. } => "composite",
        }
    }
}

/// A routing rule: matching logic plus destination and bookkeeping
#[derive(Debug, Clone)]
pub struct Rule {
    /// Unique id
    pub id: String,
    /// Human name
    pub name: String,
    /// What the rule is for
    pub description: String,
    /// Where matching tasks route
    pub destination: String,
    /// Importance in [0, 1]
    pub weight: f64,
    /// Whether the rule participates in evaluation
    pub enabled: bool,
    /// Evaluation order; higher evaluates first
    pub priority: i32,
    /// Who created the rule
    pub created_by: Option<String>,
    /// Matching logic
    pub kind: RuleKind,
}

impl Rule {
    /// Validate structural constraints.
    ///
    /// # Errors
    ///
    /// - `Validation` when weight leaves [0, 1], a NOT has other than one
    ///   sub-rule, an AND/OR has none, a keyword rule has no keywords, or
    ///   a tag pattern fails to compile.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.weight) {
            return Err(HopperError::validation(
                "weight",
                format!("must be within [0, 1], got {}", self.weight),
            ));
        }

        match &self.kind {
            RuleKind::Keyword { keywords, .. } => {
                if keywords.is_empty() {
                    return Err(HopperError::validation(
                        "keywords",
                        "keyword rule needs at least one keyword",
                    ));
                }
            }
            RuleKind::Tag { tag_patterns, .. } => {
                for pattern in tag_patterns {
                    Regex::new(pattern).map_err(|e| {
                        HopperError::validation("tag_patterns", format!("bad pattern: {e}"))
                    })?;
                }
            }
            RuleKind::Priority {
                min_priority,
                max_priority,
                priorities,
            } => {
                if min_priority.is_none() && max_priority.is_none() && priorities.is_empty() {
                    return Err(HopperError::validation(
                        "priorities",
                        "priority rule needs an exact set or a range bound",
                    ));
                }
            }
            RuleKind::Composite {
                operator,
                sub_rules,
            } => {
                match operator {
                    CompositeOperator::Not if sub_rules.len() != 1 => {
                        return Err(HopperError::validation(
                            "sub_rules",
                            "not operator requires exactly one sub-rule",
                        ));
                    }
                    CompositeOperator::And | CompositeOperator::Or if sub_rules.is_empty() => {
                        return Err(HopperError::validation(
                            "sub_rules",
                            format!("{} operator requires at least one sub-rule", operator.as_str()),
                        ));
                    }
                    _ => {}
                }
                for sub in sub_rules {
                    sub.validate()?;
                }
            }
        }
        Ok(())
    }

    /// Evaluate the rule against a context
    #[must_use]
    pub fn evaluate(&self, context: &RuleContext) -> RuleMatch {
        match &self.kind {
            RuleKind::Keyword {
                keywords,
                case_sensitive,
                whole_word,
                keyword_weights,
            } => self.evaluate_keywords(context, keywords, *case_sensitive, *whole_word, keyword_weights),
            RuleKind::Tag {
                required_tags,
                optional_tags,
                tag_patterns,
            } => self.evaluate_tags(context, required_tags, optional_tags, tag_patterns),
            RuleKind::Priority {
                min_priority,
                max_priority,
                priorities,
            } => self.evaluate_priority(context, min_priority.as_deref(), max_priority.as_deref(), priorities),
            RuleKind::Composite {
                operator,
                sub_rules,
            } => self.evaluate_composite(context, *operator, sub_rules),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate_keywords(
        &self,
        context: &RuleContext,
        keywords: &[String],
        case_sensitive: bool,
        whole_word: bool,
        keyword_weights: &HashMap<String, f64>,
    ) -> RuleMatch {
        let text = format!("{} {}", context.title, context.description);
        let haystack = if case_sensitive {
            text
        } else {
            text.to_lowercase()
        };

        let mut matched_keywords = Vec::new();
        let mut total = 0.0;

        for keyword in keywords {
            let needle = if case_sensitive {
                keyword.clone()
            } else {
                keyword.to_lowercase()
            };

            let found = if whole_word {
                match Regex::new(&format!(r"\b{}\b", regex::escape(&needle))) {
                    Ok(re) => re.is_match(&haystack),
                    Err(e) => {
                        warn!(rule_id = %self.id, keyword = %keyword, "keyword regex failed: {e}");
                        false
                    }
                }
            } else {
                haystack.contains(&needle)
            };

            if found {
                matched_keywords.push(keyword.clone());
                total += keyword_weights.get(keyword).copied().unwrap_or(1.0);
            }
        }

        if matched_keywords.is_empty() {
            return RuleMatch::miss(&self.id, "no keywords matched");
        }

        let score = f64::min(total / keywords.len() as f64, 1.0) * self.weight;
        RuleMatch::hit(
            &self.id,
            score,
            format!("matched keywords: {}", matched_keywords.join(", ")),
        )
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate_tags(
        &self,
        context: &RuleContext,
        required_tags: &[String],
        optional_tags: &[String],
        tag_patterns: &[String],
    ) -> RuleMatch {
        let missing: Vec<&String> = required_tags
            .iter()
            .filter(|req| !context.tags.contains(req))
            .collect();
        if !required_tags.is_empty() && !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
            return RuleMatch::miss(
                &self.id,
                format!("missing required tags: {}", names.join(", ")),
            );
        }

        let mut matched_tags: Vec<String> = Vec::new();
        let mut score = 0.0;

        if !required_tags.is_empty() {
            matched_tags.extend(required_tags.iter().cloned());
            score += 0.5;
        }

        let optional_matched: Vec<&String> = optional_tags
            .iter()
            .filter(|opt| context.tags.contains(opt))
            .collect();
        if !optional_matched.is_empty() {
            matched_tags.extend(optional_matched.iter().map(|s| (*s).clone()));
            score += 0.3 * (optional_matched.len() as f64 / optional_tags.len() as f64);
        }

        for pattern in tag_patterns {
            let Ok(re) = Regex::new(pattern) else {
                warn!(rule_id = %self.id, pattern = %pattern, "skipping invalid tag pattern");
                continue;
            };
            let hits: Vec<&String> = context.tags.iter().filter(|t| re.is_match(t)).collect();
            if !hits.is_empty() {
                matched_tags.extend(hits.iter().map(|s| (*s).clone()));
                score += 0.2;
            }
        }

        let score = f64::min(score, 1.0) * self.weight;

        if !matched_tags.is_empty() || (required_tags.is_empty() && optional_tags.is_empty()) {
            RuleMatch::hit(
                &self.id,
                score,
                format!("matched tags: {}", matched_tags.join(", ")),
            )
        } else {
            RuleMatch::miss(&self.id, "no tags matched")
        }
    }

    fn evaluate_priority(
        &self,
        context: &RuleContext,
        min_priority: Option<&str>,
        max_priority: Option<&str>,
        priorities: &[String],
    ) -> RuleMatch {
        let Some(task_priority) = context.priority.as_deref() else {
            return RuleMatch::miss(&self.id, "task has no priority set");
        };

        if priorities.iter().any(|p| p == task_priority) {
            return RuleMatch::hit(
                &self.id,
                1.0 * self.weight,
                format!("exact priority match: {task_priority}"),
            );
        }

        if min_priority.is_some() || max_priority.is_some() {
            // Values outside the ladder (e.g. "urgent") never match a range.
            if let Some(task_idx) = PRIORITY_ORDER.iter().position(|p| *p == task_priority) {
                let min_ok = min_priority
                    .and_then(|min| PRIORITY_ORDER.iter().position(|p| *p == min))
                    .is_none_or(|min_idx| task_idx <= min_idx);
                let max_ok = max_priority
                    .and_then(|max| PRIORITY_ORDER.iter().position(|p| *p == max))
                    .is_none_or(|max_idx| task_idx >= max_idx);

                if min_ok && max_ok {
                    return RuleMatch::hit(
                        &self.id,
                        0.8 * self.weight,
                        format!("priority {task_priority} in range"),
                    );
                }
            }
        }

        RuleMatch::miss(&self.id, format!("priority {task_priority} not matched"))
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate_composite(
        &self,
        context: &RuleContext,
        operator: CompositeOperator,
        sub_rules: &[Rule],
    ) -> RuleMatch {
        let sub_matches: Vec<RuleMatch> = sub_rules.iter().map(|r| r.evaluate(context)).collect();

        match operator {
            CompositeOperator::And => {
                if sub_matches.iter().all(|m| m.matched) {
                    let avg =
                        sub_matches.iter().map(|m| m.score).sum::<f64>() / sub_matches.len() as f64;
                    let reasons: Vec<&str> =
                        sub_matches.iter().map(|m| m.reason.as_str()).collect();
                    RuleMatch::hit(
                        &self.id,
                        avg * self.weight,
                        format!("all conditions met: {}", reasons.join("; ")),
                    )
                } else {
                    RuleMatch::miss(&self.id, "not all and-conditions met")
                }
            }
            CompositeOperator::Or => {
                let matched: Vec<&RuleMatch> =
                    sub_matches.iter().filter(|m| m.matched).collect();
                if matched.is_empty() {
                    RuleMatch::miss(&self.id, "no or-conditions met")
                } else {
                    let max_score = matched.iter().map(|m| m.score).fold(0.0, f64::max);
                    RuleMatch::hit(
                        &self.id,
                        max_score * self.weight,
                        format!("matched: {}", matched[0].reason),
                    )
                }
            }
            CompositeOperator::Not => {
                // validate() guarantees exactly one sub-rule
                match sub_matches.first() {
                    Some(sub) if !sub.matched => RuleMatch::hit(
                        &self.id,
                        self.weight,
                        format!("not-condition met: {}", sub.reason),
                    ),
                    Some(sub) => RuleMatch::miss(
                        &self.id,
                        format!("not-condition failed: rule matched ({})", sub.reason),
                    ),
                    None => RuleMatch::miss(&self.id, "not operator without sub-rule"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_rule(kind: RuleKind) -> Rule {
        Rule {
            id: "r1".into(),
            name: "test rule".into(),
            description: String::new(),
            destination: "svc".into(),
            weight: 1.0,
            enabled: true,
            priority: 0,
            created_by: None,
            kind,
        }
    }

    fn context(title: &str, tags: &[&str], priority: &str) -> RuleContext {
        RuleContext {
            title: title.into(),
            description: String::new(),
            tags: tags.iter().map(ToString::to_string).collect(),
            priority: Some(priority.into()),
        }
    }

    #[test]
    fn keyword_substring_and_whole_word() {
        let rule = base_rule(RuleKind::Keyword {
            keywords: vec!["auth".into()],
            case_sensitive: false,
            whole_word: false,
            keyword_weights: HashMap::new(),
        });
        assert!(rule.evaluate(&context("Authentication bug", &[], "medium")).matched);

        let rule = base_rule(RuleKind::Keyword {
            keywords: vec!["auth".into()],
            case_sensitive: false,
            whole_word: true,
            keyword_weights: HashMap::new(),
        });
        assert!(!rule.evaluate(&context("Authentication bug", &[], "medium")).matched);
        assert!(rule.evaluate(&context("fix auth flow", &[], "medium")).matched);
    }

    #[test]
    fn keyword_score_normalizes_over_keyword_count() {
        let rule = base_rule(RuleKind::Keyword {
            keywords: vec!["deploy".into(), "rollback".into()],
            case_sensitive: false,
            whole_word: false,
            keyword_weights: HashMap::new(),
        });
        let m = rule.evaluate(&context("deploy the build", &[], "medium"));
        assert!(m.matched);
        assert!((m.score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn keyword_weights_shift_the_score() {
        let mut weights = HashMap::new();
        weights.insert("critical".to_string(), 2.0);
        let rule = base_rule(RuleKind::Keyword {
            keywords: vec!["critical".into(), "minor".into()],
            case_sensitive: false,
            whole_word: false,
            keyword_weights: weights,
        });
        let m = rule.evaluate(&context("critical outage", &[], "medium"));
        // 2.0 / 2 keywords = 1.0, clamped
        assert!((m.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tag_rule_requires_all_required() {
        let rule = base_rule(RuleKind::Tag {
            required_tags: vec!["api".into(), "python".into()],
            optional_tags: vec!["backend".into()],
            tag_patterns: vec![],
        });

        let m = rule.evaluate(&context("t", &["api", "python", "backend"], "medium"));
        assert!(m.matched);
        // 0.5 required + 0.3 × 1/1 optional
        assert!((m.score - 0.8).abs() < 1e-9);

        let m = rule.evaluate(&context("t", &["api"], "medium"));
        assert!(!m.matched);
    }

    #[test]
    fn tag_patterns_add_a_fifth() {
        let rule = base_rule(RuleKind::Tag {
            required_tags: vec![],
            optional_tags: vec![],
            tag_patterns: vec!["^env-".into()],
        });
        let m = rule.evaluate(&context("t", &["env-prod"], "medium"));
        assert!(m.matched);
        assert!((m.score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn priority_exact_and_range() {
        let rule = base_rule(RuleKind::Priority {
            min_priority: None,
            max_priority: None,
            priorities: vec!["urgent".into()],
        });
        let m = rule.evaluate(&context("t", &[], "urgent"));
        assert!(m.matched);
        assert!((m.score - 1.0).abs() < 1e-9);

        let rule = base_rule(RuleKind::Priority {
            min_priority: Some("high".into()),
            max_priority: None,
            priorities: vec![],
        });
        // high and above (critical) match at 0.8
        let m = rule.evaluate(&context("t", &[], "high"));
        assert!(m.matched);
        assert!((m.score - 0.8).abs() < 1e-9);
        assert!(rule.evaluate(&context("t", &[], "critical")).matched);
        assert!(!rule.evaluate(&context("t", &[], "medium")).matched);
        // off-ladder values never match a range
        assert!(!rule.evaluate(&context("t", &[], "urgent")).matched);
    }

    #[test]
    fn composite_operators() {
        let keyword = base_rule(RuleKind::Keyword {
            keywords: vec!["db".into()],
            case_sensitive: false,
            whole_word: false,
            keyword_weights: HashMap::new(),
        });
        let tag = base_rule(RuleKind::Tag {
            required_tags: vec!["infra".into()],
            optional_tags: vec![],
            tag_patterns: vec![],
        });

        let and = base_rule(RuleKind::Composite {
            operator: CompositeOperator::And,
            sub_rules: vec![keyword.clone(), tag.clone()],
        });
        let m = and.evaluate(&context("db migration", &["infra"], "medium"));
        assert!(m.matched);
        // mean of 1.0 (keyword) and 0.5 (tag)
        assert!((m.score - 0.75).abs() < 1e-9);
        assert!(!and.evaluate(&context("db migration", &[], "medium")).matched);

        let or = base_rule(RuleKind::Composite {
            operator: CompositeOperator::Or,
            sub_rules: vec![keyword.clone(), tag],
        });
        let m = or.evaluate(&context("unrelated", &["infra"], "medium"));
        assert!(m.matched);
        assert!((m.score - 0.5).abs() < 1e-9);

        let not = base_rule(RuleKind::Composite {
            operator: CompositeOperator::Not,
            sub_rules: vec![keyword],
        });
        assert!(not.evaluate(&context("frontend work", &[], "medium")).matched);
        assert!(!not.evaluate(&context("db work", &[], "medium")).matched);
    }

    #[test]
    fn validation_rejects_malformed_composites() {
        let keyword = base_rule(RuleKind::Keyword {
            keywords: vec!["x".into()],
            case_sensitive: false,
            whole_word: false,
            keyword_weights: HashMap::new(),
        });

        let not_two = base_rule(RuleKind::Composite {
            operator: CompositeOperator::Not,
            sub_rules: vec![keyword.clone(), keyword.clone()],
        });
        assert!(not_two.validate().is_err());

        let empty_and = base_rule(RuleKind::Composite {
            operator: CompositeOperator::And,
            sub_rules: vec![],
        });
        assert!(empty_and.validate().is_err());

        let mut heavy = keyword;
        heavy.weight = 1.5;
        assert!(heavy.validate().is_err());
    }
}
