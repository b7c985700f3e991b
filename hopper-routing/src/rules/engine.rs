//! ABOUTME: Rules engine - evaluates the rule set and picks a destination
//! ABOUTME: Enabled rules run in descending priority; best match wins by (priority, score)

use tracing::debug;

use super::rule::{Rule, RuleContext, RuleMatch};

/// Winning rule for a context
#[derive(Debug, Clone)]
pub struct RuleDecision {
    /// Destination the winning rule routes to
    pub destination: String,
    /// Winning rule id
    pub rule_id: String,
    /// Winning rule name
    pub rule_name: String,
    /// Match score in [0, 1]
    pub score: f64,
    /// Winning rule priority
    pub priority: i32,
    /// Why the rule matched
    pub reason: String,
}

/// Evaluates a declarative rule set
#[derive(Debug, Clone, Default)]
pub struct RulesEngine {
    rules: Vec<Rule>,
}

impl RulesEngine {
    /// Create over a rule set. Rules are kept in descending priority order.
    #[must_use]
    pub fn new(mut rules: Vec<Rule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Self { rules }
    }

    /// The rules, in evaluation order
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Whether the engine has any rules at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every enabled rule and collect the matches, in evaluation
    /// order.
    #[must_use]
    pub fn evaluate_all(&self, context: &RuleContext) -> Vec<(&Rule, RuleMatch)> {
        self.rules
            .iter()
            .filter(|r| r.enabled)
            .map(|r| (r, r.evaluate(context)))
            .filter(|(_, m)| m.matched)
            .collect()
    }

    /// Best destination for a context: highest rule priority wins, then
    /// highest score, then ascending rule id for determinism.
    #[must_use]
    pub fn decide(&self, context: &RuleContext) -> Option<RuleDecision> {
        let mut matches = self.evaluate_all(context);
        matches.sort_by(|(a_rule, a_match), (b_rule, b_match)| {
            b_rule
                .priority
                .cmp(&a_rule.priority)
                .then_with(|| {
                    b_match
                        .score
                        .partial_cmp(&a_match.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a_rule.id.cmp(&b_rule.id))
        });

        let (rule, matched) = matches.into_iter().next()?;
        debug!(rule_id = %rule.id, destination = %rule.destination, score = matched.score, "rule decision");
        Some(RuleDecision {
            destination: rule.destination.clone(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            score: matched.score,
            priority: rule.priority,
            reason: matched.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::rule::RuleKind;
    use std::collections::HashMap;

    fn keyword_rule(id: &str, keyword: &str, destination: &str, priority: i32, weight: f64) -> Rule {
        Rule {
            id: id.into(),
            name: format!("{keyword} rule"),
            description: String::new(),
            destination: destination.into(),
            weight,
            enabled: true,
            priority,
            created_by: None,
            kind: RuleKind::Keyword {
                keywords: vec![keyword.into()],
                case_sensitive: false,
                whole_word: false,
                keyword_weights: HashMap::new(),
            },
        }
    }

    fn context(title: &str) -> RuleContext {
        RuleContext {
            title: title.into(),
            ..RuleContext::default()
        }
    }

    #[test]
    fn priority_beats_score() {
        let engine = RulesEngine::new(vec![
            keyword_rule("low-pri", "deploy", "svc-strong", 0, 1.0),
            keyword_rule("high-pri", "deploy", "svc-weak", 10, 0.4),
        ]);

        let decision = engine.decide(&context("deploy now")).unwrap();
        assert_eq!(decision.destination, "svc-weak");
        assert_eq!(decision.rule_id, "high-pri");
    }

    #[test]
    fn score_breaks_priority_ties() {
        let engine = RulesEngine::new(vec![
            keyword_rule("a", "deploy", "svc-a", 5, 0.4),
            keyword_rule("b", "deploy", "svc-b", 5, 0.9),
        ]);

        let decision = engine.decide(&context("deploy now")).unwrap();
        assert_eq!(decision.destination, "svc-b");
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut rule = keyword_rule("off", "deploy", "svc", 0, 1.0);
        rule.enabled = false;
        let engine = RulesEngine::new(vec![rule]);
        assert!(engine.decide(&context("deploy now")).is_none());
    }

    #[test]
    fn no_match_yields_none() {
        let engine = RulesEngine::new(vec![keyword_rule("r", "deploy", "svc", 0, 1.0)]);
        assert!(engine.decide(&context("write docs")).is_none());
    }
}
