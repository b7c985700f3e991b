//! ABOUTME: YAML rule configuration - load, validate, save
//! ABOUTME: Round-trips bit-exactly modulo field order

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use hopper_core::{short_id, HopperError, Result};

use super::rule::{CompositeOperator, Rule, RuleKind};

/// Top-level rule configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RulesFile {
    rules: Vec<RuleSpec>,
}

/// One rule as it appears in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type")]
    rule_type: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    destination: String,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_by: Option<String>,

    // keyword fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    whole_word: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    keyword_weights: Option<HashMap<String, f64>>,

    // tag fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    required_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    optional_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag_patterns: Option<Vec<String>>,

    // priority fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priorities: Option<Vec<String>>,

    // composite fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_rules: Option<Vec<RuleSpec>>,
}

const fn default_weight() -> f64 {
    1.0
}

const fn default_enabled() -> bool {
    true
}

impl RuleSpec {
    fn into_rule(self) -> Result<Rule> {
        let kind = match self.rule_type.as_str() {
            "keyword" => {
                let keywords = self.keywords.ok_or_else(|| {
                    HopperError::validation("keywords", "keyword rule requires 'keywords'")
                })?;
                RuleKind::Keyword {
                    keywords,
                    case_sensitive: self.case_sensitive.unwrap_or(false),
                    whole_word: self.whole_word.unwrap_or(false),
                    keyword_weights: self.keyword_weights.unwrap_or_default(),
                }
            }
            "tag" => RuleKind::Tag {
                required_tags: self.required_tags.unwrap_or_default(),
                optional_tags: self.optional_tags.unwrap_or_default(),
                tag_patterns: self.tag_patterns.unwrap_or_default(),
            },
            "priority" => RuleKind::Priority {
                min_priority: self.min_priority,
                max_priority: self.max_priority,
                priorities: self.priorities.unwrap_or_default(),
            },
            "composite" => {
                let operator = self.operator.ok_or_else(|| {
                    HopperError::validation("operator", "composite rule requires 'operator'")
                })?;
                let sub_specs = self.sub_rules.ok_or_else(|| {
                    HopperError::validation("sub_rules", "composite rule requires 'sub_rules'")
                })?;
                let sub_rules = sub_specs
                    .into_iter()
                    .map(RuleSpec::into_rule)
                    .collect::<Result<Vec<_>>>()?;
                RuleKind::Composite {
                    operator: CompositeOperator::parse(&operator)?,
                    sub_rules,
                }
            }
            other => {
                return Err(HopperError::validation(
                    "type",
                    format!("unknown rule type: {other}"),
                ))
            }
        };

        let rule = Rule {
            id: self.id.unwrap_or_else(|| short_id("rule")),
            name: self.name,
            description: self.description.unwrap_or_default(),
            destination: self.destination,
            weight: self.weight,
            enabled: self.enabled,
            priority: self.priority,
            created_by: self.created_by,
            kind,
        };
        rule.validate()?;
        Ok(rule)
    }

    fn from_rule(rule: &Rule) -> Self {
        let mut spec = Self {
            id: Some(rule.id.clone()),
            rule_type: rule.kind.type_name().to_string(),
            name: rule.name.clone(),
            description: if rule.description.is_empty() {
                None
            } else {
                Some(rule.description.clone())
            },
            destination: rule.destination.clone(),
            weight: rule.weight,
            enabled: rule.enabled,
            priority: rule.priority,
            created_by: rule.created_by.clone(),
            keywords: None,
            case_sensitive: None,
            whole_word: None,
            keyword_weights: None,
            required_tags: None,
            optional_tags: None,
            tag_patterns: None,
            min_priority: None,
            max_priority: None,
            priorities: None,
            operator: None,
            sub_rules: None,
        };

        match &rule.kind {
            RuleKind::Keyword {
                keywords,
                case_sensitive,
                whole_word,
                keyword_weights,
            } => {
                spec.keywords = Some(keywords.clone());
                spec.case_sensitive = Some(*case_sensitive);
                spec.whole_word = Some(*whole_word);
                if !keyword_weights.is_empty() {
                    spec.keyword_weights = Some(keyword_weights.clone());
                }
            }
            RuleKind::Tag {
                required_tags,
                optional_tags,
                tag_patterns,
            } => {
                if !required_tags.is_empty() {
                    spec.required_tags = Some(required_tags.clone());
                }
                if !optional_tags.is_empty() {
                    spec.optional_tags = Some(optional_tags.clone());
                }
                if !tag_patterns.is_empty() {
                    spec.tag_patterns = Some(tag_patterns.clone());
                }
            }
            RuleKind::Priority {
                min_priority,
                max_priority,
                priorities,
            } => {
                spec.min_priority.clone_from(min_priority);
                spec.max_priority.clone_from(max_priority);
                if !priorities.is_empty() {
                    spec.priorities = Some(priorities.clone());
                }
            }
            RuleKind::Composite {
                operator,
                sub_rules,
            } => {
                spec.operator = Some(operator.as_str().to_string());
                spec.sub_rules = Some(sub_rules.iter().map(Self::from_rule).collect());
            }
        }
        spec
    }
}

/// Load rules from a YAML string
pub fn load_rules_from_str(yaml: &str) -> Result<Vec<Rule>> {
    let file: RulesFile = serde_yaml::from_str(yaml)
        .map_err(|e| HopperError::validation("rules", format!("invalid yaml: {e}")))?;
    let rules = file
        .rules
        .into_iter()
        .map(RuleSpec::into_rule)
        .collect::<Result<Vec<_>>>()?;
    info!(count = rules.len(), "loaded rules from configuration");
    Ok(rules)
}

/// Load rules from a YAML file
pub fn load_rules_from_file(path: &Path) -> Result<Vec<Rule>> {
    let text = std::fs::read_to_string(path).map_err(|e| HopperError::Storage(e.to_string()))?;
    load_rules_from_str(&text)
}

/// Render rules to a YAML string
pub fn save_rules_to_string(rules: &[Rule]) -> Result<String> {
    let file = RulesFile {
        rules: rules.iter().map(RuleSpec::from_rule).collect(),
    };
    serde_yaml::to_string(&file)
        .map_err(|e| HopperError::Storage(format!("rule render failed: {e}")))
}

/// Save rules to a YAML file
pub fn save_rules_to_file(rules: &[Rule], path: &Path) -> Result<()> {
    let text = save_rules_to_string(rules)?;
    std::fs::write(path, text).map_err(|e| HopperError::Storage(e.to_string()))?;
    info!(count = rules.len(), path = %path.display(), "saved rules");
    Ok(())
}

/// Built-in rule set used when no configuration file is provided
#[must_use]
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            id: "default-urgent".into(),
            name: "urgent tasks to operations".into(),
            description: "urgent work goes to the operations project".into(),
            destination: "operations".into(),
            weight: 1.0,
            enabled: true,
            priority: 100,
            created_by: Some("system".into()),
            kind: RuleKind::Priority {
                min_priority: None,
                max_priority: None,
                priorities: vec!["urgent".into()],
            },
        },
        Rule {
            id: "default-bugs".into(),
            name: "bug reports to maintenance".into(),
            description: "keyword match for defect work".into(),
            destination: "maintenance".into(),
            weight: 0.8,
            enabled: true,
            priority: 50,
            created_by: Some("system".into()),
            kind: RuleKind::Keyword {
                keywords: vec!["bug".into(), "fix".into(), "error".into(), "crash".into()],
                case_sensitive: false,
                whole_word: true,
                keyword_weights: HashMap::new(),
            },
        },
        Rule {
            id: "default-infra".into(),
            name: "infrastructure tags to platform".into(),
            description: "tagged infrastructure work".into(),
            destination: "platform".into(),
            weight: 0.9,
            enabled: true,
            priority: 40,
            created_by: Some("system".into()),
            kind: RuleKind::Tag {
                required_tags: vec!["infra".into()],
                optional_tags: vec!["deploy".into(), "ci".into()],
                tag_patterns: Vec::new(),
            },
        },
    ]
}
