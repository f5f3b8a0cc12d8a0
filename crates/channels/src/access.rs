//! Allow/block rule evaluation for inbound senders.
//!
//! Evaluation is a pure function of the rule snapshot, the sender phone and
//! the instance name. The most specific matching rule wins:
//!
//! 1. exact literal match,
//! 2. `prefix*` wildcard, longest prefix first,
//! 3. bare `*`.
//!
//! Rules of equal specificity resolve to `block` (fail closed). When no rule
//! matches the sender is allowed.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Whether a rule lets a sender through or stops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Allow,
    Block,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "block" => Ok(Self::Block),
            other => Err(Error::invalid_input(format!("unknown rule type: {other}"))),
        }
    }
}

/// A single access rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Store-assigned id; 0 for rules that have not been persisted.
    #[serde(default)]
    pub id: i64,
    pub phone_pattern: String,
    pub rule_type: RuleType,
    /// `None` applies to every instance.
    #[serde(default)]
    pub scope: Option<String>,
}

impl AccessRule {
    pub fn global(pattern: impl Into<String>, rule_type: RuleType) -> Self {
        Self {
            id: 0,
            phone_pattern: pattern.into(),
            rule_type,
            scope: None,
        }
    }

    pub fn scoped(
        pattern: impl Into<String>,
        rule_type: RuleType,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            phone_pattern: pattern.into(),
            rule_type,
            scope: Some(instance.into()),
        }
    }

    /// True when the rule is global or scoped to `instance`.
    pub fn applies_to(&self, instance: &str) -> bool {
        self.scope.as_deref().is_none_or(|s| s == instance)
    }
}

/// Result of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessDecision {
    Allowed,
    Blocked,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// How specifically a pattern matched. Ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Specificity {
    Any,
    Prefix(usize),
    Exact,
}

/// Decision plus the rule that produced it (`None` for the default allow).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation<'a> {
    pub decision: AccessDecision,
    pub matched: Option<&'a AccessRule>,
}

/// Check `phone` against `rules` for `instance`.
pub fn check(rules: &[AccessRule], phone: &str, instance: &str) -> AccessDecision {
    evaluate(rules, phone, instance).decision
}

/// Like [`check`] but also reports the winning rule.
pub fn evaluate<'a>(rules: &'a [AccessRule], phone: &str, instance: &str) -> Evaluation<'a> {
    let phone = canonical(phone);
    let mut best: Option<(Specificity, &AccessRule)> = None;

    for rule in rules.iter().filter(|r| r.applies_to(instance)) {
        let Some(spec) = specificity(&rule.phone_pattern, phone) else {
            continue;
        };
        best = match best {
            None => Some((spec, rule)),
            Some((cur_spec, cur)) => match spec.cmp(&cur_spec) {
                Ordering::Greater => Some((spec, rule)),
                Ordering::Equal
                    if rule.rule_type == RuleType::Block && cur.rule_type == RuleType::Allow =>
                {
                    Some((spec, rule))
                },
                _ => Some((cur_spec, cur)),
            },
        };
    }

    match best {
        Some((_, rule)) => Evaluation {
            decision: match rule.rule_type {
                RuleType::Allow => AccessDecision::Allowed,
                RuleType::Block => AccessDecision::Blocked,
            },
            matched: Some(rule),
        },
        None => Evaluation {
            decision: AccessDecision::Allowed,
            matched: None,
        },
    }
}

/// How `pattern` matches the canonical `phone`, if at all.
fn specificity(pattern: &str, phone: &str) -> Option<Specificity> {
    let pattern = canonical(pattern);
    if pattern == "*" {
        return Some(Specificity::Any);
    }
    if let Some(prefix) = pattern.strip_suffix('*')
        && !prefix.contains('*')
    {
        return phone
            .starts_with(prefix)
            .then_some(Specificity::Prefix(prefix.len()));
    }
    (pattern == phone).then_some(Specificity::Exact)
}

/// Trim whitespace and one leading `+`.
fn canonical(value: &str) -> &str {
    let value = value.trim();
    value.strip_prefix('+').unwrap_or(value)
}
