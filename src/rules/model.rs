//! Rule file format and the validated rule set built from it.

use super::error::RuleError;
use super::temporal::{RelativeSpan, parse_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Labels that rules may never move a message into.
pub const RESERVED_LABELS: &[&str] = &["READ", "UNREAD", "SPAM", "TRASH", "DRAFTS", "SENT", "INBOX"];

const MAX_LABEL_LEN: usize = 150;

// --- JSON deserialization types ---

#[derive(Debug, Deserialize)]
pub struct RulesFile {
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

#[derive(Debug, Deserialize)]
pub struct RuleDef {
    pub name: String,
    pub match_type: MatchType,
    pub conditions: Vec<ConditionDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
}

#[derive(Debug, Deserialize)]
pub struct ConditionDef {
    #[serde(rename = "type")]
    pub field: ConditionField,
    pub check: CheckType,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionDef {
    #[serde(rename = "type")]
    pub action: ActionType,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    All,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    From,
    To,
    Subject,
    Body,
    ReceivedAt,
    ReceivedAtDelta,
}

impl ConditionField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionField::From => "from",
            ConditionField::To => "to",
            ConditionField::Subject => "subject",
            ConditionField::Body => "body",
            ConditionField::ReceivedAt => "received_at",
            ConditionField::ReceivedAtDelta => "received_at_delta",
        }
    }
}

impl fmt::Display for ConditionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Equals => "equals",
            CheckType::NotEquals => "not_equals",
            CheckType::Contains => "contains",
            CheckType::NotContains => "not_contains",
            CheckType::GreaterThan => "greater_than",
            CheckType::LessThan => "less_than",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    MarkAsRead,
    MarkAsUnread,
    MoveToFolder,
}

// --- Compiled types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    From,
    To,
    Subject,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextCheck {
    Equals,
    NotEquals,
    Contains,
    NotContains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalCheck {
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Text {
        field: TextField,
        check: TextCheck,
        value: String,
    },
    ReceivedAt {
        check: TemporalCheck,
        at: DateTime<Utc>,
    },
    ReceivedAtDelta {
        check: TemporalCheck,
        span: RelativeSpan,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Action {
    MarkAsRead,
    MarkAsUnread,
    MoveToFolder(String),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::MarkAsRead => f.write_str("mark_as_read"),
            Action::MarkAsUnread => f.write_str("mark_as_unread"),
            Action::MoveToFolder(label) => write!(f, "move_to_folder({})", label),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub match_type: MatchType,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

// --- Loading and compilation ---

impl RuleSet {
    pub fn load(path: &Path) -> Result<Self, RuleError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, RuleError> {
        let file: RulesFile = serde_json::from_str(content)?;
        let rules = file
            .rules
            .into_iter()
            .map(compile_rule)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_rule(def: RuleDef) -> Result<Rule, RuleError> {
    if def.conditions.is_empty() {
        return Err(RuleError::NoConditions { rule: def.name });
    }
    if def.actions.is_empty() {
        warn!(rule = %def.name, "Rule has no actions and will only be reported");
    }

    let conditions = def
        .conditions
        .iter()
        .map(|c| compile_condition(&def.name, c))
        .collect::<Result<Vec<_>, _>>()?;
    let actions = def
        .actions
        .iter()
        .map(|a| compile_action(&def.name, a))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Rule {
        name: def.name,
        match_type: def.match_type,
        conditions,
        actions,
    })
}

fn compile_condition(rule: &str, def: &ConditionDef) -> Result<Condition, RuleError> {
    let unsupported = || RuleError::UnsupportedCheck {
        rule: rule.to_string(),
        field: def.field,
        check: def.check,
    };

    match def.field {
        ConditionField::From | ConditionField::To | ConditionField::Subject | ConditionField::Body => {
            let field = match def.field {
                ConditionField::From => TextField::From,
                ConditionField::To => TextField::To,
                ConditionField::Subject => TextField::Subject,
                _ => TextField::Body,
            };
            let check = match def.check {
                CheckType::Equals => TextCheck::Equals,
                CheckType::NotEquals => TextCheck::NotEquals,
                CheckType::Contains => TextCheck::Contains,
                CheckType::NotContains => TextCheck::NotContains,
                CheckType::GreaterThan | CheckType::LessThan => return Err(unsupported()),
            };
            Ok(Condition::Text {
                field,
                check,
                value: def.value.clone(),
            })
        }
        ConditionField::ReceivedAt | ConditionField::ReceivedAtDelta => {
            let check = match def.check {
                CheckType::GreaterThan => TemporalCheck::GreaterThan,
                CheckType::LessThan => TemporalCheck::LessThan,
                _ => return Err(unsupported()),
            };
            if def.field == ConditionField::ReceivedAt {
                let at = parse_timestamp(&def.value).ok_or_else(|| RuleError::InvalidTimestamp {
                    rule: rule.to_string(),
                    value: def.value.clone(),
                })?;
                Ok(Condition::ReceivedAt { check, at })
            } else {
                let span = def
                    .value
                    .parse::<RelativeSpan>()
                    .map_err(|e| RuleError::InvalidSpan {
                        rule: rule.to_string(),
                        value: def.value.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(Condition::ReceivedAtDelta { check, span })
            }
        }
    }
}

fn compile_action(rule: &str, def: &ActionDef) -> Result<Action, RuleError> {
    match def.action {
        ActionType::MarkAsRead => Ok(Action::MarkAsRead),
        ActionType::MarkAsUnread => Ok(Action::MarkAsUnread),
        ActionType::MoveToFolder => {
            let label = def
                .value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| RuleError::MissingFolder {
                    rule: rule.to_string(),
                })?;
            validate_label(label).map_err(|reason| RuleError::InvalidFolder {
                rule: rule.to_string(),
                label: label.to_string(),
                reason: reason.to_string(),
            })?;
            Ok(Action::MoveToFolder(label.to_string()))
        }
    }
}

fn validate_label(label: &str) -> Result<(), &'static str> {
    if label.len() > MAX_LABEL_LEN {
        return Err("must be at most 150 characters");
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("only letters, digits, '-' and '_' are allowed");
    }
    Ok(())
}

pub fn is_reserved_label(label: &str) -> bool {
    RESERVED_LABELS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(label))
}
