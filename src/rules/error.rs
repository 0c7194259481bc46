//! Rule file configuration errors.
//!
//! All of these are raised while loading a rule set, before any message is
//! looked at.

use super::model::{CheckType, ConditionField};

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Failed to read rules file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse rules file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rule '{rule}' has no conditions")]
    NoConditions { rule: String },

    #[error("Rule '{rule}': check '{check}' is not supported for field '{field}'")]
    UnsupportedCheck {
        rule: String,
        field: ConditionField,
        check: CheckType,
    },

    #[error("Rule '{rule}': invalid timestamp '{value}'")]
    InvalidTimestamp { rule: String, value: String },

    #[error("Rule '{rule}': invalid time span '{value}': {reason}")]
    InvalidSpan {
        rule: String,
        value: String,
        reason: String,
    },

    #[error("Rule '{rule}': move_to_folder requires a destination value")]
    MissingFolder { rule: String },

    #[error("Rule '{rule}': invalid folder '{label}': {reason}")]
    InvalidFolder {
        rule: String,
        label: String,
        reason: String,
    },
}
