use super::conditions::evaluate;
use super::model::{MatchType, Rule};
use crate::models::Message;
use chrono::{DateTime, Utc};
use tracing::trace;

/// Test if a rule matches a message.
///
/// Conditions are evaluated in declared order and short-circuit: `all` stops
/// at the first failing condition, `any` at the first passing one.
pub fn matches(rule: &Rule, message: &Message, reference_time: DateTime<Utc>) -> bool {
    let mut results = rule.conditions.iter().enumerate().map(|(index, cond)| {
        let hit = evaluate(cond, message, reference_time);
        trace!(rule = %rule.name, message_id = %message.id, index, hit, "Condition evaluated");
        hit
    });

    match rule.match_type {
        MatchType::All => results.all(|hit| hit),
        MatchType::Any => results.any(|hit| hit),
    }
}
