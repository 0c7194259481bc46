//! Condition evaluation against a single message.

use super::model::{Condition, TemporalCheck, TextCheck, TextField};
use crate::models::Message;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Test one condition against one message.
///
/// `reference_time` is the "now" that relative spans are measured from; the
/// engine captures it once per run.
pub fn evaluate(condition: &Condition, message: &Message, reference_time: DateTime<Utc>) -> bool {
    match condition {
        Condition::Text { field, check, value } => {
            let candidates = field_values(*field, message);
            match check {
                TextCheck::Equals => candidates.iter().any(|c| *c == value.as_str()),
                TextCheck::NotEquals => !candidates.iter().any(|c| *c == value.as_str()),
                TextCheck::Contains => candidates.iter().any(|c| c.contains(value.as_str())),
                TextCheck::NotContains => !candidates.iter().any(|c| c.contains(value.as_str())),
            }
        }
        Condition::ReceivedAt { check, at } => match message.received_at {
            Some(received) => compare_instants(*check, received, *at),
            None => false,
        },
        Condition::ReceivedAtDelta { check, span } => {
            let Some(received) = message.received_at else {
                return false;
            };
            let Some(cutoff) = span.before(reference_time) else {
                // The span reaches past the earliest representable instant, so
                // every message is younger than it.
                debug!(span = %span, "Span exceeds the representable date range");
                return *check == TemporalCheck::LessThan;
            };
            // elapsed > span  <=>  received before the cutoff
            match check {
                TemporalCheck::GreaterThan => received < cutoff,
                TemporalCheck::LessThan => received > cutoff,
            }
        }
    }
}

fn compare_instants(check: TemporalCheck, received: DateTime<Utc>, at: DateTime<Utc>) -> bool {
    match check {
        TemporalCheck::GreaterThan => received > at,
        TemporalCheck::LessThan => received < at,
    }
}

/// Values a text condition is tested against. Missing fields read as "".
fn field_values(field: TextField, message: &Message) -> Vec<&str> {
    match field {
        TextField::From => vec![message.from_address.as_deref().unwrap_or("")],
        TextField::To => message.recipients(),
        TextField::Subject => vec![message.subject.as_deref().unwrap_or("")],
        TextField::Body => vec![message.body.as_deref().unwrap_or("")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::temporal::{RelativeSpan, SpanUnit};
    use chrono::TimeZone;

    fn create_test_message() -> Message {
        Message {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            account: "me@example.com".to_string(),
            from_address: Some("a@x.com".to_string()),
            to_address: Some("a@g.com, team@out.com".to_string()),
            subject: Some("Weekly Report".to_string()),
            body: None,
            internal_date: 0,
            received_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
            is_read: false,
            labels: vec!["INBOX".to_string()],
        }
    }

    fn text(field: TextField, check: TextCheck, value: &str) -> Condition {
        Condition::Text {
            field,
            check,
            value: value.to_string(),
        }
    }

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_from_equals_and_contains() {
        let msg = create_test_message();
        assert!(evaluate(&text(TextField::From, TextCheck::Equals, "a@x.com"), &msg, reference()));
        assert!(evaluate(&text(TextField::From, TextCheck::Contains, "x.com"), &msg, reference()));
        assert!(!evaluate(&text(TextField::From, TextCheck::Equals, "a@x"), &msg, reference()));
        assert!(evaluate(&text(TextField::From, TextCheck::NotEquals, "b@x.com"), &msg, reference()));
    }

    #[test]
    fn test_string_checks_are_case_sensitive() {
        let msg = create_test_message();
        assert!(!evaluate(&text(TextField::Subject, TextCheck::Contains, "weekly"), &msg, reference()));
        assert!(evaluate(&text(TextField::Subject, TextCheck::Contains, "Weekly"), &msg, reference()));
    }

    #[test]
    fn test_missing_body_reads_as_empty() {
        let msg = create_test_message();
        assert!(evaluate(&text(TextField::Body, TextCheck::NotContains, "x"), &msg, reference()));
        assert!(!evaluate(&text(TextField::Body, TextCheck::Contains, "x"), &msg, reference()));
        assert!(!evaluate(&text(TextField::Body, TextCheck::Equals, "x"), &msg, reference()));
        assert!(evaluate(&text(TextField::Body, TextCheck::Equals, ""), &msg, reference()));
    }

    #[test]
    fn test_to_matches_any_recipient() {
        let msg = create_test_message();
        assert!(evaluate(&text(TextField::To, TextCheck::Equals, "a@g.com"), &msg, reference()));
        assert!(evaluate(&text(TextField::To, TextCheck::Contains, "out.com"), &msg, reference()));
        assert!(!evaluate(&text(TextField::To, TextCheck::NotContains, "out.com"), &msg, reference()));
        assert!(!evaluate(&text(TextField::To, TextCheck::NotEquals, "team@out.com"), &msg, reference()));
    }

    #[test]
    fn test_contains_is_negation_of_not_contains() {
        let mut messages = vec![create_test_message()];
        let mut bare = create_test_message();
        bare.from_address = None;
        bare.to_address = None;
        bare.subject = None;
        messages.push(bare);

        for msg in &messages {
            for field in [TextField::From, TextField::To, TextField::Subject, TextField::Body] {
                for value in ["", "a", "out.com", "Report", "zzz"] {
                    let contains = text(field, TextCheck::Contains, value);
                    let not_contains = text(field, TextCheck::NotContains, value);
                    assert_eq!(
                        evaluate(&contains, msg, reference()),
                        !evaluate(&not_contains, msg, reference()),
                        "{:?} / {:?}",
                        field,
                        value
                    );
                }
            }
        }
    }

    #[test]
    fn test_received_at_is_strict() {
        let msg = create_test_message();
        let at = |check| Condition::ReceivedAt {
            check,
            at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        };
        assert!(!evaluate(&at(TemporalCheck::GreaterThan), &msg, reference()));
        assert!(!evaluate(&at(TemporalCheck::LessThan), &msg, reference()));

        let earlier = Condition::ReceivedAt {
            check: TemporalCheck::GreaterThan,
            at: Utc.with_ymd_and_hms(2025, 5, 31, 0, 0, 0).unwrap(),
        };
        assert!(evaluate(&earlier, &msg, reference()));
    }

    #[test]
    fn test_received_at_delta_older_than_thirty_days() {
        let msg = create_test_message();
        let older = Condition::ReceivedAtDelta {
            check: TemporalCheck::GreaterThan,
            span: RelativeSpan { amount: 30, unit: SpanUnit::Days },
        };
        let newer = Condition::ReceivedAtDelta {
            check: TemporalCheck::LessThan,
            span: RelativeSpan { amount: 30, unit: SpanUnit::Days },
        };
        assert!(evaluate(&older, &msg, reference()));
        assert!(!evaluate(&newer, &msg, reference()));
    }

    #[test]
    fn test_received_at_delta_months() {
        let msg = create_test_message();
        let within_three_months = Condition::ReceivedAtDelta {
            check: TemporalCheck::LessThan,
            span: RelativeSpan { amount: 3, unit: SpanUnit::Months },
        };
        assert!(evaluate(&within_three_months, &msg, reference()));
    }

    #[test]
    fn test_temporal_conditions_never_match_sent_mail() {
        let mut msg = create_test_message();
        msg.received_at = None;
        for check in [TemporalCheck::GreaterThan, TemporalCheck::LessThan] {
            let delta = Condition::ReceivedAtDelta {
                check,
                span: RelativeSpan { amount: 1, unit: SpanUnit::Days },
            };
            assert!(!evaluate(&delta, &msg, reference()));

            let absolute = Condition::ReceivedAt {
                check,
                at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            };
            assert!(!evaluate(&absolute, &msg, reference()));
        }
    }

    #[test]
    fn test_out_of_range_span_is_longer_than_any_elapsed_time() {
        let mut msg = create_test_message();
        msg.received_at = Some(Utc.with_ymd_and_hms(2025, 7, 31, 0, 0, 0).unwrap());

        for span in [
            RelativeSpan { amount: 200_000_000, unit: SpanUnit::Days },
            RelativeSpan { amount: 4_000_000_000, unit: SpanUnit::Months },
        ] {
            assert!(span.before(reference()).is_none());
            let younger = Condition::ReceivedAtDelta { check: TemporalCheck::LessThan, span };
            let older = Condition::ReceivedAtDelta { check: TemporalCheck::GreaterThan, span };
            assert!(evaluate(&younger, &msg, reference()));
            assert!(!evaluate(&older, &msg, reference()));
        }
    }

    #[test]
    fn test_out_of_range_span_loaded_from_rule_file() {
        let rules = crate::rules::RuleSet::from_json(
            r#"{"rules": [{"name": "recent", "match_type": "all",
                "conditions": [{"type": "received_at_delta", "check": "less_than", "value": "200000000 days"}],
                "actions": []}]}"#,
        )
        .unwrap();
        let msg = create_test_message();
        assert!(evaluate(&rules.rules[0].conditions[0], &msg, reference()));
    }
}
