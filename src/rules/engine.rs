//! Rule engine - runs a rule set over messages and reports what happened.

use super::actions::{ActionExecutor, ActionOutcome, ExecutionResult};
use super::matcher::matches;
use super::model::RuleSet;
use crate::models::Message;
use crate::store::{MessageSelector, MessageStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Stop at the first matching rule for each message instead of applying
    /// every matching rule.
    pub first_match_wins: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleReport {
    pub rule: String,
    pub execution: ExecutionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageReport {
    pub message_id: String,
    /// Matched rules in rule set order.
    pub matched: Vec<RuleReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub reference_time: DateTime<Utc>,
    pub messages: Vec<MessageReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub messages: usize,
    pub messages_matched: usize,
    pub rule_matches: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub planned: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            messages: self.messages.len(),
            ..RunSummary::default()
        };
        for msg in &self.messages {
            if !msg.matched.is_empty() {
                summary.messages_matched += 1;
            }
            summary.rule_matches += msg.matched.len();
            for result in msg.matched.iter().flat_map(|r| &r.execution.actions) {
                match result.outcome {
                    ActionOutcome::Applied { .. } => summary.applied += 1,
                    ActionOutcome::Unchanged => summary.unchanged += 1,
                    ActionOutcome::Planned => summary.planned += 1,
                    ActionOutcome::Skipped { .. } => summary.skipped += 1,
                    ActionOutcome::LocalFailed { .. } | ActionOutcome::RemoteFailed { .. } => {
                        summary.failed += 1
                    }
                }
            }
        }
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.summary().failed > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} messages evaluated, {} matched ({} rule matches); actions: {} applied, {} unchanged, {} planned, {} skipped, {} failed",
            self.messages,
            self.messages_matched,
            self.rule_matches,
            self.applied,
            self.unchanged,
            self.planned,
            self.skipped,
            self.failed
        )
    }
}

pub struct RuleEngine {
    store: Arc<dyn MessageStore>,
    executor: ActionExecutor,
    options: EngineOptions,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn MessageStore>, executor: ActionExecutor, options: EngineOptions) -> Self {
        Self {
            store,
            executor,
            options,
        }
    }

    /// Fetch candidates from the store and run the rule set over them.
    pub async fn run_selected(&self, rules: &RuleSet, selector: &MessageSelector) -> Result<RunReport> {
        let messages = self
            .store
            .fetch(selector)
            .await
            .context("Failed to load messages for rule processing")?;
        info!(count = messages.len(), rules = rules.len(), "Processing rules");
        Ok(self.run(rules, messages).await)
    }

    pub async fn run(&self, rules: &RuleSet, messages: Vec<Message>) -> RunReport {
        self.run_at(rules, messages, Utc::now()).await
    }

    /// Run with an explicit reference time for relative conditions.
    pub async fn run_at(
        &self,
        rules: &RuleSet,
        messages: Vec<Message>,
        reference_time: DateTime<Utc>,
    ) -> RunReport {
        let mut reports = Vec::with_capacity(messages.len());

        for mut message in messages {
            let mut matched = Vec::new();
            for rule in &rules.rules {
                if !matches(rule, &message, reference_time) {
                    continue;
                }
                info!(rule = %rule.name, message_id = %message.id, "Rule matched");
                let execution = self.executor.apply(&rule.actions, &mut message).await;
                matched.push(RuleReport {
                    rule: rule.name.clone(),
                    execution,
                });
                if self.options.first_match_wins {
                    break;
                }
            }
            if matched.is_empty() {
                debug!(message_id = %message.id, "No rule matched");
            }
            reports.push(MessageReport {
                message_id: message.id,
                matched,
            });
        }

        RunReport {
            reference_time,
            messages: reports,
        }
    }
}
