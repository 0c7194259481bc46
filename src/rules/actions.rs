//! Action execution against the local store and the mail provider.

use super::model::{Action, is_reserved_label};
use crate::models::Message;
use crate::store::{MailProvider, MessageStore, MessageUpdate};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What happened to a single action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Applied locally and, when a provider is attached, remotely.
    Applied { remote_ref: Option<String> },
    /// The message already conformed; nothing was written.
    Unchanged,
    /// Dry run: the action would have been applied.
    Planned,
    Skipped { reason: String },
    /// The local write failed, so the provider was never asked.
    LocalFailed { error: String },
    /// The local write stuck but the provider call failed or timed out.
    RemoteFailed { error: String },
}

impl ActionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ActionOutcome::LocalFailed { .. } | ActionOutcome::RemoteFailed { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub action: Action,
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    pub actions: Vec<ActionResult>,
}

impl ExecutionResult {
    pub fn failures(&self) -> impl Iterator<Item = &ActionResult> {
        self.actions.iter().filter(|r| r.outcome.is_failure())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Applies rule actions to matched messages.
///
/// Actions run in declared order and are not atomic: a failure leaves every
/// earlier action in place and does not stop the later ones.
pub struct ActionExecutor {
    store: Arc<dyn MessageStore>,
    provider: Option<Arc<dyn MailProvider>>,
    remote_timeout: Duration,
    dry_run: bool,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        provider: Option<Arc<dyn MailProvider>>,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            remote_timeout,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Execute `actions` on `message`, keeping the in-memory copy in step with
    /// what was written to the store.
    pub async fn apply(&self, actions: &[Action], message: &mut Message) -> ExecutionResult {
        let mut result = ExecutionResult::default();
        for action in actions {
            let outcome = self.apply_one(action, message).await;
            match &outcome {
                ActionOutcome::Applied { .. } => {
                    info!(message_id = %message.id, %action, "Action applied")
                }
                ActionOutcome::LocalFailed { error } | ActionOutcome::RemoteFailed { error } => {
                    warn!(message_id = %message.id, %action, %error, "Action failed")
                }
                ActionOutcome::Skipped { reason } => {
                    warn!(message_id = %message.id, %action, %reason, "Action skipped")
                }
                ActionOutcome::Unchanged | ActionOutcome::Planned => {
                    debug!(message_id = %message.id, %action, ?outcome, "Action not written")
                }
            }
            result.actions.push(ActionResult {
                action: action.clone(),
                outcome,
            });
        }
        result
    }

    async fn apply_one(&self, action: &Action, message: &mut Message) -> ActionOutcome {
        match action {
            Action::MarkAsRead | Action::MarkAsUnread => {
                let read = matches!(action, Action::MarkAsRead);
                if message.is_read == read {
                    return ActionOutcome::Unchanged;
                }
                if self.dry_run {
                    return ActionOutcome::Planned;
                }
                if let Err(e) = self
                    .store
                    .update(&message.id, &MessageUpdate::SetRead(read))
                    .await
                {
                    return ActionOutcome::LocalFailed {
                        error: format!("{:#}", e),
                    };
                }
                message.is_read = read;

                match &self.provider {
                    None => ActionOutcome::Applied { remote_ref: None },
                    Some(provider) => {
                        match self.remote(provider.set_read_state(&message.id, read)).await {
                            Ok(()) => ActionOutcome::Applied { remote_ref: None },
                            Err(error) => ActionOutcome::RemoteFailed { error },
                        }
                    }
                }
            }
            Action::MoveToFolder(label) => {
                if is_reserved_label(label) {
                    return ActionOutcome::Skipped {
                        reason: format!("'{}' is a reserved system label", label),
                    };
                }
                if message.has_label(label) {
                    return ActionOutcome::Unchanged;
                }
                if self.dry_run {
                    return ActionOutcome::Planned;
                }
                if let Err(e) = self
                    .store
                    .update(&message.id, &MessageUpdate::AddLabel(label.clone()))
                    .await
                {
                    return ActionOutcome::LocalFailed {
                        error: format!("{:#}", e),
                    };
                }
                message.labels.push(label.clone());

                match &self.provider {
                    None => ActionOutcome::Applied { remote_ref: None },
                    Some(provider) => match self.remote(provider.apply_label(&message.id, label)).await
                    {
                        Ok(label_id) => ActionOutcome::Applied {
                            remote_ref: Some(label_id),
                        },
                        Err(error) => ActionOutcome::RemoteFailed { error },
                    },
                }
            }
        }
    }

    async fn remote<T>(&self, call: impl Future<Output = anyhow::Result<T>>) -> Result<T, String> {
        match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err(format!("timed out after {:?}", self.remote_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fakes::{MemoryStore, RecordingProvider, RemoteCall};
    use std::collections::HashSet;

    fn create_test_message() -> Message {
        Message {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            account: "me@example.com".to_string(),
            from_address: Some("a@x.com".to_string()),
            to_address: None,
            subject: None,
            body: None,
            internal_date: 0,
            received_at: None,
            is_read: false,
            labels: vec!["INBOX".to_string()],
        }
    }

    fn executor(store: &Arc<MemoryStore>, provider: &Arc<RecordingProvider>) -> ActionExecutor {
        ActionExecutor::new(
            store.clone(),
            Some(provider.clone() as Arc<dyn MailProvider>),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_mark_as_read_updates_store_and_provider() {
        let store = Arc::new(MemoryStore::with_messages(vec![create_test_message()]));
        let provider = Arc::new(RecordingProvider::default());
        let mut msg = create_test_message();

        let result = executor(&store, &provider)
            .apply(&[Action::MarkAsRead], &mut msg)
            .await;

        assert!(result.is_success());
        assert_eq!(result.actions[0].outcome, ActionOutcome::Applied { remote_ref: None });
        assert!(msg.is_read);
        assert!(store.get("m1").unwrap().is_read);
        assert_eq!(provider.calls(), vec![RemoteCall::Read("m1".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_mark_as_read_twice_is_idempotent() {
        let store = Arc::new(MemoryStore::with_messages(vec![create_test_message()]));
        let provider = Arc::new(RecordingProvider::default());
        let exec = executor(&store, &provider);
        let mut msg = create_test_message();

        exec.apply(&[Action::MarkAsRead], &mut msg).await;
        let second = exec.apply(&[Action::MarkAsRead], &mut msg).await;

        assert_eq!(second.actions[0].outcome, ActionOutcome::Unchanged);
        assert!(store.get("m1").unwrap().is_read);
        assert_eq!(store.update_count(), 1);
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_move_to_folder_records_remote_label_id() {
        let store = Arc::new(MemoryStore::with_messages(vec![create_test_message()]));
        let provider = Arc::new(RecordingProvider::default());
        let mut msg = create_test_message();

        let result = executor(&store, &provider)
            .apply(&[Action::MoveToFolder("Receipts".to_string())], &mut msg)
            .await;

        assert_eq!(
            result.actions[0].outcome,
            ActionOutcome::Applied {
                remote_ref: Some("Label_Receipts".to_string())
            }
        );
        assert!(msg.has_label("Receipts"));
        assert!(store.get("m1").unwrap().has_label("Receipts"));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_going() {
        let store = Arc::new(MemoryStore::with_messages(vec![create_test_message()]));
        let provider = Arc::new(RecordingProvider {
            failing_labels: HashSet::from(["Broken".to_string()]),
            ..RecordingProvider::default()
        });
        let mut msg = create_test_message();

        let result = executor(&store, &provider)
            .apply(
                &[
                    Action::MoveToFolder("First".to_string()),
                    Action::MoveToFolder("Broken".to_string()),
                    Action::MarkAsRead,
                ],
                &mut msg,
            )
            .await;

        assert_eq!(result.actions.len(), 3);
        assert!(matches!(result.actions[0].outcome, ActionOutcome::Applied { .. }));
        assert!(matches!(result.actions[1].outcome, ActionOutcome::RemoteFailed { .. }));
        assert!(matches!(result.actions[2].outcome, ActionOutcome::Applied { .. }));
        assert_eq!(result.failures().count(), 1);

        // the local half of the failed action is not rolled back
        let stored = store.get("m1").unwrap();
        assert!(stored.has_label("First"));
        assert!(stored.has_label("Broken"));
        assert!(stored.is_read);
    }

    #[tokio::test]
    async fn test_local_failure_skips_remote_call() {
        let store = Arc::new(MemoryStore::with_messages(vec![create_test_message()]));
        store.fail_for("m1");
        let provider = Arc::new(RecordingProvider::default());
        let mut msg = create_test_message();

        let result = executor(&store, &provider)
            .apply(&[Action::MarkAsRead], &mut msg)
            .await;

        assert!(matches!(result.actions[0].outcome, ActionOutcome::LocalFailed { .. }));
        assert!(!msg.is_read);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_local_state() {
        let store = Arc::new(MemoryStore::with_messages(vec![create_test_message()]));
        let provider = Arc::new(RecordingProvider {
            fail_read_state: true,
            ..RecordingProvider::default()
        });
        let mut msg = create_test_message();

        let result = executor(&store, &provider)
            .apply(&[Action::MarkAsRead], &mut msg)
            .await;

        assert!(matches!(result.actions[0].outcome, ActionOutcome::RemoteFailed { .. }));
        assert!(store.get("m1").unwrap().is_read);
    }

    #[tokio::test]
    async fn test_remote_failure_is_not_retried_on_later_runs() {
        let store = Arc::new(MemoryStore::with_messages(vec![create_test_message()]));
        let failing = Arc::new(RecordingProvider {
            fail_read_state: true,
            ..RecordingProvider::default()
        });
        let mut msg = create_test_message();
        executor(&store, &failing)
            .apply(&[Action::MarkAsRead], &mut msg)
            .await;

        // Next run: the stored copy is already read, so Gmail is not asked again.
        let healthy = Arc::new(RecordingProvider::default());
        let mut msg = store.get("m1").unwrap();
        let result = executor(&store, &healthy)
            .apply(&[Action::MarkAsRead], &mut msg)
            .await;

        assert_eq!(result.actions[0].outcome, ActionOutcome::Unchanged);
        assert!(healthy.calls().is_empty());
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let store = Arc::new(MemoryStore::with_messages(vec![create_test_message()]));
        let provider = Arc::new(RecordingProvider {
            delay: Some(Duration::from_secs(60)),
            ..RecordingProvider::default()
        });
        let exec = ActionExecutor::new(store.clone(), Some(provider), Duration::from_millis(20));
        let mut msg = create_test_message();

        let result = exec.apply(&[Action::MarkAsRead], &mut msg).await;

        match &result.actions[0].outcome {
            ActionOutcome::RemoteFailed { error } => assert!(error.contains("timed out")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reserved_label_is_skipped() {
        let store = Arc::new(MemoryStore::with_messages(vec![create_test_message()]));
        let provider = Arc::new(RecordingProvider::default());
        let mut msg = create_test_message();

        let result = executor(&store, &provider)
            .apply(&[Action::MoveToFolder("SPAM".to_string())], &mut msg)
            .await;

        assert!(matches!(result.actions[0].outcome, ActionOutcome::Skipped { .. }));
        assert_eq!(store.update_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = Arc::new(MemoryStore::with_messages(vec![create_test_message()]));
        let provider = Arc::new(RecordingProvider::default());
        let mut msg = create_test_message();

        let result = executor(&store, &provider)
            .dry_run(true)
            .apply(
                &[Action::MarkAsRead, Action::MoveToFolder("Later".to_string())],
                &mut msg,
            )
            .await;

        assert!(result
            .actions
            .iter()
            .all(|r| r.outcome == ActionOutcome::Planned));
        assert_eq!(store.update_count(), 0);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_local_only_mode() {
        let store = Arc::new(MemoryStore::with_messages(vec![create_test_message()]));
        let exec = ActionExecutor::new(store.clone(), None, Duration::from_secs(5));
        let mut msg = create_test_message();

        let result = exec.apply(&[Action::MarkAsRead], &mut msg).await;

        assert_eq!(result.actions[0].outcome, ActionOutcome::Applied { remote_ref: None });
        assert!(store.get("m1").unwrap().is_read);
    }
}
