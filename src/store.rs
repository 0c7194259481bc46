//! Collaborator interfaces used by the rule engine.
//!
//! The engine never talks to SQLite or Gmail directly: it reads and writes
//! messages through a [`MessageStore`] and mirrors changes remotely through a
//! [`MailProvider`].

use crate::models::Message;
use anyhow::Result;
use async_trait::async_trait;

/// Which persisted messages a run should consider.
#[derive(Debug, Clone, Default)]
pub struct MessageSelector {
    /// Only messages synced for this account.
    pub account: Option<String>,
    /// Only messages carrying this label name.
    pub label: Option<String>,
    pub limit: Option<i64>,
}

impl MessageSelector {
    pub fn for_account(account: &str) -> Self {
        Self {
            account: Some(account.to_string()),
            ..Self::default()
        }
    }
}

/// A single field change applied to a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageUpdate {
    SetRead(bool),
    AddLabel(String),
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn fetch(&self, selector: &MessageSelector) -> Result<Vec<Message>>;
    async fn update(&self, message_id: &str, update: &MessageUpdate) -> Result<()>;
}

#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Attach `label` to the remote message, returning the provider's label id.
    async fn apply_label(&self, message_id: &str, label: &str) -> Result<String>;
    async fn set_read_state(&self, message_id: &str, read: bool) -> Result<()>;
}
