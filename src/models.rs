use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub label_type: String, // 'system' or 'user'
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub account: String,
    pub from_address: Option<String>,
    /// Every To/Cc recipient, comma separated.
    pub to_address: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub internal_date: i64,
    /// None for mail we sent ourselves.
    pub received_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub labels: Vec<String>,
}

impl Message {
    pub fn recipients(&self) -> Vec<&str> {
        match self.to_address.as_deref() {
            Some(to) if !to.trim().is_empty() => to.split(',').map(str::trim).collect(),
            _ => vec![""],
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}
