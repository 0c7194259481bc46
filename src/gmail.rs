use crate::models;
use crate::store::MailProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_gmail1::Gmail;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Messages carrying any of these are never stored.
const IGNORED_LABELS: &[&str] = &["DRAFT", "TRASH", "SPAM"];

#[derive(Clone)]
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
    /// Label name -> label id, filled lazily.
    label_ids: Arc<Mutex<HashMap<String, String>>>,
}

impl GmailClient {
    pub fn new(hub: Gmail<HttpsConnector<HttpConnector>>) -> Self {
        Self {
            hub,
            label_ids: Arc::default(),
        }
    }

    pub async fn list_labels(&self) -> Result<Vec<models::Label>> {
        let (_, label_list) = self
            .hub
            .users()
            .labels_list("me")
            .doit()
            .await
            .context("Failed to list labels")?;

        let labels: Vec<models::Label> = label_list
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| models::Label {
                id: l.id.unwrap_or_default(),
                name: l.name.unwrap_or_default(),
                label_type: l.type_.unwrap_or_default(),
            })
            .collect();

        if let Ok(mut cache) = self.label_ids.lock() {
            for label in &labels {
                cache.insert(label.name.clone(), label.id.clone());
            }
        }

        Ok(labels)
    }

    pub async fn list_messages(
        &self,
        query: Option<&str>,
        max_results: u32,
        page_token: Option<String>,
    ) -> Result<(Vec<String>, Option<String>)> {
        let mut req = self
            .hub
            .users()
            .messages_list("me")
            .max_results(max_results);

        if let Some(q) = query {
            req = req.q(q);
        }

        if let Some(token) = &page_token {
            req = req.page_token(token);
        }

        let (_, message_list) = req.doit().await.context("Failed to list messages")?;

        let ids = message_list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        Ok((ids, message_list.next_page_token))
    }

    pub async fn get_message(&self, id: &str) -> Result<google_gmail1::api::Message> {
        let (_, msg) = self
            .hub
            .users()
            .messages_get("me", id)
            .format("full")
            .doit()
            .await
            .context(format!("Failed to get message {}", id))?;
        Ok(msg)
    }

    pub async fn mark_as_read(&self, id: &str) -> Result<()> {
        self.modify_labels(id, vec![], vec!["UNREAD".to_string()])
            .await
            .context("Failed to mark message as read")
    }

    pub async fn mark_as_unread(&self, id: &str) -> Result<()> {
        self.modify_labels(id, vec!["UNREAD".to_string()], vec![])
            .await
            .context("Failed to mark message as unread")
    }

    async fn modify_labels(&self, id: &str, add: Vec<String>, remove: Vec<String>) -> Result<()> {
        debug!(message_id = %id, ?add, ?remove, "Modifying labels");
        let req = google_gmail1::api::BatchModifyMessagesRequest {
            ids: Some(vec![id.to_string()]),
            add_label_ids: (!add.is_empty()).then_some(add),
            remove_label_ids: (!remove.is_empty()).then_some(remove),
        };
        self.hub
            .users()
            .messages_batch_modify(req, "me")
            .doit()
            .await?;
        Ok(())
    }

    /// Resolve a label name to its id, creating the label if Gmail has none.
    async fn resolve_label_id(&self, name: &str) -> Result<String> {
        let cached = self
            .label_ids
            .lock()
            .ok()
            .and_then(|cache| cache.get(name).cloned());
        if let Some(id) = cached {
            return Ok(id);
        }

        if let Some(label) = self.list_labels().await?.into_iter().find(|l| l.name == name) {
            return Ok(label.id);
        }

        debug!(label = %name, "Creating label");
        let (_, created) = self
            .hub
            .users()
            .labels_create(
                google_gmail1::api::Label {
                    name: Some(name.to_string()),
                    label_list_visibility: Some("labelShow".to_string()),
                    message_list_visibility: Some("show".to_string()),
                    ..Default::default()
                },
                "me",
            )
            .doit()
            .await
            .context(format!("Failed to create label {}", name))?;

        let id = created
            .id
            .ok_or_else(|| anyhow::anyhow!("Gmail returned label {} without an id", name))?;
        if let Ok(mut cache) = self.label_ids.lock() {
            cache.insert(name.to_string(), id.clone());
        }
        Ok(id)
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn apply_label(&self, message_id: &str, label: &str) -> Result<String> {
        let label_id = self.resolve_label_id(label).await?;
        self.modify_labels(message_id, vec![label_id.clone()], vec![])
            .await
            .context(format!("Failed to apply label {}", label))?;
        Ok(label_id)
    }

    async fn set_read_state(&self, message_id: &str, read: bool) -> Result<()> {
        if read {
            self.mark_as_read(message_id).await
        } else {
            self.mark_as_unread(message_id).await
        }
    }
}

/// Convert a Gmail message into the stored form.
///
/// Returns `None` for drafts, trash and spam. `label_names` maps label ids to
/// display names; unknown ids are kept as-is.
pub fn parse_message(
    msg: &google_gmail1::api::Message,
    account: &str,
    label_names: &HashMap<String, String>,
) -> Option<models::Message> {
    let label_ids = msg.label_ids.clone().unwrap_or_default();
    if label_ids.iter().any(|l| IGNORED_LABELS.contains(&l.as_str())) {
        return None;
    }

    let mut from = None;
    let mut recipients = Vec::new();
    let mut subject = None;

    if let Some(payload) = &msg.payload {
        if let Some(headers) = &payload.headers {
            for header in headers {
                let value = header.value.as_deref().unwrap_or("");
                match header.name.as_deref().map(str::to_ascii_lowercase).as_deref() {
                    Some("from") => from = extract_addresses(value).into_iter().next(),
                    Some("to") | Some("cc") => recipients.extend(extract_addresses(value)),
                    Some("subject") => subject = header.value.clone(),
                    _ => {}
                }
            }
        }
    }

    let internal_date = msg.internal_date.unwrap_or(0);
    let is_sent = label_ids.iter().any(|l| l == "SENT");

    Some(models::Message {
        id: msg.id.clone().unwrap_or_default(),
        thread_id: msg.thread_id.clone().unwrap_or_default(),
        account: account.to_string(),
        from_address: from,
        to_address: (!recipients.is_empty()).then(|| recipients.join(", ")),
        subject,
        body: msg
            .payload
            .as_ref()
            .and_then(|p| extract_text_body(p, "text/plain")),
        internal_date,
        received_at: if is_sent {
            None
        } else {
            DateTime::<Utc>::from_timestamp_millis(internal_date)
        },
        is_read: !label_ids.iter().any(|l| l == "UNREAD"),
        labels: label_ids
            .iter()
            .filter(|l| *l != "UNREAD")
            .map(|l| label_names.get(l).cloned().unwrap_or_else(|| l.clone()))
            .collect(),
    })
}

/// Bare, lowercased addresses from an address list header.
fn extract_addresses(header: &str) -> Vec<String> {
    if header.contains('<') {
        header
            .split('<')
            .skip(1)
            .filter_map(|part| part.split_once('>').map(|(addr, _)| addr))
            .map(|addr| addr.trim().to_lowercase())
            .filter(|addr| !addr.is_empty())
            .collect()
    } else {
        header
            .split(',')
            .map(|addr| addr.trim().to_lowercase())
            .filter(|addr| !addr.is_empty())
            .collect()
    }
}

fn extract_text_body(part: &google_gmail1::api::MessagePart, mime_type: &str) -> Option<String> {
    if let Some(mime) = &part.mime_type {
        if mime == mime_type {
            if let Some(body) = &part.body {
                if let Some(data) = &body.data {
                    use base64::{Engine as _, engine::general_purpose};
                    let data_str = String::from_utf8_lossy(data);

                    // Gmail sends base64url, but the client may already have decoded it
                    let decoded = general_purpose::URL_SAFE_NO_PAD
                        .decode(data_str.trim())
                        .or_else(|_| general_purpose::URL_SAFE.decode(data_str.trim()))
                        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(data_str.trim()))
                        .or_else(|_| general_purpose::STANDARD.decode(data_str.trim()));

                    return match decoded {
                        Ok(bytes) => String::from_utf8(bytes).ok(),
                        Err(_) => String::from_utf8(data.clone()).ok(),
                    };
                }
            }
        }
    }

    if let Some(parts) = &part.parts {
        let mut full_body = String::new();
        for p in parts {
            if let Some(body) = extract_text_body(p, mime_type) {
                full_body.push_str(&body);
            }
        }
        if !full_body.is_empty() {
            return Some(full_body);
        }
    }

    None
}
