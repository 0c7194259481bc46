use crate::db::Database;
use crate::gmail::{GmailClient, parse_message};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub listed: usize,
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Pull new mail for `account` into the local database.
///
/// The first sync pages through the whole mailbox. Later syncs only ask for
/// mail received on or after the day of the newest stored message.
pub async fn update_mails(
    client: &GmailClient,
    db: &Database,
    account: &str,
    page_size: u32,
) -> Result<SyncReport> {
    let state = db.ensure_account(account, account).await?;

    let label_names: HashMap<String, String> = client
        .list_labels()
        .await?
        .into_iter()
        .map(|l| (l.id, l.name))
        .collect();

    let query = if state.initial_sync_done {
        state.latest_fetched_date.and_then(after_query)
    } else {
        None
    };
    info!(account, query = query.as_deref().unwrap_or("<all>"), "Syncing mailbox");

    let mut report = SyncReport::default();
    let mut newest: Option<i64> = None;
    let mut page_token = None;

    loop {
        let (ids, next_page_token) = client
            .list_messages(query.as_deref(), page_size, page_token)
            .await?;
        report.listed += ids.len();

        for id in &ids {
            if db.message_exists(id).await? {
                continue;
            }

            let raw = match client.get_message(id).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(message_id = %id, error = %e, "Skipping message that could not be fetched");
                    report.failed += 1;
                    continue;
                }
            };

            let Some(message) = parse_message(&raw, account, &label_names) else {
                debug!(message_id = %id, "Ignoring draft, trash or spam");
                report.skipped += 1;
                continue;
            };

            newest = newest.max(Some(message.internal_date));
            if db.insert_message(&message).await? {
                report.stored += 1;
            }
        }

        debug!(page = ids.len(), stored = report.stored, "Processed page");

        match next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    db.record_sync(account, report.stored as i64, newest).await?;
    info!(
        account,
        listed = report.listed,
        stored = report.stored,
        skipped = report.skipped,
        failed = report.failed,
        "Sync finished"
    );

    Ok(report)
}

/// Gmail search query for mail after the day of `latest_ms`.
fn after_query(latest_ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(latest_ms)
        .map(|date| format!("after:{}", date.format("%Y/%m/%d")))
}
