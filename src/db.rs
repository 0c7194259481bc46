use crate::models;
use crate::store::{MessageSelector, MessageStore, MessageUpdate};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

const LABEL_SEPARATOR: char = '\u{1f}';

const MESSAGE_COLUMNS: &str = "m.id, m.thread_id, m.account, m.from_address, m.to_address, m.subject, m.body, \
     m.internal_date, m.received_at, m.is_read, GROUP_CONCAT(ml.label, char(31)) AS labels";

/// Per-account sync bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub email: String,
    pub mail_count: i64,
    pub latest_fetched_date: Option<i64>,
    pub initial_sync_done: bool,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");
        sqlx::query(schema).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn ensure_account(&self, email: &str, name: &str) -> Result<AccountState> {
        sqlx::query("INSERT OR IGNORE INTO accounts (email, name) VALUES (?, ?)")
            .bind(email)
            .bind(name)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query(
            "SELECT email, mail_count, latest_fetched_date, initial_sync_done FROM accounts WHERE email = ?",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(AccountState {
            email: row.get(0),
            mail_count: row.get(1),
            latest_fetched_date: row.get(2),
            initial_sync_done: row.get(3),
        })
    }

    /// Record the outcome of a sync pass for `email`.
    pub async fn record_sync(
        &self,
        email: &str,
        new_messages: i64,
        latest_fetched_date: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET mail_count = mail_count + ?, last_synced = ?, \
             latest_fetched_date = CASE WHEN ? IS NULL THEN latest_fetched_date \
                 ELSE MAX(COALESCE(latest_fetched_date, 0), ?) END, \
             initial_sync_done = 1 \
             WHERE email = ?",
        )
        .bind(new_messages)
        .bind(Utc::now().timestamp_millis())
        .bind(latest_fetched_date)
        .bind(latest_fetched_date)
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn message_exists(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Store a freshly fetched message. Existing messages are left untouched.
    pub async fn insert_message(&self, msg: &models::Message) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO messages (id, account, thread_id, from_address, to_address, subject, body, internal_date, received_at, is_read)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.account)
        .bind(&msg.thread_id)
        .bind(&msg.from_address)
        .bind(&msg.to_address)
        .bind(&msg.subject)
        .bind(&msg.body)
        .bind(msg.internal_date)
        .bind(msg.received_at.map(|t| t.timestamp_millis()))
        .bind(msg.is_read)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            for label in &msg.labels {
                sqlx::query("INSERT OR IGNORE INTO message_labels (message_id, label) VALUES (?, ?)")
                    .bind(&msg.id)
                    .bind(label)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn get_messages(&self, selector: &MessageSelector) -> Result<Vec<models::Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages m
             LEFT JOIN message_labels ml ON m.id = ml.message_id
             WHERE (? IS NULL OR m.account = ?)
               AND (? IS NULL OR EXISTS (SELECT 1 FROM message_labels l WHERE l.message_id = m.id AND l.label = ?))
             GROUP BY m.id
             ORDER BY m.internal_date DESC
             LIMIT ?"
        );

        let rows = sqlx::query(&sql)
            .bind(&selector.account)
            .bind(&selector.account)
            .bind(&selector.label)
            .bind(&selector.label)
            .bind(selector.limit.unwrap_or(-1))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(message_from_row).collect())
    }

    #[cfg(test)]
    pub async fn get_message(&self, id: &str) -> Result<Option<models::Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages m
             LEFT JOIN message_labels ml ON m.id = ml.message_id
             WHERE m.id = ?
             GROUP BY m.id"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(message_from_row))
    }

    pub async fn mark_message_as_read(&self, id: &str, is_read: bool) -> Result<()> {
        let result = sqlx::query("UPDATE messages SET is_read = ? WHERE id = ?")
            .bind(is_read)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("Message {} not found", id);
        }
        Ok(())
    }

    pub async fn add_label_to_message(&self, message_id: &str, label: &str) -> Result<()> {
        if !self.message_exists(message_id).await? {
            bail!("Message {} not found", message_id);
        }
        sqlx::query("INSERT OR IGNORE INTO message_labels (message_id, label) VALUES (?, ?)")
            .bind(message_id)
            .bind(label)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn message_from_row(row: &SqliteRow) -> models::Message {
    let labels: Option<String> = row.get(10);
    let received_at: Option<i64> = row.get(8);
    models::Message {
        id: row.get(0),
        thread_id: row.get(1),
        account: row.get(2),
        from_address: row.get(3),
        to_address: row.get(4),
        subject: row.get(5),
        body: row.get(6),
        internal_date: row.get(7),
        received_at: received_at.and_then(DateTime::<Utc>::from_timestamp_millis),
        is_read: row.get(9),
        labels: labels
            .map(|l| l.split(LABEL_SEPARATOR).map(str::to_string).collect())
            .unwrap_or_default(),
    }
}

#[async_trait]
impl MessageStore for Database {
    async fn fetch(&self, selector: &MessageSelector) -> Result<Vec<models::Message>> {
        self.get_messages(selector).await
    }

    async fn update(&self, message_id: &str, update: &MessageUpdate) -> Result<()> {
        match update {
            MessageUpdate::SetRead(read) => self.mark_message_as_read(message_id, *read).await,
            MessageUpdate::AddLabel(label) => self.add_label_to_message(message_id, label).await,
        }
    }
}
