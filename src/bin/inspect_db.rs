use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <search_query> [database_url]", args[0]);
        eprintln!("Search query matches against Sender or Subject.");
        std::process::exit(1);
    }

    let query = &args[1];
    let search_term = format!("%{}%", query);
    let database_url = args
        .get(2)
        .map(String::as_str)
        .unwrap_or("sqlite://gmail_rules.db");

    let pool = SqlitePoolOptions::new()
        .connect(database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let rows = sqlx::query(
        "SELECT m.id, m.account, m.from_address, m.to_address, m.subject, m.received_at, m.is_read, \
                GROUP_CONCAT(ml.label, ', ') AS labels
         FROM messages m
         LEFT JOIN message_labels ml ON ml.message_id = m.id
         WHERE m.from_address LIKE ? OR m.subject LIKE ?
         GROUP BY m.id
         ORDER BY m.internal_date DESC
         LIMIT 20",
    )
    .bind(&search_term)
    .bind(&search_term)
    .fetch_all(&pool)
    .await?;

    if rows.is_empty() {
        println!("No messages found matching '{}'", query);
        return Ok(());
    }

    for row in rows {
        let received: Option<i64> = row.get("received_at");
        let received = received
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "(sent)".to_string());
        let is_read: bool = row.get("is_read");
        let labels: Option<String> = row.get("labels");

        println!("ID:       {}", row.get::<String, _>("id"));
        println!("Account:  {}", row.get::<String, _>("account"));
        println!("From:     {:?}", row.get::<Option<String>, _>("from_address"));
        println!("To:       {:?}", row.get::<Option<String>, _>("to_address"));
        println!("Subject:  {:?}", row.get::<Option<String>, _>("subject"));
        println!("Received: {}", received);
        println!("Read:     {}", if is_read { "yes" } else { "no" });
        println!("Labels:   {}", labels.unwrap_or_default());
        println!(
            "--------------------------------------------------------------------------------"
        );
    }

    Ok(())
}
