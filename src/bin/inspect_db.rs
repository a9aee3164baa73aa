use sqlx::Row;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <search_query>", args[0]);
        eprintln!("Search query matches against sender or subject.");
        std::process::exit(1);
    }

    let query = &args[1];
    let search_term = format!("%{}%", query);

    let database_url = "sqlite://mailsweep.db";
    let pool = SqlitePoolOptions::new()
        .connect(database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let rows = sqlx::query(
        "SELECT m.id, m.sender, m.subject, m.summary, m.processed, c.name
         FROM messages m
         LEFT JOIN categories c ON c.id = m.category_id
         WHERE m.sender LIKE ? OR m.subject LIKE ?
         ORDER BY m.received_at DESC
         LIMIT 10",
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
        let id: i64 = row.get(0);
        let sender: String = row.get(1);
        let subject: String = row.get(2);
        let summary: Option<String> = row.get(3);
        let processed: bool = row.get(4);
        let category: Option<String> = row.get(5);

        println!(
            "--------------------------------------------------------------------------------"
        );
        println!("ID: {}", id);
        println!("From: {}", sender);
        println!("Subject: {}", subject);
        println!("Category: {}", category.as_deref().unwrap_or("(none)"));
        println!("Processed: {}", processed);
        println!("Summary: {}", summary.as_deref().unwrap_or("(none)"));

        let attempts =
            sqlx::query("SELECT mechanism, success, reason FROM unsubscribe_attempts WHERE message_id = ? ORDER BY id")
                .bind(id)
                .fetch_all(&pool)
                .await?;
        for attempt in attempts {
            let mechanism: Option<String> = attempt.get(0);
            let success: bool = attempt.get(1);
            let reason: String = attempt.get(2);
            println!(
                "Unsubscribe attempt: mechanism={} success={} reason={}",
                mechanism.as_deref().unwrap_or("(none)"),
                success,
                reason
            );
        }
    }

    Ok(())
}
