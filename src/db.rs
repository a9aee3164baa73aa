use crate::error::{Error, Result};
use crate::models::{
    self, Category, MailAccount, ProcessingRun, RawMessage, StoredMessage, UnsubscribeAttempt, User,
};
use chrono::Utc;
use sqlx::{Row, sqlite::SqlitePool};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| Error::Config(format!("bad database url: {}", e)))?
            .create_if_missing(true);

        // A single persistent connection: SQLite serializes writers
        // anyway, and an in-memory database lives exactly as long as its
        // connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
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

    // --- users and accounts ---

    pub async fn create_user(&self, email: &str, name: Option<&str>) -> Result<i64> {
        let result = sqlx::query("INSERT INTO users (email, name, created_at) VALUES (?, ?, ?)")
            .bind(email)
            .bind(name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn link_account(
        &self,
        user_id: i64,
        email: &str,
        credentials: &str,
        is_primary: bool,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO accounts (user_id, email, credentials, is_primary, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(email)
        .bind(credentials)
        .bind(is_primary)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Users with at least one linked account, the scheduler's working set.
    pub async fn users_with_accounts(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT DISTINCT u.id, u.email, u.name, u.created_at
             FROM users u JOIN accounts a ON a.user_id = u.id
             ORDER BY u.id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| User {
                id: row.get(0),
                email: row.get(1),
                name: row.get(2),
                created_at: row.get(3),
            })
            .collect())
    }

    pub async fn accounts_for_user(&self, user_id: i64) -> Result<Vec<MailAccount>> {
        let rows = sqlx::query(
            "SELECT id, user_id, email, credentials, is_primary, created_at
             FROM accounts WHERE user_id = ? ORDER BY is_primary DESC, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| MailAccount {
                id: row.get(0),
                user_id: row.get(1),
                email: row.get(2),
                credentials: row.get(3),
                is_primary: row.get(4),
                created_at: row.get(5),
            })
            .collect())
    }

    // --- category store ---

    pub async fn create_category(
        &self,
        user_id: i64,
        name: &str,
        description: &str,
    ) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Config("category name must not be empty".into()));
        }

        let existing =
            sqlx::query("SELECT 1 FROM categories WHERE user_id = ? AND name = ? COLLATE NOCASE")
                .bind(user_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(Error::Config(format!("category '{}' already exists", name)));
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO categories (user_id, name, description, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(name)
        .bind(description)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Category {
            id: result.last_insert_rowid(),
            user_id,
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
        })
    }

    /// The user's categories in creation order. The fallback category is
    /// created on first use, so the returned set always contains it after
    /// one call to [`ensure_uncategorized`](Self::ensure_uncategorized).
    pub async fn categories_for_user(&self, user_id: i64) -> Result<Vec<Category>> {
        let rows = sqlx::query(
            "SELECT id, user_id, name, description, created_at
             FROM categories WHERE user_id = ? ORDER BY created_at, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(category_from_row).collect())
    }

    /// Get or create the user's "Uncategorized" category.
    pub async fn ensure_uncategorized(&self, user_id: i64) -> Result<i64> {
        let row =
            sqlx::query("SELECT id FROM categories WHERE user_id = ? AND name = ? COLLATE NOCASE")
                .bind(user_id)
                .bind(models::UNCATEGORIZED)
                .fetch_optional(&self.pool)
                .await?;

        if let Some(row) = row {
            return Ok(row.get(0));
        }

        let created = self
            .create_category(
                user_id,
                models::UNCATEGORIZED,
                "Messages that don't match any specific category",
            )
            .await?;
        Ok(created.id)
    }

    /// Delete a category, reassigning its messages to the fallback.
    /// The fallback category itself cannot be deleted.
    pub async fn delete_category(&self, category_id: i64) -> Result<()> {
        let row = sqlx::query("SELECT user_id, name FROM categories WHERE id = ?")
            .bind(category_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(Error::Config(format!("no category {}", category_id)));
        };
        let user_id: i64 = row.get(0);
        let name: String = row.get(1);
        if name.eq_ignore_ascii_case(models::UNCATEGORIZED) {
            return Err(Error::Config(
                "the Uncategorized category cannot be deleted".into(),
            ));
        }

        let fallback = self.ensure_uncategorized(user_id).await?;
        sqlx::query("UPDATE messages SET category_id = ? WHERE category_id = ?")
            .bind(fallback)
            .bind(category_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(category_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- dedup ledger ---

    pub async fn ledger_contains(&self, account_id: i64, remote_id: &str) -> Result<bool> {
        let row =
            sqlx::query("SELECT 1 FROM processed_messages WHERE account_id = ? AND remote_id = ?")
                .bind(account_id)
                .bind(remote_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn ledger_insert_many(&self, account_id: i64, remote_ids: &[String]) -> Result<()> {
        for remote_id in remote_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO processed_messages (account_id, remote_id, processed_at)
                 VALUES (?, ?, ?)",
            )
            .bind(account_id)
            .bind(remote_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    // --- messages ---

    /// Upsert keyed on (account_id, remote_id): a row left behind by an
    /// interrupted batch is refreshed rather than rejected. Classification
    /// columns are never touched here.
    pub async fn insert_message(&self, account_id: i64, raw: &RawMessage) -> Result<i64> {
        sqlx::query(
            "INSERT INTO messages (account_id, remote_id, subject, sender, body, body_html,
                                   list_unsubscribe, received_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(account_id, remote_id) DO UPDATE SET subject=excluded.subject,
             sender=excluded.sender, body=excluded.body, body_html=excluded.body_html,
             list_unsubscribe=excluded.list_unsubscribe, received_at=excluded.received_at",
        )
        .bind(account_id)
        .bind(&raw.remote_id)
        .bind(&raw.subject)
        .bind(&raw.sender)
        .bind(&raw.body_text)
        .bind(&raw.body_html)
        .bind(&raw.list_unsubscribe)
        .bind(raw.received_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id FROM messages WHERE account_id = ? AND remote_id = ?")
            .bind(account_id)
            .bind(&raw.remote_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }

    /// Record the classification outcome. The `processed = 0` guard makes
    /// the mutation one-shot: a processed message is never re-classified.
    pub async fn set_classification(
        &self,
        message_id: i64,
        category_id: i64,
        summary: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE messages SET category_id = ?, summary = ?, processed = 1
             WHERE id = ? AND processed = 0",
        )
        .bind(category_id)
        .bind(summary)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_message(&self, message_id: i64) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(
            "SELECT id, account_id, remote_id, subject, sender, body, body_html,
                    list_unsubscribe, category_id, summary, processed, received_at, created_at
             FROM messages WHERE id = ?",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(message_from_row))
    }

    pub async fn messages_in_category(&self, category_id: i64) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, account_id, remote_id, subject, sender, body, body_html,
                    list_unsubscribe, category_id, summary, processed, received_at, created_at
             FROM messages WHERE category_id = ? ORDER BY received_at DESC, id DESC",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(message_from_row).collect())
    }

    /// Delete message rows. Ledger entries for their remote ids persist,
    /// so deleted messages are never re-ingested.
    pub async fn delete_messages(&self, message_ids: &[i64]) -> Result<u64> {
        let mut deleted = 0;
        for id in message_ids {
            let result = sqlx::query("DELETE FROM messages WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    // --- processing runs ---

    pub async fn create_run(&self, user_id: i64, account_ids: &[i64]) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO runs (user_id, started_at, account_ids) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(Utc::now())
        .bind(serde_json::to_string(account_ids).unwrap_or_else(|_| "[]".into()))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn finish_run(
        &self,
        run_id: i64,
        fetched: i64,
        classified: i64,
        errors: &[String],
    ) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET finished_at = ?, fetched = ?, classified = ?, errors = ?
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(fetched)
        .bind(classified)
        .bind(serde_json::to_string(errors).unwrap_or_else(|_| "[]".into()))
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: i64) -> Result<Option<ProcessingRun>> {
        let row = sqlx::query(
            "SELECT id, user_id, started_at, finished_at, account_ids, fetched, classified, errors
             FROM runs WHERE id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let account_ids: String = row.get(4);
            let errors: String = row.get(7);
            ProcessingRun {
                id: row.get(0),
                user_id: row.get(1),
                started_at: row.get(2),
                finished_at: row.get(3),
                account_ids: serde_json::from_str(&account_ids).unwrap_or_default(),
                fetched: row.get(5),
                classified: row.get(6),
                errors: serde_json::from_str(&errors).unwrap_or_default(),
            }
        }))
    }

    // --- unsubscribe attempts ---

    pub async fn record_attempt(
        &self,
        message_id: i64,
        mechanism: Option<&str>,
        success: bool,
        reason: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO unsubscribe_attempts (message_id, mechanism, success, reason, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(mechanism)
        .bind(success)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn attempts_for_message(&self, message_id: i64) -> Result<Vec<UnsubscribeAttempt>> {
        let rows = sqlx::query(
            "SELECT id, message_id, mechanism, success, reason, created_at
             FROM unsubscribe_attempts WHERE message_id = ? ORDER BY id",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| UnsubscribeAttempt {
                id: row.get(0),
                message_id: row.get(1),
                mechanism: row.get(2),
                success: row.get(3),
                reason: row.get(4),
                created_at: row.get(5),
            })
            .collect())
    }
}

fn category_from_row(row: sqlx::sqlite::SqliteRow) -> Category {
    Category {
        id: row.get(0),
        user_id: row.get(1),
        name: row.get(2),
        description: row.get(3),
        created_at: row.get(4),
    }
}

fn message_from_row(row: sqlx::sqlite::SqliteRow) -> StoredMessage {
    StoredMessage {
        id: row.get(0),
        account_id: row.get(1),
        remote_id: row.get(2),
        subject: row.get(3),
        sender: row.get(4),
        body: row.get(5),
        body_html: row.get(6),
        list_unsubscribe: row.get(7),
        category_id: row.get(8),
        summary: row.get(9),
        processed: row.get(10),
        received_at: row.get(11),
        created_at: row.get(12),
    }
}
