use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the guaranteed fallback category. Exactly one category per
/// user carries this name; it cannot be deleted.
pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A linked mailbox account. `credentials` is an opaque handle managed by
/// the external credential layer (for Gmail: the token-cache path).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MailAccount {
    pub id: i64,
    pub user_id: i64,
    pub email: String,
    pub credentials: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn is_uncategorized(&self) -> bool {
        self.name.eq_ignore_ascii_case(UNCATEGORIZED)
    }
}

/// A message as fetched from the provider, before it is stored.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub remote_id: String,
    pub subject: String,
    pub sender: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub list_unsubscribe: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl Default for RawMessage {
    fn default() -> Self {
        Self {
            remote_id: String::new(),
            subject: String::new(),
            sender: String::new(),
            body_text: String::new(),
            body_html: None,
            list_unsubscribe: None,
            received_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// A stored message. `category_id` and `summary` are null until the
/// message is classified; the single category reference enforces
/// one-category membership. Once `processed` is set the row is never
/// re-classified.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredMessage {
    pub id: i64,
    pub account_id: i64,
    pub remote_id: String,
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub body_html: Option<String>,
    pub list_unsubscribe: Option<String>,
    pub category_id: Option<i64>,
    pub summary: Option<String>,
    pub processed: bool,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Record of one ingestion run for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRun {
    pub id: i64,
    pub user_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub account_ids: Vec<i64>,
    pub fetched: i64,
    pub classified: i64,
    pub errors: Vec<String>,
}

/// One recorded unsubscribe attempt. `message_id` is the id as requested
/// by the caller and may not reference an existing message.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UnsubscribeAttempt {
    pub id: i64,
    pub message_id: i64,
    pub mechanism: Option<String>,
    pub success: bool,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}
