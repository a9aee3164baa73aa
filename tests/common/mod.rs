#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mailsweep::classifier::{Classification, Classifier, resolve_category};
use mailsweep::db::Database;
use mailsweep::error::{Error, Result};
use mailsweep::mailbox::MailboxReader;
use mailsweep::models::{Category, MailAccount, RawMessage};

pub async fn test_db() -> Database {
    let db = Database::new("sqlite::memory:").await.unwrap();
    db.run_migrations().await.unwrap();
    db
}

pub async fn seed_user_account(db: &Database) -> (i64, i64) {
    let user = db.create_user("u@example.com", Some("Test User")).await.unwrap();
    let account = db
        .link_account(user, "u@example.com", "token-cache.json", true)
        .await
        .unwrap();
    (user, account)
}

pub fn raw_message(remote_id: &str, subject: &str, body: &str) -> RawMessage {
    RawMessage {
        remote_id: remote_id.to_string(),
        subject: subject.to_string(),
        sender: "sender@example.com".to_string(),
        body_text: body.to_string(),
        body_html: None,
        list_unsubscribe: None,
        received_at: Utc::now(),
    }
}

/// In-memory mailbox: a default message list for any account, optional
/// per-account overrides, and accounts that fail to list.
pub struct MockReader {
    default: Vec<RawMessage>,
    per_account: HashMap<i64, Vec<RawMessage>>,
    failing_accounts: HashSet<i64>,
    pub list_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl MockReader {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            default: messages,
            per_account: HashMap::new(),
            failing_accounts: HashSet::new(),
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_account(mut self, account_id: i64, messages: Vec<RawMessage>) -> Self {
        self.per_account.insert(account_id, messages);
        self
    }

    pub fn with_failing_account(mut self, account_id: i64) -> Self {
        self.failing_accounts.insert(account_id);
        self
    }

    fn messages_for(&self, account: &MailAccount) -> &[RawMessage] {
        self.per_account
            .get(&account.id)
            .map(Vec::as_slice)
            .unwrap_or(&self.default)
    }
}

#[async_trait]
impl MailboxReader for MockReader {
    async fn list_unread_ids(&self, account: &MailAccount, max: u32) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_accounts.contains(&account.id) {
            return Err(Error::TransientFetch("mailbox unreachable".into()));
        }
        Ok(self
            .messages_for(account)
            .iter()
            .take(max as usize)
            .map(|m| m.remote_id.clone())
            .collect())
    }

    async fn fetch(&self, account: &MailAccount, remote_id: &str) -> Result<RawMessage> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.messages_for(account)
            .iter()
            .find(|m| m.remote_id == remote_id)
            .cloned()
            .ok_or_else(|| Error::TransientFetch(format!("no message {}", remote_id)))
    }
}

/// Scripted oracle: answers with a fixed category name (validated against
/// the supplied set, like the real adapter), fails, or stalls first.
pub enum OracleScript {
    Name(&'static str),
    Fail,
    SlowName(Duration, &'static str),
}

pub struct MockClassifier {
    script: OracleScript,
    pub calls: AtomicUsize,
}

impl MockClassifier {
    pub fn new(script: OracleScript) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(
        &self,
        message: &RawMessage,
        categories: &[Category],
    ) -> Result<Classification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = match &self.script {
            OracleScript::Fail => {
                return Err(Error::ClassificationFormat("scripted failure".into()));
            }
            OracleScript::Name(name) => name,
            OracleScript::SlowName(delay, name) => {
                tokio::time::sleep(*delay).await;
                name
            }
        };
        resolve_category(name, categories)
            .map(|c| Classification {
                category_id: c.id,
                summary: format!("Summary of {}", message.subject),
            })
            .ok_or_else(|| Error::ClassificationFormat(format!("unknown category '{}'", name)))
    }
}
