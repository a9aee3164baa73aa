use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::classifier::{Classifier, truncate_chars};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::mailbox::MailboxReader;
use crate::models::MailAccount;

/// Messages ingested per account per run.
pub const BATCH_SIZE: usize = 10;

/// Unread ids listed per account before ledger filtering. Wider than the
/// batch because already processed messages stay unread at the provider.
const LIST_WINDOW: u32 = (BATCH_SIZE * 4) as u32;

/// Bound on the body-prefix summary substituted when classification fails.
pub const FALLBACK_SUMMARY_LIMIT: usize = 200;

enum Begin {
    InFlight(i64),
    Started { run_id: i64, accounts: Vec<MailAccount> },
}

#[derive(Default)]
struct AccountStats {
    fetched: i64,
    classified: i64,
    errors: Vec<String>,
}

/// Coordinates reader, ledger, classifier and store for one user's runs.
/// At most one run per user is in flight: a trigger during an active run
/// returns that run's id instead of starting a duplicate. Runs for
/// distinct users proceed independently.
#[derive(Clone)]
pub struct IngestionService {
    db: Database,
    reader: Arc<dyn MailboxReader>,
    classifier: Arc<dyn Classifier>,
    active: Arc<tokio::sync::Mutex<HashMap<i64, i64>>>,
    fetch_timeout: Duration,
    classify_timeout: Duration,
}

impl IngestionService {
    pub fn new(
        db: Database,
        reader: Arc<dyn MailboxReader>,
        classifier: Arc<dyn Classifier>,
        fetch_timeout: Duration,
        classify_timeout: Duration,
    ) -> Self {
        Self {
            db,
            reader,
            classifier,
            active: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            fetch_timeout,
            classify_timeout,
        }
    }

    /// Register a run for the user, or report the one already in flight.
    /// The registry lock is held across run-row creation so concurrent
    /// triggers cannot both start.
    async fn begin(&self, user_id: i64) -> Result<Begin> {
        let mut active = self.active.lock().await;
        if let Some(&run_id) = active.get(&user_id) {
            return Ok(Begin::InFlight(run_id));
        }

        let accounts = self.db.accounts_for_user(user_id).await?;
        let account_ids: Vec<i64> = accounts.iter().map(|a| a.id).collect();
        let run_id = self.db.create_run(user_id, &account_ids).await?;
        active.insert(user_id, run_id);
        Ok(Begin::Started { run_id, accounts })
    }

    /// On-demand trigger. Returns the run id immediately; the batch runs
    /// in a spawned task.
    pub async fn trigger(&self, user_id: i64) -> Result<i64> {
        match self.begin(user_id).await? {
            Begin::InFlight(run_id) => {
                info!(user_id, run_id, "Ingestion already running");
                Ok(run_id)
            }
            Begin::Started { run_id, accounts } => {
                let service = self.clone();
                tokio::spawn(async move {
                    service.process_run(user_id, run_id, accounts).await;
                });
                Ok(run_id)
            }
        }
    }

    /// Trigger semantics, but awaits the batch before returning.
    pub async fn run_to_completion(&self, user_id: i64) -> Result<i64> {
        match self.begin(user_id).await? {
            Begin::InFlight(run_id) => Ok(run_id),
            Begin::Started { run_id, accounts } => {
                self.process_run(user_id, run_id, accounts).await;
                Ok(run_id)
            }
        }
    }

    async fn process_run(&self, user_id: i64, run_id: i64, accounts: Vec<MailAccount>) {
        info!(user_id, run_id, accounts = accounts.len(), "Ingestion run started");
        let mut fetched = 0i64;
        let mut classified = 0i64;
        let mut errors = Vec::new();

        match self.db.ensure_uncategorized(user_id).await {
            Ok(fallback) => {
                for account in &accounts {
                    match self.process_account(account, fallback).await {
                        Ok(stats) => {
                            fetched += stats.fetched;
                            classified += stats.classified;
                            errors.extend(stats.errors);
                        }
                        Err(e) => {
                            // One unreachable account never aborts the rest.
                            warn!(account = %account.email, error = %e, "Account skipped");
                            errors.push(format!("account {}: {}", account.email, e));
                        }
                    }
                }
            }
            Err(e) => {
                error!(user_id, error = %e, "No fallback category available");
                errors.push(format!("fallback category: {}", e));
            }
        }

        if let Err(e) = self.db.finish_run(run_id, fetched, classified, &errors).await {
            error!(run_id, error = %e, "Failed to finalize run record");
        }
        self.active.lock().await.remove(&user_id);
        info!(
            user_id,
            run_id,
            fetched,
            classified,
            errors = errors.len(),
            "Ingestion run finished"
        );
    }

    async fn process_account(
        &self,
        account: &MailAccount,
        fallback_category: i64,
    ) -> Result<AccountStats> {
        let mut stats = AccountStats::default();

        let ids = timeout(
            self.fetch_timeout,
            self.reader.list_unread_ids(account, LIST_WINDOW),
        )
        .await
        .map_err(|_| Error::TransientFetch("unread listing timed out".into()))??;

        // Up to BATCH_SIZE ids not already in the ledger, provider order
        // preserved.
        let mut batch = Vec::new();
        for remote_id in ids {
            if batch.len() >= BATCH_SIZE {
                break;
            }
            if !self.db.ledger_contains(account.id, &remote_id).await? {
                batch.push(remote_id);
            }
        }

        let mut processed_ids = Vec::new();
        for remote_id in batch {
            let raw = match timeout(self.fetch_timeout, self.reader.fetch(account, &remote_id))
                .await
                .map_err(|_| Error::TransientFetch("message fetch timed out".into()))
                .and_then(|r| r)
            {
                Ok(raw) => raw,
                Err(e) => {
                    // Not recorded in the ledger, so it is retried next run.
                    warn!(%remote_id, error = %e, "Message fetch failed");
                    stats.errors.push(format!("message {}: {}", remote_id, e));
                    continue;
                }
            };
            stats.fetched += 1;

            let message_id = self.db.insert_message(account.id, &raw).await?;

            // Read the live category set every time: a category created
            // moments ago must be eligible for this very message.
            let categories = self.db.categories_for_user(account.user_id).await?;

            let outcome = timeout(
                self.classify_timeout,
                self.classifier.classify(&raw, &categories),
            )
            .await
            .map_err(|_| Error::TransientFetch("classification timed out".into()))
            .and_then(|r| r);

            match outcome {
                Ok(c) => {
                    self.db
                        .set_classification(message_id, c.category_id, &c.summary)
                        .await?;
                    stats.classified += 1;
                }
                Err(e) => {
                    warn!(%remote_id, error = %e, "Classification failed, using fallback");
                    let summary = truncate_chars(&raw.body_text, FALLBACK_SUMMARY_LIMIT);
                    self.db
                        .set_classification(message_id, fallback_category, &summary)
                        .await?;
                }
            }
            processed_ids.push(remote_id);
        }

        self.db.ledger_insert_many(account.id, &processed_ids).await?;
        Ok(stats)
    }
}
