use crate::db::Database;
use crate::error::Result;
use crate::ingest::IngestionService;
use crate::models::{Category, StoredMessage};
use crate::unsubscribe::{AttemptResult, UnsubscribeService};

/// The pipeline's surface for callers (the API layer lives elsewhere).
#[derive(Clone)]
pub struct App {
    db: Database,
    ingestion: IngestionService,
    unsubscribe: UnsubscribeService,
}

impl App {
    pub fn new(db: Database, ingestion: IngestionService, unsubscribe: UnsubscribeService) -> Self {
        Self {
            db,
            ingestion,
            unsubscribe,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Start (or join) an ingestion run for the user; returns the run id.
    pub async fn trigger_ingestion(&self, user_id: i64) -> Result<i64> {
        self.ingestion.trigger(user_id).await
    }

    /// Trigger semantics, awaiting the batch; used by the `--once` pass.
    pub async fn run_ingestion_now(&self, user_id: i64) -> Result<i64> {
        self.ingestion.run_to_completion(user_id).await
    }

    pub async fn list_category_messages(&self, category_id: i64) -> Result<Vec<StoredMessage>> {
        self.db.messages_in_category(category_id).await
    }

    /// One ordered result per requested id, duplicates and unknown ids
    /// included.
    pub async fn unsubscribe(&self, message_ids: &[i64]) -> Vec<AttemptResult> {
        self.unsubscribe.unsubscribe_many(message_ids).await
    }

    /// Delete message rows; their ledger entries persist so the remote
    /// ids are never re-ingested.
    pub async fn delete_messages(&self, message_ids: &[i64]) -> Result<u64> {
        self.db.delete_messages(message_ids).await
    }

    pub async fn create_category(
        &self,
        user_id: i64,
        name: &str,
        description: &str,
    ) -> Result<Category> {
        self.db.create_category(user_id, name, description).await
    }

    pub async fn list_categories(&self, user_id: i64) -> Result<Vec<Category>> {
        self.db.categories_for_user(user_id).await
    }

    pub async fn delete_category(&self, category_id: i64) -> Result<()> {
        self.db.delete_category(category_id).await
    }
}
