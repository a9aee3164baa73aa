use thiserror::Error;

/// Pipeline error taxonomy. Nothing here is fatal to the process: every
/// variant is absorbed at a component boundary (fallback classification,
/// per-message failure result, skipped account) rather than aborting a
/// batch.
#[derive(Debug, Error)]
pub enum Error {
    /// Mailbox or model unreachable, or a deadline elapsed. The affected
    /// account or message is skipped for this run.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// The model's output named no existing category or could not be
    /// parsed. Routes to the Uncategorized fallback.
    #[error("unusable classification response: {0}")]
    ClassificationFormat(String),

    /// No unsubscribe mechanism could be resolved for a message.
    #[error("no unsubscribe mechanism found")]
    MechanismNotFound,

    /// An unsubscribe mechanism was executed and judged unsuccessful.
    #[error("unsubscribe execution failed: {0}")]
    UnsubscribeExecution(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
