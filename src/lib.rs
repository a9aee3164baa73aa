//! mailsweep library entrypoint.
//!
//! Modules:
//! - `app`: the operations exposed to callers
//! - `ingest`: batch fetch + classify orchestration, per-user exclusivity
//! - `classifier`: hosted-model category/summary oracle
//! - `mailbox`: Gmail reader behind the `MailboxReader` trait
//! - `unsubscribe`: mechanism resolution, execution, bounded fan-out
//! - `scheduler`: periodic ingestion trigger
//! - `db`: SQLite persistence (categories, messages, ledger, runs, attempts)
//! - `models`: typed records used across layers
//! - `config`: settings.toml + environment
//! - `error`: pipeline error taxonomy

pub mod app;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod mailbox;
pub mod models;
pub mod scheduler;
pub mod unsubscribe;
