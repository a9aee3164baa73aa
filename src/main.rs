use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use mailsweep::app::App;
use mailsweep::classifier::ClaudeClassifier;
use mailsweep::config::Config;
use mailsweep::db::Database;
use mailsweep::ingest::IngestionService;
use mailsweep::mailbox::GmailReader;
use mailsweep::scheduler;
use mailsweep::unsubscribe::{UnsubscribeExecutor, UnsubscribeService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailsweep=info".into()),
        )
        .init();

    let run_once = std::env::args().any(|arg| arg == "--once");

    let config = Config::load();
    let db = Database::new(&config.database_url).await?;
    db.run_migrations().await?;

    let secret = GmailReader::load_secret(&config.gmail.secret_path)
        .await
        .context("Gmail application secret unavailable")?;
    let reader = Arc::new(GmailReader::new(secret));
    let classifier = Arc::new(ClaudeClassifier::new(&config.model)?);

    let ingestion = IngestionService::new(
        db.clone(),
        reader,
        classifier,
        Duration::from_secs(config.gmail.fetch_timeout_secs),
        // A small grace over the client's own deadline so the HTTP error
        // surfaces before the wrapper fires.
        Duration::from_secs(config.model.timeout_secs + 5),
    );
    let executor = UnsubscribeExecutor::new(Duration::from_secs(config.unsubscribe.timeout_secs))?;
    let app = App::new(
        db.clone(),
        ingestion.clone(),
        UnsubscribeService::new(db.clone(), executor, config.unsubscribe.concurrency),
    );

    if run_once {
        for user in db.users_with_accounts().await? {
            let run_id = app.run_ingestion_now(user.id).await?;
            if let Some(run) = db.get_run(run_id).await? {
                info!(
                    user = %user.email,
                    run_id,
                    fetched = run.fetched,
                    classified = run.classified,
                    errors = run.errors.len(),
                    "Ingestion pass complete"
                );
            }
        }
        return Ok(());
    }

    let handle = scheduler::start(
        db,
        ingestion,
        Duration::from_secs(config.scheduler.interval_secs),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    handle.stop().await;

    Ok(())
}
