mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{MockClassifier, MockReader, OracleScript, raw_message, seed_user_account, test_db};
use mailsweep::ingest::IngestionService;
use mailsweep::scheduler;

#[tokio::test]
async fn periodic_trigger_runs_and_stop_halts_it() {
    let db = test_db().await;
    let (user, _) = seed_user_account(&db).await;
    db.create_category(user, "Promotions", "marketing emails")
        .await
        .unwrap();

    let reader = Arc::new(MockReader::new(vec![raw_message("m1", "one", "body")]));
    let classifier = Arc::new(MockClassifier::new(OracleScript::Name("Promotions")));
    let ingestion = IngestionService::new(
        db.clone(),
        reader.clone(),
        classifier,
        Duration::from_secs(5),
        Duration::from_secs(5),
    );

    let handle = scheduler::start(db.clone(), ingestion, Duration::from_millis(50));

    // Give the loop a few ticks; the first fires immediately.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let listed = reader.list_calls.load(Ordering::SeqCst);
    assert!(listed >= 1, "scheduler never triggered ingestion");

    handle.stop().await;
    // Let any run spawned by the final tick drain before sampling.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_stop = reader.list_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        reader.list_calls.load(Ordering::SeqCst),
        after_stop,
        "scheduler kept running after stop"
    );
}

#[tokio::test]
async fn users_without_accounts_are_skipped() {
    let db = test_db().await;
    // A user with no linked account must not produce runs.
    db.create_user("lonely@example.com", None).await.unwrap();

    let reader = Arc::new(MockReader::new(vec![]));
    let classifier = Arc::new(MockClassifier::new(OracleScript::Fail));
    let ingestion = IngestionService::new(
        db.clone(),
        reader.clone(),
        classifier,
        Duration::from_secs(5),
        Duration::from_secs(5),
    );

    let handle = scheduler::start(db.clone(), ingestion, Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(250)).await;
    handle.stop().await;

    assert_eq!(reader.list_calls.load(Ordering::SeqCst), 0);
}
