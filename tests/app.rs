mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::{MockClassifier, MockReader, OracleScript, seed_user_account, test_db};
use mailsweep::app::App;
use mailsweep::db::Database;
use mailsweep::ingest::IngestionService;
use mailsweep::models::RawMessage;
use mailsweep::unsubscribe::{UnsubscribeExecutor, UnsubscribeService};

fn raw_at(remote_id: &str, subject: &str, hour: u32) -> RawMessage {
    RawMessage {
        remote_id: remote_id.to_string(),
        subject: subject.to_string(),
        sender: "sender@example.com".to_string(),
        body_text: "body".to_string(),
        body_html: None,
        list_unsubscribe: None,
        received_at: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
    }
}

fn build_app(db: &Database, reader: Arc<MockReader>) -> App {
    let classifier = Arc::new(MockClassifier::new(OracleScript::Name("Promotions")));
    let ingestion = IngestionService::new(
        db.clone(),
        reader,
        classifier,
        Duration::from_secs(5),
        Duration::from_secs(5),
    );
    let executor = UnsubscribeExecutor::new(Duration::from_secs(5)).unwrap();
    App::new(
        db.clone(),
        ingestion,
        UnsubscribeService::new(db.clone(), executor, 4),
    )
}

#[tokio::test]
async fn ingest_list_delete_and_dedup_after_delete() {
    let db = test_db().await;
    let (user, account) = seed_user_account(&db).await;
    let promotions = db
        .create_category(user, "Promotions", "marketing emails")
        .await
        .unwrap();

    let reader = Arc::new(MockReader::new(vec![
        raw_at("m1", "older", 9),
        raw_at("m2", "newer", 17),
    ]));
    let app = build_app(&db, reader.clone());

    app.run_ingestion_now(user).await.unwrap();

    // Newest first.
    let listed = app.list_category_messages(promotions.id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].subject, "newer");
    assert_eq!(listed[1].subject, "older");

    // Deleting removes from category views...
    let deleted = app
        .delete_messages(&listed.iter().map(|m| m.id).collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert!(app.list_category_messages(promotions.id).await.unwrap().is_empty());

    // ...and an unsubscribe against a deleted id is a per-id failure.
    let results = app.unsubscribe(&[listed[0].id]).await;
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);

    // The ledger still remembers both remote ids: nothing is re-ingested
    // even though the provider still lists them as unread.
    let run_id = app.run_ingestion_now(user).await.unwrap();
    let run = db.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.fetched, 0);
    assert!(db.ledger_contains(account, "m1").await.unwrap());
}

#[tokio::test]
async fn category_store_round_trip() {
    let db = test_db().await;
    let (user, _) = seed_user_account(&db).await;
    let reader = Arc::new(MockReader::new(vec![]));
    let app = build_app(&db, reader);

    let news = app.create_category(user, "News", "newsletters").await.unwrap();
    assert!(app.create_category(user, "news", "dup").await.is_err());

    app.run_ingestion_now(user).await.unwrap();
    let names: Vec<String> = app
        .list_categories(user)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["News".to_string(), "Uncategorized".to_string()]);

    app.delete_category(news.id).await.unwrap();
    let names: Vec<String> = app
        .list_categories(user)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["Uncategorized".to_string()]);
}
