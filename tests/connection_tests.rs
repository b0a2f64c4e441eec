/// Connection tests
///
/// Autobegin, commit and rollback, savepoint stacks and cleanup on drop.
/// Run with: cargo test --test connection_tests
use std::time::Duration;

use rowversion::{
    Assignments, Column, DataType, Database, DbError, Filter, TableSchema, TransactionalStore,
    Value,
};
use tokio_test::{assert_err, assert_ok};

fn setup() -> Database {
    let db = Database::new();
    db.create_table(
        TableSchema::new(
            "companies",
            vec![
                Column::new("ticker", DataType::Text).primary_key(),
                Column::new("market_cap", DataType::Float),
            ],
        )
        .unwrap(),
    )
    .unwrap();
    db
}

fn company(ticker: &str) -> Assignments {
    Assignments::new().set("ticker", ticker)
}

async fn count(db: &Database) -> usize {
    db.connect()
        .select("companies", &Filter::new())
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_drop_rolls_back_open_transaction() {
    let db = setup();
    {
        let mut conn = db.connect();
        conn.insert("companies", &company("AAPL")).await.unwrap();
        assert!(conn.is_in_transaction());
    }
    assert_eq!(db.stats().active, 0);
    assert_eq!(db.stats().aborted, 1);
    assert_eq!(count(&db).await, 0);
}

#[tokio::test]
async fn test_explicit_rollback() {
    let db = setup();
    let mut conn = db.connect();
    let txn = conn.begin().unwrap();
    assert_eq!(conn.transaction_id(), Some(txn));

    conn.insert("companies", &company("AAPL")).await.unwrap();
    conn.rollback().await.unwrap();
    assert!(!conn.is_in_transaction());
    assert_eq!(count(&db).await, 0);

    // A new statement starts a new transaction.
    conn.insert("companies", &company("MSFT")).await.unwrap();
    assert_ne!(conn.transaction_id(), Some(txn));
    conn.commit().await.unwrap();
    assert_eq!(count(&db).await, 1);
}

#[tokio::test]
async fn test_statement_errors_keep_transaction_usable() {
    let db = setup();
    let mut conn = db.connect();
    conn.insert("companies", &company("AAPL")).await.unwrap();

    let err = conn.insert("companies", &company("AAPL")).await.unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(_)));
    assert_err!(conn.select("tickers", &Filter::new()).await);
    assert_err!(
        conn.update(
            "companies",
            &Filter::new().eq("ticker", 42),
            &Assignments::new().set("market_cap", 1.0)
        )
        .await
    );

    assert!(conn.is_in_transaction());
    conn.commit().await.unwrap();
    assert_eq!(count(&db).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_insert_waits_for_uncommitted_key() {
    let db = setup();
    let mut first = db.connect();
    first.insert("companies", &company("NVDA")).await.unwrap();

    let second = {
        let db = db.clone();
        tokio::spawn(async move {
            let mut conn = db.connect();
            conn.insert("companies", &company("NVDA")).await?;
            conn.commit().await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished());

    // Once the first insert is rolled back the key is free again.
    first.rollback().await.unwrap();
    assert_ok!(second.await.unwrap());
    assert_eq!(count(&db).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_insert_fails_once_waited_key_commits() {
    let db = setup();
    let mut first = db.connect();
    first.insert("companies", &company("NVDA")).await.unwrap();

    let second = {
        let db = db.clone();
        tokio::spawn(async move {
            let mut conn = db.connect();
            conn.insert("companies", &company("NVDA")).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    first.commit().await.unwrap();

    let err = second.await.unwrap().unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(_)));
    assert_eq!(count(&db).await, 1);
}

#[tokio::test]
async fn test_nested_savepoints() {
    let db = setup();
    let mut conn = db.connect();
    conn.insert("companies", &company("AAPL")).await.unwrap();

    conn.savepoint("a").await.unwrap();
    conn.insert("companies", &company("MSFT")).await.unwrap();
    conn.savepoint("b").await.unwrap();
    conn.insert("companies", &company("GOOG")).await.unwrap();
    assert_eq!(conn.savepoints(), vec!["a".to_string(), "b".to_string()]);

    // Rolling back to "a" destroys "b" and everything after "a".
    conn.rollback_to_savepoint("a").await.unwrap();
    assert_eq!(conn.savepoints(), vec!["a".to_string()]);
    assert_err!(conn.release_savepoint("b").await);

    let rows = conn.select("companies", &Filter::new()).await.unwrap();
    assert_eq!(rows.len(), 1);

    // Released savepoints keep their changes.
    conn.insert("companies", &company("NVDA")).await.unwrap();
    assert_ok!(conn.release_savepoint("a").await);
    conn.commit().await.unwrap();
    assert_eq!(count(&db).await, 2);
}

#[tokio::test]
async fn test_savepoint_names_are_whitelisted() {
    let db = setup();
    let mut conn = db.connect();
    for name in ["", "1abc", "a-b", "sp; ROLLBACK"] {
        let err = conn.savepoint(name).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput(_)), "{:?}", name);
    }
    assert!(conn.savepoints().is_empty());
}

#[tokio::test]
async fn test_rollback_restores_previous_values() {
    let db = setup();
    let mut conn = db.connect();
    conn.insert("companies", &company("AAPL").set("market_cap", 3.0))
        .await
        .unwrap();
    conn.commit().await.unwrap();

    let affected = conn
        .update(
            "companies",
            &Filter::new().eq("ticker", "AAPL"),
            &Assignments::new().set("market_cap", 4),
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);
    conn.rollback().await.unwrap();

    let rows = db
        .connect()
        .select("companies", &Filter::new())
        .await
        .unwrap();
    assert_eq!(rows[0].get("market_cap"), Some(&Value::Float(3.0)));
}

#[tokio::test]
async fn test_closed_connection_rejects_statements() {
    let db = setup();
    let mut conn = db.connect();
    conn.insert("companies", &company("AAPL")).await.unwrap();
    conn.close().unwrap();

    assert!(!conn.is_active());
    assert!(matches!(
        conn.select("companies", &Filter::new()).await,
        Err(DbError::ConnectionClosed(_))
    ));
    assert_eq!(count(&db).await, 0);
}
