/// Versioned update tests
///
/// Optimistic locking through the version column: outcomes, strategies,
/// soft deletes and conflict retry.
/// Run with: cargo test --test versioned_update_tests
use async_trait::async_trait;
use rowversion::{
    Assignments, Column, ConflictRetryPolicy, Connection, DataType, Database, DbError,
    EntityDescriptor, Filter, Record, Result, TableSchema, TransactionalStore, UpdateOutcome,
    UpdateStrategy, Value, VersionedRecordStore,
};
use tokio_test::{assert_err, assert_ok};

fn setup() -> Database {
    let db = Database::new();
    db.create_table(
        TableSchema::new(
            "companies",
            vec![
                Column::new("ticker", DataType::Text).primary_key(),
                Column::new("company_name", DataType::Text).not_null(),
                Column::new("sector", DataType::Text),
                Column::new("version", DataType::Integer).not_null(),
                Column::new("deleted_at", DataType::Timestamp),
            ],
        )
        .unwrap(),
    )
    .unwrap();
    db
}

fn companies(db: &Database) -> VersionedRecordStore {
    db.versioned(EntityDescriptor::new("companies", "ticker"))
}

fn rename(name: &str) -> Assignments {
    Assignments::new().set("company_name", name)
}

/// Seed AAPL and bring it to `version`.
async fn seed_aapl(db: &Database, version: i64) {
    let store = companies(db);
    let mut conn = db.connect();
    store.create(&mut conn, "AAPL", &rename("Apple")).await.unwrap();
    for expected in 1..version {
        let outcome = store
            .update(&mut conn, &Value::from("AAPL"), &rename("Apple"), expected, &Filter::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
    }
    conn.commit().await.unwrap();
}

#[tokio::test]
async fn test_success_then_conflict_on_stale_version() {
    let db = setup();
    seed_aapl(&db, 3).await;
    let store = companies(&db);
    let mut conn = db.connect();
    let key = Value::from("AAPL");

    let outcome = store
        .update(&mut conn, &key, &rename("Apple Inc."), 3, &Filter::new())
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Success { version: 4 });
    assert_eq!(outcome.to_response().current_version, Some(4));

    let outcome = store
        .update(&mut conn, &key, &rename("Apple Inc."), 3, &Filter::new())
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::VersionConflict { current_version: 4 });
    assert_eq!(outcome.http_status(), 409);

    conn.commit().await.unwrap();
    let record = store.get(&mut db.connect(), &key).await.unwrap().unwrap();
    assert_eq!(record.get_str("company_name"), Some("Apple Inc."));
    assert_eq!(record.get_i64("version"), Some(4));
}

#[tokio::test]
async fn test_version_is_monotonic() {
    let db = setup();
    seed_aapl(&db, 1).await;
    let store = companies(&db);
    let mut conn = db.connect();
    let key = Value::from("AAPL");

    for n in 1..=10 {
        let outcome = store
            .update(&mut conn, &key, &rename(&format!("Apple {}", n)), n, &Filter::new())
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Success { version: n + 1 });
    }
    conn.commit().await.unwrap();

    let record = store.get(&mut conn, &key).await.unwrap().unwrap();
    assert_eq!(record.get_i64("version"), Some(11));
}

#[tokio::test]
async fn test_missing_record_is_not_found() {
    let db = setup();
    let store = companies(&db);
    let mut conn = db.connect();

    let outcome = store
        .update(&mut conn, &Value::from("NOPE"), &rename("x"), 1, &Filter::new())
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::NotFound);
    assert_eq!(outcome.http_status(), 404);
    assert!(!outcome.to_response().updated);
}

#[tokio::test]
async fn test_soft_deleted_record_is_never_updated() {
    let db = setup();
    seed_aapl(&db, 2).await;
    let store = companies(&db);
    let mut conn = db.connect();
    let key = Value::from("AAPL");

    let outcome = store.soft_delete(&mut conn, &key, 2).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Success { version: 3 });
    conn.commit().await.unwrap();

    // Neither the right version nor a stale one gets past the delete marker.
    for expected in [1, 2, 3, 4] {
        let outcome = store
            .update(&mut conn, &key, &rename("Ghost"), expected, &Filter::new())
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::NotFound);
    }

    // The row is still there for a plain read.
    let rows = conn
        .select("companies", &Filter::new().eq("ticker", "AAPL").is_not_null("deleted_at"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_strategies_agree() {
    for strategy in [UpdateStrategy::ReadThenWrite, UpdateStrategy::ConditionalWrite] {
        let db = setup();
        seed_aapl(&db, 3).await;
        let store = companies(&db).strategy(strategy);
        let mut conn = db.connect();
        let key = Value::from("AAPL");

        let outcomes = [
            store.update(&mut conn, &key, &rename("a"), 3, &Filter::new()).await.unwrap(),
            store.update(&mut conn, &key, &rename("b"), 3, &Filter::new()).await.unwrap(),
            store.update(&mut conn, &Value::from("MSFT"), &rename("c"), 1, &Filter::new()).await.unwrap(),
            store
                .update(&mut conn, &key, &rename("d"), 4, &Filter::new().eq("sector", "Energy"))
                .await
                .unwrap(),
        ];
        assert_eq!(
            outcomes,
            [
                UpdateOutcome::Success { version: 4 },
                UpdateOutcome::VersionConflict { current_version: 4 },
                UpdateOutcome::NotFound,
                UpdateOutcome::NotFound,
            ],
            "strategy {:?}",
            strategy
        );
    }
}

#[tokio::test]
async fn test_invalid_requests_are_errors() {
    let db = setup();
    seed_aapl(&db, 1).await;
    let store = companies(&db);
    let mut conn = db.connect();
    let key = Value::from("AAPL");

    assert_err!(store.update(&mut conn, &key, &Assignments::new(), 1, &Filter::new()).await);
    assert_err!(store.update(&mut conn, &key, &rename("x"), 0, &Filter::new()).await);
    assert_err!(store.update(&mut conn, &key, &rename("x").set("version", 7), 1, &Filter::new()).await);

    // Storage errors propagate instead of becoming outcomes.
    let err = store
        .update(&mut conn, &key, &Assignments::new().set("ceo", "Tim"), 1, &Filter::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ColumnNotFound(..)));

    let err = store
        .update(&mut conn, &key, &Assignments::new().set("company_name", Value::Null), 1, &Filter::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(_)));

    // The failed statements did not poison the transaction.
    let outcome = assert_ok!(store.update(&mut conn, &key, &rename("Apple"), 1, &Filter::new()).await);
    assert_eq!(outcome, UpdateOutcome::Success { version: 2 });
}

#[tokio::test]
async fn test_custom_entity_columns() {
    let db = Database::new();
    db.create_table(
        TableSchema::new(
            "accounts",
            vec![
                Column::new("id", DataType::Integer).primary_key(),
                Column::new("balance", DataType::Integer).not_null(),
                Column::new("revision", DataType::Integer).not_null(),
            ],
        )
        .unwrap(),
    )
    .unwrap();

    let store = db.versioned(
        EntityDescriptor::new("accounts", "id")
            .version_column("revision")
            .without_soft_delete(),
    );
    let mut conn = db.connect();
    store
        .create(&mut conn, 1, &Assignments::new().set("balance", 100))
        .await
        .unwrap();

    let outcome = store
        .update(&mut conn, &Value::from(1), &Assignments::new().set("balance", 80), 1, &Filter::new())
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Success { version: 2 });
    assert_err!(store.soft_delete(&mut conn, &Value::from(1), 2).await);
}

/// Delegates to a connection, but lets a rival connection commit a
/// competing write right before the first conditional update.
struct InterferingStore {
    inner: Connection,
    rival: Connection,
    store: VersionedRecordStore,
    fired: bool,
}

#[async_trait]
impl TransactionalStore for InterferingStore {
    async fn select(&mut self, table: &str, filter: &Filter) -> Result<Vec<Record>> {
        self.inner.select(table, filter).await
    }

    async fn insert(&mut self, table: &str, values: &Assignments) -> Result<()> {
        self.inner.insert(table, values).await
    }

    async fn update(&mut self, table: &str, filter: &Filter, values: &Assignments) -> Result<u64> {
        if !self.fired {
            self.fired = true;
            let record = self
                .store
                .get(&mut self.rival, &Value::from("AAPL"))
                .await?
                .ok_or_else(|| DbError::ExecutionError("AAPL missing".into()))?;
            let version = record.get_i64("version").unwrap_or_default();
            self.store
                .update(&mut self.rival, &Value::from("AAPL"), &rename("Rival"), version, &Filter::new())
                .await?;
            self.rival.commit().await?;
        }
        self.inner.update(table, filter, values).await
    }

    async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.inner.savepoint(name).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.inner.rollback_to_savepoint(name).await
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.inner.release_savepoint(name).await
    }

    fn discard_savepoint(&mut self, name: &str) -> Result<()> {
        self.inner.discard_savepoint(name)
    }

    async fn commit(&mut self) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn test_update_with_retry_recovers_from_conflict() {
    let db = setup();
    seed_aapl(&db, 1).await;
    let store = companies(&db);
    let mut handle = InterferingStore {
        inner: db.connect(),
        rival: db.connect(),
        store: store.clone(),
        fired: false,
    };

    let mut seen_versions = Vec::new();
    let outcome = store
        .update_with_retry(
            &mut handle,
            &Value::from("AAPL"),
            &Filter::new(),
            &ConflictRetryPolicy::default(),
            |record| {
                seen_versions.push(record.get_i64("version").unwrap_or_default());
                rename("Retried")
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome, UpdateOutcome::Success { version: 3 });
    assert_eq!(seen_versions, vec![1, 2]);
}

#[tokio::test]
async fn test_update_without_retry_reports_conflict() {
    let db = setup();
    seed_aapl(&db, 1).await;
    let store = companies(&db);
    let mut handle = InterferingStore {
        inner: db.connect(),
        rival: db.connect(),
        store: store.clone(),
        fired: false,
    };

    let outcome = store
        .update_with_retry(
            &mut handle,
            &Value::from("AAPL"),
            &Filter::new(),
            &ConflictRetryPolicy::no_retry(),
            |_| rename("Once"),
        )
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::VersionConflict { current_version: 2 });
}
