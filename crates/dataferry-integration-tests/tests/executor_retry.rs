//! Query executor integration tests
//!
//! Retry, rollback and connection handling of reads and writes, run
//! against the in-memory database.
//!
//! Run with: cargo test -p dataferry-integration-tests --test executor_retry

use dataferry_integration_tests::mocks::{MemoryDatabase, MemoryTable, ALWAYS};
use dataferry_integration_tests::{dataset, init_tracing, mock_params};
use dataferry_rdbc::client::DatabaseClient;
use dataferry_rdbc::error::ErrorCategory;
use dataferry_rdbc::retry::RetryPolicy;
use dataferry_rdbc::types::Row;
use dataferry_rdbc::Value;
use std::sync::Arc;
use std::time::Duration;

const REPORT_SQL: &str = "SELECT email FROM user";

fn client(db: &MemoryDatabase, attempts: u32) -> DatabaseClient {
    DatabaseClient::with_factory(mock_params("analytics"), Arc::new(db.clone()))
        .with_retry_policy(RetryPolicy::fixed(attempts, Duration::from_millis(1)))
}

fn emails() -> MemoryDatabase {
    MemoryDatabase::new().with_result(
        REPORT_SQL,
        dataset(
            &["email"],
            vec![vec![Value::from("a@x.com")], vec![Value::from("b@x.com")]],
        ),
    )
}

// ============================================================================
// Read Tests
// ============================================================================

#[tokio::test]
async fn test_read_returns_rows_in_order() {
    init_tracing();
    let db = emails();

    let rows = client(&db, 5).read_rows(REPORT_SQL, &[], None).await.unwrap();
    let values: Vec<&Value> = rows.iter().map(|r| &r.values()[0]).collect();
    assert_eq!(values, vec![&Value::from("a@x.com"), &Value::from("b@x.com")]);

    assert_eq!(db.connects(), 1);
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_read_that_always_fails_makes_five_attempts() {
    init_tracing();
    let db = emails();
    db.fail_on(REPORT_SQL, ALWAYS);

    let err = client(&db, 5)
        .read_dataset(REPORT_SQL, &[], None)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Query);
    assert_eq!(err.sql(), Some(REPORT_SQL));
    assert_eq!(db.statement_count(REPORT_SQL), 5);
    assert_eq!(db.connects(), 5);
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_read_recovers_after_transient_failures() {
    init_tracing();
    let db = emails();
    db.fail_on(REPORT_SQL, 2);

    let ds = client(&db, 5).read_dataset(REPORT_SQL, &[], None).await.unwrap();
    assert_eq!(ds.shape(), (2, 1));
    assert_eq!(db.statement_count(REPORT_SQL), 3);
}

#[tokio::test]
async fn test_connection_failures_become_query_errors() {
    init_tracing();
    let db = emails();
    db.fail_connects(10);

    let err = client(&db, 3)
        .read_dataset(REPORT_SQL, &[], None)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Query);
    assert_eq!(db.connects(), 0);
    assert_eq!(db.statement_count(REPORT_SQL), 0);
}

#[tokio::test]
async fn test_borrowed_connection_used_once_then_fresh_ones() {
    init_tracing();
    let db = emails();
    let client = client(&db, 3);
    let shared = client.connect().await.unwrap();
    db.fail_on(REPORT_SQL, 1);

    let ds = client
        .read_dataset(REPORT_SQL, &[], Some(&*shared))
        .await
        .unwrap();
    assert_eq!(ds.len(), 2);

    // shared attempt failed and was closed; the retry opened its own
    assert_eq!(db.connects(), 2);
    assert_eq!(db.closes(), 2);

    // the closed shared connection fails, so the retry opens another
    client
        .read_dataset(REPORT_SQL, &[], Some(&*shared))
        .await
        .unwrap();
    assert_eq!(db.connects(), 3);
    shared.release().await;
}

#[tokio::test]
async fn test_borrowed_connection_left_open_on_success() {
    init_tracing();
    let db = emails();
    let client = client(&db, 1);
    let shared = client.connect().await.unwrap();

    client
        .read_dataset(REPORT_SQL, &[], Some(&*shared))
        .await
        .unwrap();
    client
        .read_dataset(REPORT_SQL, &[], Some(&*shared))
        .await
        .unwrap();

    assert_eq!(db.connects(), 1);
    assert_eq!(db.open_connections(), 1);
    shared.release().await;
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_empty_result_keeps_columns() {
    init_tracing();
    let db = MemoryDatabase::new().with_result("FROM empty", dataset(&["a", "b"], vec![]));

    let ds = client(&db, 1)
        .read_dataset("SELECT a, b FROM empty", &[], None)
        .await
        .unwrap();
    assert_eq!(ds.shape(), (0, 2));
}

#[tokio::test]
async fn test_read_rows_keeps_duplicate_labels() {
    init_tracing();
    let labels = vec!["ID".to_string(), "ID".to_string()];
    let db = MemoryDatabase::new().with_rows(
        "FROM pairs",
        vec![Row::new(labels.clone(), vec![Value::Int64(1), Value::Int64(2)])],
    );

    let rows = client(&db, 5)
        .read_rows("SELECT a.id AS ID, b.id AS ID FROM pairs", &[], None)
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns(), labels.as_slice());
    assert_eq!(rows[0].values(), &[Value::Int64(1), Value::Int64(2)]);
    assert_eq!(db.statement_count("FROM pairs"), 1);
}

#[tokio::test]
async fn test_read_dataset_rejects_duplicate_labels() {
    init_tracing();
    let labels = vec!["ID".to_string(), "ID".to_string()];
    let db = MemoryDatabase::new().with_rows(
        "FROM pairs",
        vec![Row::new(labels, vec![Value::Int64(1), Value::Int64(2)])],
    );

    let err = client(&db, 1)
        .read_dataset("SELECT a.id AS ID, b.id AS ID FROM pairs", &[], None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("duplicate column"), "{err}");
}

// ============================================================================
// Write Tests
// ============================================================================

fn counters() -> MemoryDatabase {
    MemoryDatabase::new().with_table(
        "public",
        "counter",
        MemoryTable::new([("n", "BIGINT")]).with_rows(vec![vec![Value::Int64(1)]]),
    )
}

const INSERT_COUNTER: &str = "INSERT INTO \"public\".\"counter\" (\"n\") VALUES ($1), ($2)";

#[tokio::test]
async fn test_write_commits_and_reports_affected_rows() {
    init_tracing();
    let db = counters();

    let affected = client(&db, 1)
        .write(INSERT_COUNTER, &[Value::Int64(2), Value::Int64(3)], None)
        .await
        .unwrap();

    assert_eq!(affected, 2);
    assert_eq!(db.table("public", "counter").unwrap().len(), 3);
    assert_eq!(db.commits(), 1);
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_failed_write_rolls_back_and_leaves_state() {
    init_tracing();
    let db = counters();
    db.fail_on(INSERT_COUNTER, ALWAYS);
    let before = db.table("public", "counter");

    let err = client(&db, 2)
        .write(INSERT_COUNTER, &[Value::Int64(2), Value::Int64(3)], None)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Query);
    assert_eq!(db.table("public", "counter"), before);
    assert_eq!(db.rollbacks(), 2);
    assert_eq!(db.commits(), 0);
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_failed_write_keeps_borrowed_connection_open() {
    init_tracing();
    let db = counters();
    let client = client(&db, 1);
    let shared = client.connect().await.unwrap();
    db.fail_on(INSERT_COUNTER, 1);

    let result = client
        .write(INSERT_COUNTER, &[Value::Int64(2), Value::Int64(3)], Some(&*shared))
        .await;
    assert!(result.is_err());
    assert_eq!(db.open_connections(), 1);

    let affected = client
        .write(INSERT_COUNTER, &[Value::Int64(2), Value::Int64(3)], Some(&*shared))
        .await
        .unwrap();
    assert_eq!(affected, 2);
    shared.release().await;
}
