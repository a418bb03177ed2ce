//! Migration pipeline integration tests
//!
//! CSV ingest followed by query migration, with in-memory databases on
//! both sides. Query results are registered on the source since the
//! in-memory database does not evaluate SQL.
//!
//! Run with: cargo test -p dataferry-integration-tests --test migration_pipeline

use dataferry::catalog::{MigrationJob, FILTERED_SESSION};
use dataferry::{Migration, MigrationError, MigrationSettings};
use dataferry_integration_tests::mocks::{MemoryDatabase, ALWAYS};
use dataferry_integration_tests::{
    dataset, init_tracing, mock_params, write_file, write_sample_raw_data,
};
use dataferry_rdbc::client::DatabaseClient;
use dataferry_rdbc::error::ErrorCategory;
use dataferry_rdbc::retry::RetryPolicy;
use dataferry_rdbc::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    source: MemoryDatabase,
    destination: MemoryDatabase,
    migration: Migration,
}

fn harness(raw_data: &Path, source: MemoryDatabase) -> Harness {
    let destination = MemoryDatabase::new();
    let fast = RetryPolicy::fixed(5, Duration::from_millis(1));

    let migration = Migration::new(
        DatabaseClient::with_factory(mock_params("raw"), Arc::new(source.clone()))
            .with_retry_policy(fast),
        DatabaseClient::with_factory(mock_params("analytics"), Arc::new(destination.clone()))
            .with_retry_policy(fast),
        MigrationSettings {
            raw_data_path: raw_data.to_path_buf(),
            source_schema: "raw".to_string(),
            destination_schema: "public".to_string(),
        },
    );

    Harness {
        source,
        destination,
        migration,
    }
}

fn source_with_results() -> MemoryDatabase {
    MemoryDatabase::new()
        .with_result(
            "AS weekly_activity",
            dataset(
                &["email_domain", "week_number", "weekly_activity"],
                vec![
                    vec![Value::from("a@x.com"), Value::Int64(1), Value::Int64(2)],
                    vec![Value::from("a@x.com"), Value::Int64(2), Value::Int64(1)],
                    vec![Value::from("b@x.com"), Value::Int64(1), Value::Int64(1)],
                ],
            ),
        )
        .with_result(
            "AS total_activity",
            dataset(
                &["email_domain", "total_activity"],
                vec![
                    vec![Value::from("a@x.com"), Value::Int64(3)],
                    vec![Value::from("b@x.com"), Value::Int64(1)],
                ],
            ),
        )
        .with_result(
            "FROM space_session_info",
            dataset(
                &["id", "number_of_participants", "duration"],
                vec![vec![Value::Int64(10), Value::Int64(2), Value::Int64(30)]],
            ),
        )
}

// ============================================================================
// Ingest Tests
// ============================================================================

#[tokio::test]
async fn test_each_file_becomes_a_table() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "foo.csv", "a,b\n1,x\n2,y\n");
    write_file(dir.path(), "bar.csv", "c\n3.5\n");
    let h = harness(dir.path(), MemoryDatabase::new());

    let reports = h.migration.ingest_files().await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(h.source.table_names("raw"), vec!["bar", "foo"]);

    let foo = h.source.table("raw", "foo").unwrap();
    assert_eq!(foo.column_names(), vec!["a", "b"]);
    assert_eq!(foo.column_types(), vec!["BIGINT", "TEXT"]);
    assert_eq!(foo.len(), 2);

    let bar = h.source.table("raw", "bar").unwrap();
    assert_eq!(bar.column_names(), vec!["c"]);
    assert_eq!(bar.rows, vec![vec![Value::Float64(3.5)]]);
}

#[tokio::test]
async fn test_reingest_replaces_tables() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "foo.csv", "a\n1\n2\n3\n");
    let h = harness(dir.path(), MemoryDatabase::new());

    h.migration.ingest_files().await.unwrap();
    write_file(dir.path(), "foo.csv", "a\n9\n");
    h.migration.ingest_files().await.unwrap();

    assert_eq!(h.source.table("raw", "foo").unwrap().rows, vec![vec![Value::Int64(9)]]);
}

#[tokio::test]
async fn test_unparseable_file_stops_ingest() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "broken.csv", "a,b\n1,2\n3\n");
    let h = harness(dir.path(), source_with_results());

    let err = h.migration.run().await.unwrap_err();

    assert!(matches!(err, MigrationError::Csv { .. }));
    assert!(h.source.table_names("raw").is_empty());
    assert!(h.destination.table_names("public").is_empty());
}

#[tokio::test]
async fn test_nameless_file_stops_ingest() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), ".hidden", "a\n1\n");
    let h = harness(dir.path(), MemoryDatabase::new());

    let err = h.migration.ingest_files().await.unwrap_err();

    assert!(matches!(err, MigrationError::Config(_)));
    assert!(h.source.table_names("raw").is_empty());
}

#[tokio::test]
async fn test_missing_raw_data_directory() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let h = harness(&dir.path().join("absent"), MemoryDatabase::new());

    let err = h.migration.ingest_files().await.unwrap_err();
    assert!(matches!(err, MigrationError::Io { .. }));
}

// ============================================================================
// Migration Tests
// ============================================================================

#[tokio::test]
async fn test_run_migrates_every_query() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_sample_raw_data(dir.path());
    let h = harness(dir.path(), source_with_results());

    let summary = h.migration.run().await.unwrap();

    assert_eq!(summary.ingested.len(), 3);
    assert_eq!(summary.migrated.len(), 3);
    assert_eq!(
        h.destination.table_names("public"),
        vec!["filtered_session", "total_activity", "weekly_activity"]
    );

    let weekly = h.destination.table("public", "weekly_activity").unwrap();
    assert_eq!(
        weekly.column_names(),
        vec!["email_domain", "week_number", "weekly_activity"]
    );
    assert_eq!(
        weekly.rows[0],
        vec![Value::from("a@x.com"), Value::Int64(1), Value::Int64(2)]
    );
    assert_eq!(
        weekly.rows[1],
        vec![Value::from("a@x.com"), Value::Int64(2), Value::Int64(1)]
    );

    let tables: Vec<&str> = summary.migrated.iter().map(|r| r.table.as_str()).collect();
    assert_eq!(
        tables,
        vec!["public.weekly_activity", "public.total_activity", "public.filtered_session"]
    );
    assert_eq!(summary.total_rows(), 2 + 4 + 3 + 3 + 2 + 1);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_sample_raw_data(dir.path());
    let h = harness(dir.path(), source_with_results());

    h.migration.run().await.unwrap();
    let first = h.destination.table("public", "total_activity").unwrap();
    h.migration.run().await.unwrap();

    assert_eq!(h.destination.table("public", "total_activity").unwrap(), first);
    assert_eq!(h.source.table("raw", "user").unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_query_stops_later_tables() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_sample_raw_data(dir.path());
    let source = source_with_results();
    source.fail_on("AS total_activity", ALWAYS);
    let h = harness(dir.path(), source);

    let err = h.migration.run().await.unwrap_err();

    match &err {
        MigrationError::Rdbc(e) => assert_eq!(e.category(), ErrorCategory::Query),
        other => panic!("expected a database error, got {other:?}"),
    }
    assert_eq!(h.source.statement_count("AS total_activity"), 5);
    assert_eq!(h.destination.table_names("public"), vec!["weekly_activity"]);
}

#[tokio::test]
async fn test_custom_job() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_sample_raw_data(dir.path());
    let h = harness(dir.path(), source_with_results());
    let migration = h
        .migration
        .with_job(MigrationJob::new().with("long_sessions", FILTERED_SESSION));

    let reports = migration.migrate().await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(h.destination.table_names("public"), vec!["long_sessions"]);
    assert!(!h
        .destination
        .table("public", "long_sessions")
        .unwrap()
        .column_names()
        .contains(&"index"));
}
