//! End-to-end pipeline tests against real servers
//!
//! **REAL** integration tests: raw CSV files are ingested into MySQL, the
//! named queries run there, and their results land in PostgreSQL.
//!
//! Run with: cargo test -p dataferry-integration-tests --test pipeline_containers -- --include-ignored --nocapture
//!
//! Requirements: Docker must be running for testcontainers.

use anyhow::Result;
use dataferry::{Migration, MigrationSettings};
use dataferry_integration_tests::fixtures::{TestMysql, TestPostgres};
use dataferry_integration_tests::{dataset, init_tracing, write_sample_raw_data};
use dataferry_rdbc::client::DatabaseClient;
use dataferry_rdbc::loader::LoadOptions;
use dataferry_rdbc::retry::RetryPolicy;
use dataferry_rdbc::Value;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;

// ============================================================================
// Helper Functions
// ============================================================================

fn migration(mysql: &TestMysql, pg: &TestPostgres, raw_data: &Path) -> Result<Migration> {
    let fast = RetryPolicy::fixed(2, Duration::from_millis(200));
    let source = DatabaseClient::from_params(mysql.params())?.with_retry_policy(fast);
    let destination = DatabaseClient::from_params(pg.params())?.with_retry_policy(fast);

    Ok(Migration::new(
        source,
        destination,
        MigrationSettings {
            raw_data_path: raw_data.to_path_buf(),
            source_schema: mysql.database().to_string(),
            destination_schema: "public".to_string(),
        },
    ))
}

async fn weekly_rows(pg: &TestPostgres, email: &str) -> Result<Vec<(i64, i64)>> {
    let client = pg.connect().await?;
    let rows = client
        .query(
            "SELECT week_number, weekly_activity FROM public.weekly_activity \
             WHERE email_domain = $1 ORDER BY week_number",
            &[&email],
        )
        .await?;
    Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
}

async fn count(pg: &TestPostgres, table: &str) -> Result<i64> {
    let client = pg.connect().await?;
    let row = client
        .query_one(&format!("SELECT COUNT(*) FROM public.{}", table), &[])
        .await?;
    Ok(row.get(0))
}

// ============================================================================
// Pipeline Tests
// ============================================================================

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_pipeline_mysql_to_postgres() -> Result<()> {
    init_tracing();
    let mysql = TestMysql::start().await?;
    let pg = TestPostgres::start().await?;
    let dir = TempDir::new()?;
    write_sample_raw_data(dir.path());

    let summary = migration(&mysql, &pg, dir.path())?.run().await?;
    info!(rows = summary.total_rows(), "Pipeline finished");

    assert_eq!(summary.ingested.len(), 3);
    assert_eq!(weekly_rows(&pg, "a@x.com").await?, vec![(1, 2), (2, 1)]);
    assert_eq!(weekly_rows(&pg, "b@x.com").await?, vec![(1, 1)]);

    let client = pg.connect().await?;
    let total: i64 = client
        .query_one(
            "SELECT total_activity FROM public.total_activity WHERE email_domain = 'a@x.com'",
            &[],
        )
        .await?
        .get(0);
    assert_eq!(total, 3);

    let sessions: Vec<i64> = client
        .query("SELECT id FROM public.filtered_session ORDER BY id", &[])
        .await?
        .iter()
        .map(|r| r.get(0))
        .collect();
    assert_eq!(sessions, vec![10]);

    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_pipeline_rerun_is_idempotent() -> Result<()> {
    init_tracing();
    let mysql = TestMysql::start().await?;
    let pg = TestPostgres::start().await?;
    let dir = TempDir::new()?;
    write_sample_raw_data(dir.path());

    let migration = migration(&mysql, &pg, dir.path())?;
    migration.run().await?;
    let first = count(&pg, "weekly_activity").await?;
    migration.run().await?;

    assert_eq!(count(&pg, "weekly_activity").await?, first);
    assert_eq!(count(&pg, "total_activity").await?, 2);
    Ok(())
}

// ============================================================================
// Backend Tests
// ============================================================================

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_postgres_transactional_load_rolls_back() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let client = DatabaseClient::from_params(pg.params())?.with_retry_policy(RetryPolicy::no_retry());
    let options = LoadOptions::replace("public").chunk_size(1).transactional(true);

    let good = dataset(&["n"], vec![vec![Value::Int64(1)]]);
    client.load(&good, "numbers", &options, None).await?;

    // second chunk binds text into the BIGINT column
    let bad = dataset(&["n"], vec![vec![Value::Int64(2)], vec![Value::from("two")]]);
    assert!(client.load(&bad, "numbers", &options, None).await.is_err());

    let rows = client.read_rows("SELECT n FROM public.numbers", &[], None).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values()[0], Value::Int64(1));
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_mysql_result_types() -> Result<()> {
    init_tracing();
    let mysql = TestMysql::start().await?;
    let client = DatabaseClient::from_params(mysql.params())?;

    let ds = client
        .read_dataset(
            "SELECT CAST(1.50 AS DECIMAL(5,2)) AS amount, DATE('2023-01-02') AS day, \
             'x' AS label, NULL AS nothing",
            &[],
            None,
        )
        .await?;

    assert_eq!(ds.column_names(), vec!["amount", "day", "label", "nothing"]);
    assert_eq!(ds.columns()[0].type_name, "DECIMAL");
    assert!(matches!(ds.rows()[0][0], Value::Decimal(_)));
    assert!(matches!(ds.rows()[0][1], Value::Date(_)));
    assert_eq!(ds.rows()[0][2], Value::from("x"));
    assert!(ds.rows()[0][3].is_null());
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_empty_query_result_keeps_columns() -> Result<()> {
    init_tracing();
    let mysql = TestMysql::start().await?;
    let pg = TestPostgres::start().await?;
    let source = DatabaseClient::from_params(mysql.params())?;
    let destination = DatabaseClient::from_params(pg.params())?;

    let ds = source
        .read_dataset("SELECT 1 AS id, 'a' AS name FROM DUAL WHERE 1 = 0", &[], None)
        .await?;
    assert_eq!(ds.shape(), (0, 2));

    destination
        .load(&ds, "empty_result", &LoadOptions::replace("public"), None)
        .await?;
    assert_eq!(count(&pg, "empty_result").await?, 0);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_postgres_unmapped_type_is_an_error() -> Result<()> {
    init_tracing();
    let pg = TestPostgres::start().await?;
    let client = DatabaseClient::from_params(pg.params())?.with_retry_policy(RetryPolicy::no_retry());

    let err = client
        .read_rows("SELECT '10.0.0.1'::inet AS addr", &[], None)
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("unsupported"), "{message}");
    assert!(message.contains("addr"), "{message}");

    let rows = client.read_rows("SELECT 'x'::varchar AS label", &[], None).await?;
    assert_eq!(rows[0].values()[0], Value::from("x"));
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_mysql_binary_columns_read_as_bytes() -> Result<()> {
    init_tracing();
    let mysql = TestMysql::start().await?;
    let client = DatabaseClient::from_params(mysql.params())?;

    let ds = client
        .read_dataset("SELECT CAST('abc' AS BINARY) AS raw, 'abc' AS label", &[], None)
        .await?;

    assert_eq!(ds.columns()[0].type_name, "BYTEA");
    assert_eq!(ds.rows()[0][0], Value::Bytes(b"abc".to_vec()));
    assert_eq!(ds.rows()[0][1], Value::from("abc"));
    Ok(())
}
