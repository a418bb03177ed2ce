//! PostgreSQL backend for dataferry-rdbc
//!
//! Connection, transaction and factory on top of tokio-postgres.
//! Result sets are read through prepared statements so column names and
//! types are known even when no rows come back.

use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{error, warn};

use crate::connection::{Connection, ConnectionFactory, ConnectionParams, DatabaseType, Transaction};
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::types::{ColumnMetadata, Row, Value};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// NULL parameter that binds to any column type
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Convert a Value to a tokio-postgres compatible parameter
fn value_to_sql(value: &Value) -> BoxedParam {
    match value {
        Value::Null => Box::new(SqlNull),
        Value::Bool(b) => Box::new(*b),
        Value::Int16(n) => Box::new(*n),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float32(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::Decimal(d) => Box::new(*d),
        Value::String(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
        Value::Uuid(u) => Box::new(*u),
        Value::Json(j) => Box::new(j.clone()),
    }
}

fn boxed_params(params: &[Value]) -> Vec<BoxedParam> {
    params.iter().map(value_to_sql).collect()
}

fn param_refs(boxed: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    boxed
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

/// Portable type name for a PostgreSQL column type; empty when unknown
fn pg_type_name(pg_type: &Type) -> &'static str {
    match *pg_type {
        Type::BOOL => "BOOLEAN",
        Type::INT2 => "SMALLINT",
        Type::INT4 => "INTEGER",
        Type::INT8 => "BIGINT",
        Type::FLOAT4 => "REAL",
        Type::FLOAT8 => "DOUBLE PRECISION",
        Type::NUMERIC => "DECIMAL",
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => "TEXT",
        Type::BYTEA => "BYTEA",
        Type::DATE => "DATE",
        Type::TIME => "TIME",
        Type::TIMESTAMP => "TIMESTAMP",
        Type::TIMESTAMPTZ => "TIMESTAMPTZ",
        Type::UUID => "UUID",
        Type::JSON => "JSON",
        Type::JSONB => "JSONB",
        _ => "",
    }
}

/// Whether a column of this type reads as text
fn text_like(pg_type: &Type) -> bool {
    <String as FromSql>::accepts(pg_type)
}

fn column<'a, T, F>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    wrap: F,
) -> std::result::Result<Value, tokio_postgres::Error>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    Ok(row
        .try_get::<_, Option<T>>(idx)?
        .map(wrap)
        .unwrap_or(Value::Null))
}

/// Convert a PostgreSQL value to a Value
fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize) -> Result<Value> {
    let col = &row.columns()[idx];
    let pg_type = col.type_();
    let decoded = match *pg_type {
        Type::BOOL => column(row, idx, Value::Bool),
        Type::INT2 => column(row, idx, Value::Int16),
        Type::INT4 => column(row, idx, Value::Int32),
        Type::INT8 => column(row, idx, Value::Int64),
        Type::FLOAT4 => column(row, idx, Value::Float32),
        Type::FLOAT8 => column(row, idx, Value::Float64),
        Type::NUMERIC => column(row, idx, Value::Decimal),
        Type::BYTEA => column(row, idx, Value::Bytes),
        Type::DATE => column(row, idx, Value::Date),
        Type::TIME => column(row, idx, Value::Time),
        Type::TIMESTAMP => column(row, idx, Value::DateTime),
        Type::TIMESTAMPTZ => column(row, idx, Value::DateTimeTz),
        Type::UUID => column(row, idx, Value::Uuid),
        Type::JSON | Type::JSONB => column(row, idx, Value::Json),
        ref ty if text_like(ty) => column(row, idx, Value::String),
        ref ty => {
            return Err(Error::unsupported(format!(
                "column '{}' has unsupported type {}",
                col.name(),
                ty
            )))
        }
    };
    decoded.map_err(|e| {
        Error::type_conversion(format!("column '{}' ({}): {}", col.name(), pg_type, e))
    })
}

fn pg_row_values(pg_row: &tokio_postgres::Row) -> Result<Vec<Value>> {
    (0..pg_row.len())
        .map(|i| pg_value_to_value(pg_row, i))
        .collect()
}

/// Convert a tokio-postgres row to a Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Result<Row> {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    Ok(Row::new(columns, pg_row_values(pg_row)?))
}

async fn run_query(client: &Client, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let boxed = boxed_params(params);
    let pg_rows = client
        .query(sql, &param_refs(&boxed))
        .await
        .map_err(|e| Error::driver(sql, e))?;
    pg_rows.iter().map(pg_row_to_row).collect()
}

async fn run_execute(client: &Client, sql: &str, params: &[Value]) -> Result<u64> {
    let boxed = boxed_params(params);
    client
        .execute(sql, &param_refs(&boxed))
        .await
        .map_err(|e| Error::driver(sql, e))
}

async fn run_control(client: &Client, sql: &str) -> Result<()> {
    client
        .batch_execute(sql)
        .await
        .map_err(|e| Error::transaction_with_source(format!("{} failed", sql), e))
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<Client>,
    closed: AtomicBool,
}

impl PgConnection {
    /// Wrap an established client
    pub fn new(client: Client) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        run_query(&self.client, sql, params).await
    }

    async fn query_table(&self, sql: &str, params: &[Value]) -> Result<Dataset> {
        self.ensure_open()?;

        let stmt = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| Error::driver(sql, e))?;

        let columns: Vec<ColumnMetadata> = stmt
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                ColumnMetadata::new(c.name(), pg_type_name(c.type_())).with_ordinal(i as u32 + 1)
            })
            .collect();

        let boxed = boxed_params(params);
        let pg_rows = self
            .client
            .query(&stmt, &param_refs(&boxed))
            .await
            .map_err(|e| Error::driver(sql, e))?;

        let rows = pg_rows
            .iter()
            .map(pg_row_values)
            .collect::<Result<Vec<_>>>()?;

        Dataset::new(columns, rows)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        run_execute(&self.client, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        run_control(&self.client, "BEGIN").await?;

        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
            finished: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL transaction
pub struct PgTransaction {
    client: Arc<Client>,
    finished: AtomicBool,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        run_query(&self.client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        run_execute(&self.client, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finished.store(true, Ordering::Relaxed);
        run_control(&self.client, "COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finished.store(true, Ordering::Relaxed);
        run_control(&self.client, "ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if self.finished.load(Ordering::Relaxed) {
            return;
        }
        warn!("transaction dropped without commit or rollback, rolling back");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = Arc::clone(&self.client);
            handle.spawn(async move {
                if let Err(e) = client.batch_execute("ROLLBACK").await {
                    warn!(error = %e, "rollback of dropped transaction failed");
                }
            });
        }
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn Connection>> {
        let url = params.url()?;
        let (client, connection) = tokio_postgres::connect(&url, NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        Ok(Box::new(PgConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}
