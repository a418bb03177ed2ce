//! MySQL backend for dataferry-rdbc
//!
//! Connection, transaction and factory on top of mysql_async.
//! Statements run over the binary protocol (`exec`), so values arrive
//! typed and are mapped using the column type reported by the server.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Column, Conn, Opts, OptsBuilder};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::connection::{Connection, ConnectionFactory, ConnectionParams, DatabaseType, Transaction};
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::types::{ColumnMetadata, Row, Value};

/// Character set id MySQL reports for binary strings
const BINARY_CHARSET: u16 = 63;

/// Convert a Value to a MySQL compatible parameter
fn value_to_sql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Int16(n) => mysql_async::Value::from(*n),
        Value::Int32(n) => mysql_async::Value::from(*n),
        Value::Int64(n) => mysql_async::Value::from(*n),
        Value::Float32(n) => mysql_async::Value::from(*n),
        Value::Float64(n) => mysql_async::Value::from(*n),
        Value::Decimal(d) => mysql_async::Value::from(d.to_string()),
        Value::String(s) => mysql_async::Value::from(s.clone()),
        Value::Bytes(b) => mysql_async::Value::from(b.clone()),
        Value::Date(d) => {
            mysql_async::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0)
        }
        Value::Time(t) => mysql_async::Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => datetime_to_sql(dt),
        Value::DateTimeTz(dt) => datetime_to_sql(&dt.naive_utc()),
        Value::Uuid(u) => mysql_async::Value::from(u.to_string()),
        Value::Json(j) => mysql_async::Value::from(j.to_string()),
    }
}

fn datetime_to_sql(dt: &NaiveDateTime) -> mysql_async::Value {
    let (date, time) = (dt.date(), dt.time());
    mysql_async::Value::Date(
        date.year() as u16,
        date.month() as u8,
        date.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        time.nanosecond() / 1000,
    )
}

fn to_params(params: &[Value]) -> Vec<mysql_async::Value> {
    params.iter().map(value_to_sql).collect()
}

/// Convert a MySQL value to a Value, guided by the column type and charset
fn mysql_value_to_value(val: mysql_async::Value, column: &Column) -> Value {
    let column_type = column.column_type();
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(b) => bytes_to_value(b, column),
        mysql_async::Value::Int(n) => Value::Int64(n),
        mysql_async::Value::UInt(n) => match i64::try_from(n) {
            Ok(n) => Value::Int64(n),
            Err(_) => Value::Decimal(rust_decimal::Decimal::from(n)),
        },
        mysql_async::Value::Float(f) => Value::Float32(f),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let Some(date) = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32) else {
                return Value::Null;
            };
            if matches!(column_type, ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE) {
                return Value::Date(date);
            }
            NaiveTime::from_hms_micro_opt(hour as u32, min as u32, sec as u32, micro)
                .map(|time| Value::DateTime(NaiveDateTime::new(date, time)))
                .unwrap_or(Value::Null)
        }
        mysql_async::Value::Time(neg, days, hour, min, sec, micro) => {
            if !neg && days == 0 {
                if let Some(time) =
                    NaiveTime::from_hms_micro_opt(hour as u32, min as u32, sec as u32, micro)
                {
                    return Value::Time(time);
                }
            }
            // out of NaiveTime range: keep MySQL's own rendering
            let hours = days * 24 + hour as u32;
            Value::String(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                if neg { "-" } else { "" },
                hours,
                min,
                sec,
                micro
            ))
        }
    }
}

fn bytes_to_value(b: Vec<u8>, column: &Column) -> Value {
    if is_binary_string(column) {
        return Value::Bytes(b);
    }
    let text = match String::from_utf8(b) {
        Ok(s) => s,
        Err(e) => return Value::Bytes(e.into_bytes()),
    };
    match column.column_type() {
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            rust_decimal::Decimal::from_str(&text)
                .map(Value::Decimal)
                .unwrap_or(Value::String(text))
        }
        ColumnType::MYSQL_TYPE_JSON => serde_json::from_str(&text)
            .map(Value::Json)
            .unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

/// BINARY, VARBINARY and BLOB columns
fn is_binary_string(column: &Column) -> bool {
    matches!(
        column.column_type(),
        ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_BLOB
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_STRING
            | ColumnType::MYSQL_TYPE_VARCHAR
    ) && column.character_set() == BINARY_CHARSET
}

/// Portable type name for a MySQL result column
fn mysql_type_name(column: &Column) -> &'static str {
    match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => "BIGINT",
        ColumnType::MYSQL_TYPE_FLOAT => "REAL",
        ColumnType::MYSQL_TYPE_DOUBLE => "DOUBLE PRECISION",
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => "DATE",
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => "TIME",
        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => "TIMESTAMP",
        ColumnType::MYSQL_TYPE_JSON => "JSON",
        ColumnType::MYSQL_TYPE_NULL => "",
        _ if is_binary_string(column) => "BYTEA",
        _ => "TEXT",
    }
}

fn convert_row(row: mysql_async::Row) -> Row {
    let columns: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect();
    let values = row_values(&row);
    Row::new(columns, values)
}

fn row_values(row: &mysql_async::Row) -> Vec<Value> {
    row.columns_ref()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let val: mysql_async::Value = row.get(i).unwrap_or(mysql_async::Value::NULL);
            mysql_value_to_value(val, col)
        })
        .collect()
}

async fn run_query(conn: &mut Conn, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let result: Vec<mysql_async::Row> = conn
        .exec(sql, to_params(params))
        .await
        .map_err(|e| Error::driver(sql, e))?;
    Ok(result.into_iter().map(convert_row).collect())
}

async fn run_execute(conn: &mut Conn, sql: &str, params: &[Value]) -> Result<u64> {
    conn.exec_drop(sql, to_params(params))
        .await
        .map_err(|e| Error::driver(sql, e))?;
    Ok(conn.affected_rows())
}

async fn run_control(conn: &mut Conn, sql: &str) -> Result<()> {
    conn.query_drop(sql)
        .await
        .map_err(|e| Error::transaction_with_source(format!("{} failed", sql), e))
}

/// MySQL connection implementation
pub struct MySqlConnection {
    conn: Arc<Mutex<Option<Conn>>>,
    database: String,
    in_transaction: Arc<AtomicBool>,
}

impl MySqlConnection {
    /// Create a new MySQL connection from an existing connection
    pub fn new(conn: Conn, database: String) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            database,
            in_transaction: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the database name this connection is connected to
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Open a connection from parameters
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        let url = params.url()?;
        let opts = Opts::from_url(&url)
            .map_err(|e| Error::config(format!("invalid MySQL connection string: {}", e)))?;

        let conn = Conn::new(OptsBuilder::from_opts(opts))
            .await
            .map_err(|e| Error::connection_with_source("failed to connect to MySQL", e))?;

        Ok(Self::new(conn, params.database.clone()))
    }

    async fn take_conn(&self) -> Option<Conn> {
        self.conn.lock().await.take()
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("connection not available"))?;
        run_query(conn, sql, params).await
    }

    async fn query_table(&self, sql: &str, params: &[Value]) -> Result<Dataset> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("connection not available"))?;

        let result = conn
            .exec_iter(sql, to_params(params))
            .await
            .map_err(|e| Error::driver(sql, e))?;

        let columns: Vec<ColumnMetadata> = result
            .columns()
            .map(|cols| {
                cols.iter()
                    .enumerate()
                    .map(|(i, c)| {
                        ColumnMetadata::new(c.name_str(), mysql_type_name(c))
                            .with_ordinal(i as u32 + 1)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let rows: Vec<mysql_async::Row> = result
            .collect_and_drop()
            .await
            .map_err(|e| Error::driver(sql, e))?;

        Dataset::new(columns, rows.iter().map(row_values).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("connection not available"))?;
        run_execute(conn, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        {
            let mut guard = self.conn.lock().await;
            let conn = guard
                .as_mut()
                .ok_or_else(|| Error::connection("connection not available"))?;
            run_control(conn, "BEGIN").await?;
        }

        self.in_transaction.store(true, Ordering::SeqCst);

        Ok(Box::new(MySqlTransaction {
            conn: Arc::clone(&self.conn),
            in_transaction: Arc::clone(&self.in_transaction),
        }))
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.take_conn().await {
            conn.disconnect()
                .await
                .map_err(|e| Error::connection_with_source("failed to close connection", e))?;
        }
        Ok(())
    }
}

/// Transaction scoped to the session of its parent connection.
///
/// Uses explicit BEGIN/COMMIT/ROLLBACK on the shared session instead of
/// `mysql_async::Transaction`, which would borrow the connection.
pub struct MySqlTransaction {
    conn: Arc<Mutex<Option<Conn>>>,
    in_transaction: Arc<AtomicBool>,
}

impl MySqlTransaction {
    async fn finish(&self, sql: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::transaction("transaction not available"))?;
        let outcome = run_control(conn, sql).await;
        self.in_transaction.store(false, Ordering::SeqCst);
        outcome
    }
}

#[async_trait]
impl Transaction for MySqlTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::transaction("transaction not available"))?;
        run_query(conn, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::transaction("transaction not available"))?;
        run_execute(conn, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for MySqlTransaction {
    fn drop(&mut self) {
        if !self.in_transaction.load(Ordering::SeqCst) {
            return;
        }
        warn!("transaction dropped without commit or rollback, rolling back");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let conn = Arc::clone(&self.conn);
            let in_transaction = Arc::clone(&self.in_transaction);
            handle.spawn(async move {
                if let Some(c) = conn.lock().await.as_mut() {
                    if let Err(e) = run_control(c, "ROLLBACK").await {
                        warn!(error = %e, "rollback of dropped transaction failed");
                    }
                }
                in_transaction.store(false, Ordering::SeqCst);
            });
        }
    }
}

/// MySQL connection factory
#[derive(Debug, Clone, Default)]
pub struct MySqlConnectionFactory;

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    async fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn Connection>> {
        let conn = MySqlConnection::connect(params).await?;
        Ok(Box::new(conn))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}
