//! Table loader
//!
//! Writes a [`Dataset`] into `schema.table` under an [`ExistencePolicy`]:
//!
//! | policy    | table missing | table present                      |
//! |-----------|---------------|------------------------------------|
//! | `Fail`    | create, fill  | error                              |
//! | `Replace` | create, fill  | drop, recreate, fill               |
//! | `Append`  | create, fill  | check column names, append rows    |
//!
//! Rows go out as multi-row parameterized INSERTs. Loads are not retried.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::connection::{Connection, Transaction};
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::provider::ConnectionProvider;
use crate::types::{ColumnMetadata, Row, Value};

/// Rows per INSERT statement when no chunk size is given
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Upper bound on bind parameters in one statement (PostgreSQL and MySQL limit)
pub const MAX_BIND_PARAMS: usize = 65535;

/// What to do when the destination table already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistencePolicy {
    /// Add rows to the existing table
    #[default]
    Append,
    /// Drop and recreate the table
    Replace,
    /// Refuse to write
    Fail,
}

impl FromStr for ExistencePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            "fail" => Ok(Self::Fail),
            other => Err(Error::config(format!(
                "unknown existence policy '{}' (expected append, replace or fail)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ExistencePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Append => write!(f, "append"),
            Self::Replace => write!(f, "replace"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Options for one load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Destination schema; the connection's default when `None`
    #[serde(default)]
    pub schema: Option<String>,
    /// Existing-table handling
    #[serde(default)]
    pub if_exists: ExistencePolicy,
    /// Write the row index as a leading column
    #[serde(default = "default_index")]
    pub index: bool,
    /// Name of the index column; the dataset's label when `None`
    #[serde(default)]
    pub index_label: Option<String>,
    /// Rows per INSERT statement
    #[serde(default)]
    pub chunk_size: Option<usize>,
    /// Run the whole load in one transaction
    #[serde(default)]
    pub transactional: bool,
}

fn default_index() -> bool {
    true
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            schema: None,
            if_exists: ExistencePolicy::Append,
            index: true,
            index_label: None,
            chunk_size: None,
            transactional: false,
        }
    }
}

impl LoadOptions {
    /// Default options: append, with index
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the table in `schema`, no index column
    pub fn replace(schema: impl Into<String>) -> Self {
        Self::new()
            .schema(schema)
            .if_exists(ExistencePolicy::Replace)
            .with_index(false)
    }

    /// Set the destination schema
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set the existence policy
    pub fn if_exists(mut self, policy: ExistencePolicy) -> Self {
        self.if_exists = policy;
        self
    }

    /// Include or omit the index column
    pub fn with_index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }

    /// Set the index column name
    pub fn index_label(mut self, label: impl Into<String>) -> Self {
        self.index_label = Some(label.into());
        self
    }

    /// Set rows per INSERT
    pub fn chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = Some(rows);
        self
    }

    /// Wrap the load in a transaction
    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    /// `schema.table`, or just `table`
    pub fn destination(&self, table: &str) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, table),
            None => table.to_string(),
        }
    }
}

/// How the destination table was prepared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableAction {
    /// Table did not exist
    Created,
    /// Table was dropped and recreated
    Replaced,
    /// Rows were added to the existing table
    Appended,
}

impl std::fmt::Display for TableAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Replaced => write!(f, "replaced"),
            Self::Appended => write!(f, "appended"),
        }
    }
}

/// Outcome of a successful load
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    /// `schema.table`
    pub table: String,
    /// Rows written
    pub rows: usize,
    /// Columns written, index included
    pub columns: usize,
    /// How the table was prepared
    pub action: TableAction,
    /// Wall time of the load
    pub duration: Duration,
}

/// Statement target: plain connection or open transaction
enum Executor<'a> {
    Connection(&'a dyn Connection),
    Transaction(&'a dyn Transaction),
}

impl<'a> Executor<'a> {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        match self {
            Executor::Connection(conn) => conn.query(sql, params).await,
            Executor::Transaction(tx) => tx.query(sql, params).await,
        }
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        match self {
            Executor::Connection(conn) => conn.execute(sql, params).await,
            Executor::Transaction(tx) => tx.execute(sql, params).await,
        }
    }
}

/// Bulk-writes datasets into one database
#[derive(Debug)]
pub struct TableLoader {
    provider: Arc<ConnectionProvider>,
}

impl TableLoader {
    /// Loader writing through `provider`
    pub fn new(provider: Arc<ConnectionProvider>) -> Self {
        Self { provider }
    }

    /// Write `dataset` into `table`.
    ///
    /// Uses `existing` when given, otherwise a fresh connection that is
    /// closed afterwards. Every failure is returned as a load error for
    /// the destination.
    pub async fn load(
        &self,
        dataset: &Dataset,
        table: &str,
        options: &LoadOptions,
        existing: Option<&dyn Connection>,
    ) -> Result<LoadReport> {
        let destination = options.destination(table);
        let start = Instant::now();

        let conn = match self.provider.acquire(existing).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(table = %destination, error = %e, "Failed to open connection for load");
                return Err(Error::load_failed(destination, e));
            }
        };

        let outcome = self.load_on(&*conn, dataset, table, options).await;
        match outcome {
            Ok((action, columns)) => {
                conn.release().await;
                let report = LoadReport {
                    table: destination,
                    rows: dataset.len(),
                    columns,
                    action,
                    duration: start.elapsed(),
                };
                info!(
                    table = %report.table,
                    rows = report.rows,
                    columns = report.columns,
                    action = %report.action,
                    "Saved dataset"
                );
                Ok(report)
            }
            Err(e) => {
                error!(table = %destination, error = %e, "Load failed");
                conn.close().await;
                Err(Error::load_failed(destination, e))
            }
        }
    }

    async fn load_on(
        &self,
        conn: &dyn Connection,
        dataset: &Dataset,
        table: &str,
        options: &LoadOptions,
    ) -> Result<(TableAction, usize)> {
        let columns = table_columns(dataset, options)?;

        if !options.transactional {
            let action = self
                .write_table(&Executor::Connection(conn), dataset, table, &columns, options)
                .await?;
            return Ok((action, columns.len()));
        }

        let tx = conn.begin().await?;
        let written = self
            .write_table(&Executor::Transaction(tx.as_ref()), dataset, table, &columns, options)
            .await;
        match written {
            Ok(action) => {
                tx.commit().await?;
                Ok((action, columns.len()))
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "Rollback of load failed");
                }
                Err(e)
            }
        }
    }

    async fn write_table(
        &self,
        exec: &Executor<'_>,
        dataset: &Dataset,
        table: &str,
        columns: &[ColumnMetadata],
        options: &LoadOptions,
    ) -> Result<TableAction> {
        let dialect = self.provider.dialect();
        let schema = options.schema.as_deref();
        let destination = options.destination(table);

        let exists = exec
            .query(&dialect.table_exists_sql(schema, table), &[])
            .await?
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let create = dialect.create_table_sql(schema, table, columns)?;

        let action = match (exists, options.if_exists) {
            (true, ExistencePolicy::Fail) => {
                return Err(Error::load(destination, "table already exists"));
            }
            (true, ExistencePolicy::Replace) => {
                self.run(exec, &dialect.drop_table_sql(schema, table), &[]).await?;
                self.run(exec, &create, &[]).await?;
                TableAction::Replaced
            }
            (true, ExistencePolicy::Append) => {
                let existing = exec
                    .query(&dialect.list_columns_sql(schema, table), &[])
                    .await?;
                check_shape(&destination, &existing, columns)?;
                TableAction::Appended
            }
            (false, _) => {
                self.run(exec, &create, &[]).await?;
                TableAction::Created
            }
        };

        self.insert_rows(exec, dataset, table, columns, options).await?;
        Ok(action)
    }

    async fn insert_rows(
        &self,
        exec: &Executor<'_>,
        dataset: &Dataset,
        table: &str,
        columns: &[ColumnMetadata],
        options: &LoadOptions,
    ) -> Result<()> {
        let dialect = self.provider.dialect();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let chunk = rows_per_statement(names.len(), options.chunk_size);

        for (n, rows) in dataset.rows().chunks(chunk).enumerate() {
            let offset = n * chunk;
            let mut params = Vec::with_capacity(rows.len() * names.len());
            for (i, row) in rows.iter().enumerate() {
                if options.index {
                    params.push(Value::Int64((offset + i) as i64));
                }
                params.extend(row.iter().cloned());
            }

            let sql = dialect.insert_sql(options.schema.as_deref(), table, &names, rows.len());
            self.run(exec, &sql, &params).await?;
        }
        Ok(())
    }

    async fn run(&self, exec: &Executor<'_>, sql: &str, params: &[Value]) -> Result<u64> {
        if self.provider.echo() {
            info!(sql = %sql, params = params.len(), "Executing statement");
        }
        exec.execute(sql, params).await
    }
}

/// Columns of the destination table: optional index column, then the dataset's
fn table_columns(dataset: &Dataset, options: &LoadOptions) -> Result<Vec<ColumnMetadata>> {
    if dataset.columns().is_empty() {
        return Err(Error::schema("dataset has no columns"));
    }

    let mut columns = Vec::with_capacity(dataset.columns().len() + 1);
    if options.index {
        let label = options
            .index_label
            .as_deref()
            .unwrap_or_else(|| dataset.index_label());
        if dataset.column_index(label).is_some() {
            return Err(Error::schema(format!(
                "index label '{}' collides with a dataset column",
                label
            )));
        }
        columns.push(ColumnMetadata::new(label, "BIGINT").with_ordinal(0));
    }
    columns.extend(dataset.columns().iter().cloned());

    if columns.len() > MAX_BIND_PARAMS {
        return Err(Error::schema(format!(
            "{} columns exceed the bind parameter limit of {}",
            columns.len(),
            MAX_BIND_PARAMS
        )));
    }
    Ok(columns)
}

/// Rows per INSERT so that `rows * width` stays within [`MAX_BIND_PARAMS`]
fn rows_per_statement(width: usize, chunk_size: Option<usize>) -> usize {
    let limit = (MAX_BIND_PARAMS / width.max(1)).max(1);
    chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).clamp(1, limit)
}

fn check_shape(destination: &str, existing: &[Row], columns: &[ColumnMetadata]) -> Result<()> {
    let table_names: Vec<String> = existing
        .iter()
        .filter_map(|row| row.get(0).and_then(Value::as_string))
        .collect();

    let matches = table_names.len() == columns.len()
        && table_names
            .iter()
            .zip(columns)
            .all(|(t, c)| t.eq_ignore_ascii_case(&c.name));

    if matches {
        return Ok(());
    }

    let dataset_names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    Err(Error::load(
        destination,
        format!(
            "column mismatch: table has [{}], dataset has [{}]",
            table_names.join(", "),
            dataset_names.join(", ")
        ),
    ))
}
