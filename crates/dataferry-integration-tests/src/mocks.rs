//! In-memory database for tests that run without Docker
//!
//! [`MemoryDatabase`] implements the connection traits over a map of
//! tables and understands the statements the table loader issues through
//! the PostgreSQL dialect: catalog lookups, `DROP TABLE IF EXISTS`,
//! `CREATE TABLE` and multi-row `INSERT`. Any other query is answered
//! from results registered with [`MemoryDatabase::with_result`] or
//! [`MemoryDatabase::with_rows`].
//!
//! Clones share state, so a test keeps one handle for assertions and
//! hands another to a client as its connection factory.

use async_trait::async_trait;
use dataferry_rdbc::connection::{
    Connection, ConnectionFactory, ConnectionParams, DatabaseType, Transaction,
};
use dataferry_rdbc::types::{Row, Value};
use dataferry_rdbc::{Dataset, Error, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Failure count that never runs out
pub const ALWAYS: u32 = u32::MAX;

const DEFAULT_SCHEMA: &str = "public";

/// A table held in memory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    /// `(name, native type)` in order
    pub columns: Vec<(String, String)>,
    /// Rows in insertion order
    pub rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    /// Table with typed columns and no rows
    pub fn new<I, N, T>(columns: I) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|(n, t)| (n.into(), t.into()))
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Add rows (builder pattern)
    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Native column types in order
    pub fn column_types(&self) -> Vec<&str> {
        self.columns.iter().map(|(_, t)| t.as_str()).collect()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|(n, _)| n == name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }
}

type TableKey = (String, String);
type Tables = BTreeMap<TableKey, MemoryTable>;

/// Registered answer to a query
#[derive(Debug, Clone)]
enum Answer {
    Dataset(Dataset),
    /// Raw rows, labels as given; `query_table` builds a dataset from them
    Rows(Vec<Row>),
}

impl Answer {
    fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Dataset(dataset) => dataset.into_rows(),
            Self::Rows(rows) => rows,
        }
    }

    fn into_dataset(self) -> Result<Dataset> {
        match self {
            Self::Dataset(dataset) => Ok(dataset),
            Self::Rows(rows) => Dataset::from_rows(rows),
        }
    }
}

#[derive(Debug)]
struct Failure {
    pattern: String,
    skip: u32,
    remaining: u32,
}

#[derive(Debug, Default)]
struct State {
    tables: Mutex<Tables>,
    results: Mutex<Vec<(String, Answer)>>,
    failures: Mutex<Vec<Failure>>,
    connect_failures: Mutex<u32>,
    statements: Mutex<Vec<String>>,
    next_id: AtomicU64,
    connects: AtomicU64,
    closes: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl State {
    /// Record `sql` and fail it if an injected failure matches
    fn observe(&self, sql: &str) -> Result<()> {
        lock(&self.statements).push(sql.to_string());

        let mut failures = lock(&self.failures);
        let Some(failure) = failures
            .iter_mut()
            .find(|f| f.remaining > 0 && sql.contains(&f.pattern))
        else {
            return Ok(());
        };

        if failure.skip > 0 {
            failure.skip -= 1;
            return Ok(());
        }
        if failure.remaining != ALWAYS {
            failure.remaining -= 1;
        }
        Err(Error::query_with_sql(
            format!("injected failure on '{}'", failure.pattern),
            sql,
        ))
    }

    fn registered(&self, sql: &str) -> Result<Answer> {
        lock(&self.results)
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, answer)| answer.clone())
            .ok_or_else(|| Error::query_with_sql("no result registered", sql))
    }

    fn query_on(&self, tables: &Tables, sql: &str) -> Result<Vec<Row>> {
        match parse(sql)? {
            Statement::TableExists(key) => Ok(vec![Row::new(
                vec!["exists".to_string()],
                vec![Value::Bool(tables.contains_key(&key))],
            )]),
            Statement::ListColumns(key) => {
                let names = vec!["column_name".to_string(), "data_type".to_string()];
                let rows = tables
                    .get(&key)
                    .map(|t| {
                        t.columns
                            .iter()
                            .map(|(n, ty)| {
                                Row::new(
                                    names.clone(),
                                    vec![Value::from(n.as_str()), Value::from(ty.as_str())],
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(rows)
            }
            Statement::Other => Ok(self.registered(sql)?.into_rows()),
            _ => Err(Error::query_with_sql("statement returns no rows", sql)),
        }
    }

    fn execute_on(&self, tables: &mut Tables, sql: &str, params: &[Value]) -> Result<u64> {
        match parse(sql)? {
            Statement::Drop(key) => {
                tables.remove(&key);
                Ok(0)
            }
            Statement::Create(key, columns) => {
                if tables.contains_key(&key) {
                    return Err(Error::query_with_sql(
                        format!("relation \"{}.{}\" already exists", key.0, key.1),
                        sql,
                    ));
                }
                tables.insert(key, MemoryTable::new(columns));
                Ok(0)
            }
            Statement::Insert(key, columns) => {
                let table = tables.get_mut(&key).ok_or_else(|| {
                    Error::query_with_sql(
                        format!("relation \"{}.{}\" does not exist", key.0, key.1),
                        sql,
                    )
                })?;
                if table.column_names() != columns.iter().map(String::as_str).collect::<Vec<_>>() {
                    return Err(Error::query_with_sql("column list does not match table", sql));
                }
                if columns.is_empty() || params.len() % columns.len() != 0 {
                    return Err(Error::query_with_sql(
                        format!("{} parameters for {} columns", params.len(), columns.len()),
                        sql,
                    ));
                }
                let rows: Vec<Vec<Value>> =
                    params.chunks(columns.len()).map(<[Value]>::to_vec).collect();
                let count = rows.len() as u64;
                table.rows.extend(rows);
                Ok(count)
            }
            Statement::Other => Ok(0),
            _ => Err(Error::query_with_sql("query used as statement", sql)),
        }
    }
}

/// Shared in-memory database; also its own connection factory
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<State>,
}

impl MemoryDatabase {
    /// Empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table (builder pattern)
    pub fn with_table(self, schema: &str, table: &str, contents: MemoryTable) -> Self {
        lock(&self.state.tables).insert((schema.to_string(), table.to_string()), contents);
        self
    }

    /// Answer queries containing `pattern` with `dataset` (builder pattern)
    pub fn with_result(self, pattern: &str, dataset: Dataset) -> Self {
        lock(&self.state.results).push((pattern.to_string(), Answer::Dataset(dataset)));
        self
    }

    /// Answer queries containing `pattern` with raw `rows` (builder pattern)
    pub fn with_rows(self, pattern: &str, rows: Vec<Row>) -> Self {
        lock(&self.state.results).push((pattern.to_string(), Answer::Rows(rows)));
        self
    }

    /// Fail the next `times` statements containing `pattern`
    pub fn fail_on(&self, pattern: &str, times: u32) {
        self.fail_after(pattern, 0, times);
    }

    /// Let `skip` matching statements succeed, then fail the next `times`
    pub fn fail_after(&self, pattern: &str, skip: u32, times: u32) {
        lock(&self.state.failures).push(Failure {
            pattern: pattern.to_string(),
            skip,
            remaining: times,
        });
    }

    /// Refuse the next `times` connection attempts
    pub fn fail_connects(&self, times: u32) {
        *lock(&self.state.connect_failures) = times;
    }

    /// Copy of a table
    pub fn table(&self, schema: &str, table: &str) -> Option<MemoryTable> {
        lock(&self.state.tables)
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
    }

    /// Table names in `schema`, sorted
    pub fn table_names(&self, schema: &str) -> Vec<String> {
        lock(&self.state.tables)
            .keys()
            .filter(|(s, _)| s == schema)
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Every statement received, in order
    pub fn statements(&self) -> Vec<String> {
        lock(&self.state.statements).clone()
    }

    /// Statements received that contain `pattern`
    pub fn statement_count(&self, pattern: &str) -> usize {
        lock(&self.state.statements)
            .iter()
            .filter(|s| s.contains(pattern))
            .count()
    }

    /// Connections opened
    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Connections closed
    pub fn closes(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> u64 {
        self.connects().saturating_sub(self.closes())
    }

    /// Transactions committed
    pub fn commits(&self) -> u64 {
        self.state.commits.load(Ordering::SeqCst)
    }

    /// Transactions rolled back
    pub fn rollbacks(&self) -> u64 {
        self.state.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MemoryDatabase {
    async fn connect(&self, _params: &ConnectionParams) -> Result<Box<dyn Connection>> {
        {
            let mut refused = lock(&self.state.connect_failures);
            if *refused > 0 {
                *refused -= 1;
                return Err(Error::connection("injected connection failure"));
            }
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}

/// One session on a [`MemoryDatabase`]
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    state: Arc<State>,
    closed: AtomicBool,
}

impl MemoryConnection {
    /// Sequence number of this session
    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        self.state.observe(sql)?;
        let tables = lock(&self.state.tables);
        self.state.query_on(&tables, sql)
    }

    async fn query_table(&self, sql: &str, params: &[Value]) -> Result<Dataset> {
        self.ensure_open()?;
        if let Statement::Other = parse(sql)? {
            self.state.observe(sql)?;
            return self.state.registered(sql)?.into_dataset();
        }
        Dataset::from_rows(self.query(sql, params).await?)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        self.state.observe(sql)?;
        let mut tables = lock(&self.state.tables);
        self.state.execute_on(&mut tables, sql, params)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        self.state.observe("BEGIN")?;
        let snapshot = lock(&self.state.tables).clone();
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            working: Mutex::new(snapshot),
        }))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Transaction over a private copy of the tables, published on commit
#[derive(Debug)]
pub struct MemoryTransaction {
    state: Arc<State>,
    working: Mutex<Tables>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.state.observe(sql)?;
        let tables = lock(&self.working);
        self.state.query_on(&tables, sql)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.state.observe(sql)?;
        let mut tables = lock(&self.working);
        self.state.execute_on(&mut tables, sql, params)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.state.observe("COMMIT")?;
        let working = self.working.into_inner().unwrap_or_else(PoisonError::into_inner);
        *lock(&self.state.tables) = working;
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.observe("ROLLBACK")?;
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Statement parsing
// ============================================================================

#[derive(Debug, PartialEq)]
enum Statement {
    TableExists(TableKey),
    ListColumns(TableKey),
    Drop(TableKey),
    Create(TableKey, Vec<(String, String)>),
    Insert(TableKey, Vec<String>),
    Other,
}

fn parse(sql: &str) -> Result<Statement> {
    let text = sql.trim();
    let parsed = if text.starts_with("SELECT EXISTS(") && text.contains("information_schema.tables")
    {
        catalog_target(text).map(Statement::TableExists)
    } else if text.starts_with("SELECT column_name") && text.contains("information_schema.columns")
    {
        catalog_target(text).map(Statement::ListColumns)
    } else if let Some(rest) = text.strip_prefix("DROP TABLE IF EXISTS ") {
        parse_table(rest).map(|(key, _)| Statement::Drop(key))
    } else if let Some(rest) = text.strip_prefix("CREATE TABLE ") {
        parse_create(rest)
    } else if let Some(rest) = text.strip_prefix("INSERT INTO ") {
        parse_insert(rest)
    } else {
        Some(Statement::Other)
    };
    parsed.ok_or_else(|| Error::query_with_sql("syntax error", sql))
}

/// Text up to the closing `quote`, with doubled quotes unescaped
fn until_quote(s: &str, quote: char) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != quote {
            value.push(c);
            continue;
        }
        if matches!(chars.peek(), Some((_, next)) if *next == quote) {
            value.push(quote);
            chars.next();
            continue;
        }
        return Some((value, &s[i + c.len_utf8()..]));
    }
    None
}

fn parse_ident(s: &str) -> Option<(String, &str)> {
    until_quote(s.trim_start().strip_prefix('"')?, '"')
}

fn parse_table(s: &str) -> Option<(TableKey, &str)> {
    let (first, rest) = parse_ident(s)?;
    match rest.strip_prefix('.') {
        Some(rest) => {
            let (table, rest) = parse_ident(rest)?;
            Some(((first, table), rest))
        }
        None => Some(((DEFAULT_SCHEMA.to_string(), first), rest)),
    }
}

fn literal_after(sql: &str, key: &str) -> Option<String> {
    let start = sql.find(key)? + key.len();
    until_quote(&sql[start..], '\'').map(|(value, _)| value)
}

fn catalog_target(sql: &str) -> Option<TableKey> {
    let schema =
        literal_after(sql, "table_schema = '").unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
    let table = literal_after(sql, "table_name = '")?;
    Some((schema, table))
}

fn parse_create(s: &str) -> Option<Statement> {
    let (key, rest) = parse_table(s)?;
    let mut body = rest.trim().strip_prefix('(')?.strip_suffix(')')?;

    let mut columns = Vec::new();
    loop {
        let (name, rest) = parse_ident(body)?;
        let mut depth = 0i32;
        let mut end = rest.len();
        for (i, c) in rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    end = i;
                    break;
                }
                _ => {}
            }
        }
        columns.push((name, rest[..end].trim().to_string()));
        if end == rest.len() {
            return Some(Statement::Create(key, columns));
        }
        body = &rest[end + 1..];
    }
}

fn parse_insert(s: &str) -> Option<Statement> {
    let (key, rest) = parse_table(s)?;
    let mut rest = rest.trim_start().strip_prefix('(')?;

    let mut columns = Vec::new();
    loop {
        let (name, after) = parse_ident(rest)?;
        columns.push(name);
        let after = after.trim_start();
        match after.strip_prefix(',') {
            Some(next) => rest = next,
            None => {
                after.strip_prefix(')')?.trim_start().strip_prefix("VALUES")?;
                return Some(Statement::Insert(key, columns));
            }
        }
    }
}
