//! SQL dialect abstraction for dataferry-rdbc
//!
//! Statement text differs between PostgreSQL and MySQL in identifier
//! quoting, placeholders, catalog queries and type names. The dialects
//! use sea-query for DML/DROP generation and hand-built SQL where
//! sea-query would need static type information (CREATE TABLE with
//! types taken from a dataset).

use crate::connection::DatabaseType;
use crate::error::Result;
use crate::security::{escape_string_literal, validate_sql_type_name};
use crate::types::ColumnMetadata;
use sea_query::{
    Alias, Expr, IntoIden, MysqlQueryBuilder, PostgresQueryBuilder, Query, QueryBuilder,
    SchemaBuilder, Table, TableRef,
};

fn sea_table_ref(schema: Option<&str>, table: &str) -> TableRef {
    match schema {
        Some(s) => TableRef::SchemaTable(Alias::new(s).into_iden(), Alias::new(table).into_iden()),
        None => TableRef::Table(Alias::new(table).into_iden()),
    }
}

fn drop_table<B: SchemaBuilder>(builder: B, schema: Option<&str>, table: &str) -> String {
    Table::drop()
        .table(sea_table_ref(schema, table))
        .if_exists()
        .to_string(builder)
}

fn bulk_insert<B, P>(
    builder: B,
    schema: Option<&str>,
    table: &str,
    columns: &[&str],
    rows: usize,
    placeholder: P,
) -> String
where
    B: QueryBuilder,
    P: Fn(usize) -> String,
{
    let col_idens: Vec<_> = columns.iter().map(|c| Alias::new(*c).into_iden()).collect();

    let mut stmt = Query::insert();
    stmt.into_table(sea_table_ref(schema, table)).columns(col_idens);

    let width = columns.len();
    for row in 0..rows {
        stmt.values_panic((0..width).map(|col| Expr::cust(placeholder(row * width + col + 1))));
    }

    stmt.to_string(builder)
}

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Get the placeholder for a parameter (1-based; e.g. `$1` or `?`)
    fn placeholder(&self, index: usize) -> String;

    /// Quoted `schema.table`, or just the table without a schema
    fn qualified_name(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(s) => format!(
                "{}.{}",
                self.quote_identifier(s),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    /// SQL returning one row with one boolean-like column: does the table exist
    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String;

    /// SQL listing a table's column names (first column) in ordinal order
    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String;

    /// Native column type for a portable type name
    fn native_type(&self, column: &ColumnMetadata) -> String;

    /// `DROP TABLE IF EXISTS`
    fn drop_table_sql(&self, schema: Option<&str>, table: &str) -> String;

    /// Multi-row parameterized INSERT for `rows` rows of `columns`
    fn insert_sql(&self, schema: Option<&str>, table: &str, columns: &[&str], rows: usize)
        -> String;

    /// `CREATE TABLE` with one column per entry, typed via [`native_type`](Self::native_type)
    fn create_table_sql(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[ColumnMetadata],
    ) -> Result<String> {
        let mut defs = Vec::with_capacity(columns.len());
        for column in columns {
            let native = self.native_type(column);
            validate_sql_type_name(&native)?;
            defs.push(format!("{} {}", self.quote_identifier(&column.name), native));
        }
        Ok(format!(
            "CREATE TABLE {} ({})",
            self.qualified_name(schema, table),
            defs.join(", ")
        ))
    }
}

// ===========================================================================
// PostgreSQL
// ===========================================================================

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema = escape_string_literal(schema.unwrap_or("public"));
        let table = escape_string_literal(table);
        format!(
            "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_schema = '{}' AND table_name = '{}')",
            schema, table
        )
    }

    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema = escape_string_literal(schema.unwrap_or("public"));
        let table = escape_string_literal(table);
        format!(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = '{}' AND table_name = '{}' ORDER BY ordinal_position",
            schema, table
        )
    }

    fn native_type(&self, column: &ColumnMetadata) -> String {
        match column.type_name.to_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => "BOOLEAN".to_string(),
            "TINYINT" | "SMALLINT" | "INT16" => "SMALLINT".to_string(),
            "INTEGER" | "INT" | "INT32" => "INTEGER".to_string(),
            "BIGINT" | "INT64" => "BIGINT".to_string(),
            "REAL" | "FLOAT" | "FLOAT32" => "REAL".to_string(),
            "DOUBLE PRECISION" | "FLOAT64" | "DOUBLE" => "DOUBLE PRECISION".to_string(),
            "DECIMAL" | "NUMERIC" => match (column.precision, column.scale) {
                (Some(p), Some(s)) => format!("NUMERIC({},{})", p, s),
                (Some(p), None) => format!("NUMERIC({})", p),
                _ => "NUMERIC".to_string(),
            },
            "VARCHAR" | "STRING" => match column.max_length {
                Some(len) => format!("VARCHAR({})", len),
                None => "TEXT".to_string(),
            },
            "TEXT" => "TEXT".to_string(),
            "BYTEA" | "BYTES" | "BLOB" => "BYTEA".to_string(),
            "DATE" => "DATE".to_string(),
            "TIME" => "TIME".to_string(),
            "TIMESTAMP" | "DATETIME" => "TIMESTAMP".to_string(),
            "TIMESTAMPTZ" => "TIMESTAMPTZ".to_string(),
            "UUID" => "UUID".to_string(),
            "JSON" => "JSON".to_string(),
            "JSONB" => "JSONB".to_string(),
            other => other.to_string(),
        }
    }

    fn drop_table_sql(&self, schema: Option<&str>, table: &str) -> String {
        drop_table(PostgresQueryBuilder, schema, table)
    }

    fn insert_sql(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        rows: usize,
    ) -> String {
        bulk_insert(PostgresQueryBuilder, schema, table, columns, rows, |i| {
            self.placeholder(i)
        })
    }
}

// ===========================================================================
// MySQL
// ===========================================================================

/// MySQL dialect
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String {
        if let Some(db) = schema {
            format!(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_schema = '{}' AND table_name = '{}')",
                escape_string_literal(db), escape_string_literal(table)
            )
        } else {
            format!(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = '{}' AND table_schema = DATABASE())",
                escape_string_literal(table)
            )
        }
    }

    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String {
        let db_filter = schema
            .map(|s| format!("table_schema = '{}'", escape_string_literal(s)))
            .unwrap_or_else(|| "table_schema = DATABASE()".to_string());

        format!(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE {} AND table_name = '{}' ORDER BY ordinal_position",
            db_filter,
            escape_string_literal(table)
        )
    }

    fn native_type(&self, column: &ColumnMetadata) -> String {
        match column.type_name.to_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => "TINYINT(1)".to_string(),
            "TINYINT" => "TINYINT".to_string(),
            "SMALLINT" | "INT16" => "SMALLINT".to_string(),
            "INTEGER" | "INT" | "INT32" => "INT".to_string(),
            "BIGINT" | "INT64" => "BIGINT".to_string(),
            "REAL" | "FLOAT" | "FLOAT32" => "FLOAT".to_string(),
            "DOUBLE PRECISION" | "FLOAT64" | "DOUBLE" => "DOUBLE".to_string(),
            "DECIMAL" | "NUMERIC" => match (column.precision, column.scale) {
                (Some(p), Some(s)) => format!("DECIMAL({},{})", p, s),
                (Some(p), None) => format!("DECIMAL({})", p),
                _ => "DECIMAL(65,30)".to_string(),
            },
            "VARCHAR" | "STRING" => match column.max_length {
                Some(len) if len <= 16383 => format!("VARCHAR({})", len),
                _ => "TEXT".to_string(),
            },
            "TEXT" => "TEXT".to_string(),
            "BYTEA" | "BYTES" | "BLOB" => "BLOB".to_string(),
            "DATE" => "DATE".to_string(),
            "TIME" => "TIME".to_string(),
            "TIMESTAMP" | "DATETIME" | "TIMESTAMPTZ" => "DATETIME(6)".to_string(),
            "UUID" => "CHAR(36)".to_string(),
            "JSON" | "JSONB" => "JSON".to_string(),
            other => other.to_string(),
        }
    }

    fn drop_table_sql(&self, schema: Option<&str>, table: &str) -> String {
        drop_table(MysqlQueryBuilder, schema, table)
    }

    fn insert_sql(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        rows: usize,
    ) -> String {
        bulk_insert(MysqlQueryBuilder, schema, table, columns, rows, |i| {
            self.placeholder(i)
        })
    }
}

/// Get the dialect for a database type
pub fn dialect_for(database_type: DatabaseType) -> Box<dyn SqlDialect> {
    match database_type {
        DatabaseType::PostgreSQL => Box::new(PostgresDialect),
        DatabaseType::MySQL => Box::new(MySqlDialect),
    }
}
