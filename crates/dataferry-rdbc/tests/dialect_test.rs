//! Unit tests for dataferry-rdbc dialect module

use dataferry_rdbc::connection::DatabaseType;
use dataferry_rdbc::dialect::{dialect_for, MySqlDialect, PostgresDialect, SqlDialect};
use dataferry_rdbc::types::ColumnMetadata;

#[test]
fn test_mysql_quote_identifier() {
    let dialect = MySqlDialect;

    assert_eq!(dialect.quote_identifier("space_attendee"), "`space_attendee`");
    // Test escaping backticks
    assert_eq!(dialect.quote_identifier("my`table"), "`my``table`");
}

#[test]
fn test_postgres_placeholder() {
    let dialect = PostgresDialect;

    assert_eq!(dialect.placeholder(1), "$1");
    assert_eq!(dialect.placeholder(10), "$10");
}

#[test]
fn test_postgres_table_exists_defaults_to_public() {
    let sql = PostgresDialect.table_exists_sql(None, "weekly_activity");

    assert!(sql.starts_with("SELECT EXISTS("));
    assert!(sql.contains("table_schema = 'public'"));
    assert!(sql.contains("table_name = 'weekly_activity'"));
}

#[test]
fn test_mysql_table_exists_with_schema() {
    let sql = MySqlDialect.table_exists_sql(Some("raw"), "user");

    assert!(sql.contains("table_schema = 'raw'"));
    assert!(sql.contains("table_name = 'user'"));
    assert!(!sql.contains("DATABASE()"));
}

#[test]
fn test_list_columns_orders_by_position() {
    for dialect in [dialect_for(DatabaseType::PostgreSQL), dialect_for(DatabaseType::MySQL)] {
        let sql = dialect.list_columns_sql(Some("s"), "t");
        assert!(sql.starts_with("SELECT column_name"), "{}", dialect.name());
        assert!(sql.ends_with("ORDER BY ordinal_position"), "{}", dialect.name());
    }
}

#[test]
fn test_mysql_insert_sql() {
    let sql = MySqlDialect.insert_sql(Some("raw"), "user", &["ID", "email"], 3);

    assert_eq!(
        sql,
        "INSERT INTO `raw`.`user` (`ID`, `email`) VALUES (?, ?), (?, ?), (?, ?)"
    );
}

#[test]
fn test_postgres_insert_sql_single_row() {
    let sql = PostgresDialect.insert_sql(None, "t", &["only"], 1);

    assert_eq!(sql, "INSERT INTO \"t\" (\"only\") VALUES ($1)");
}

#[test]
fn test_mysql_create_table_sql() {
    let columns = vec![
        ColumnMetadata::new("index", "BIGINT"),
        ColumnMetadata::new("joinDate", "TEXT"),
        ColumnMetadata::new("is_host", "BOOLEAN"),
        ColumnMetadata::new("duration", "DOUBLE PRECISION"),
    ];
    let sql = MySqlDialect
        .create_table_sql(Some("raw"), "space_attendee", &columns)
        .unwrap();

    assert_eq!(
        sql,
        "CREATE TABLE `raw`.`space_attendee` (`index` BIGINT, `joinDate` TEXT, `is_host` TINYINT(1), `duration` DOUBLE)"
    );
}

#[test]
fn test_native_type_keeps_declared_lengths() {
    let mut column = ColumnMetadata::new("name", "VARCHAR");
    column.max_length = Some(64);
    assert_eq!(PostgresDialect.native_type(&column), "VARCHAR(64)");
    assert_eq!(MySqlDialect.native_type(&column), "VARCHAR(64)");

    let mut amount = ColumnMetadata::new("amount", "DECIMAL");
    amount.precision = Some(10);
    amount.scale = Some(2);
    assert_eq!(PostgresDialect.native_type(&amount), "NUMERIC(10,2)");
    assert_eq!(MySqlDialect.native_type(&amount), "DECIMAL(10,2)");
}

#[test]
fn test_temporal_types() {
    let ts = ColumnMetadata::new("joined", "TIMESTAMP");
    assert_eq!(PostgresDialect.native_type(&ts), "TIMESTAMP");
    assert_eq!(MySqlDialect.native_type(&ts), "DATETIME(6)");
}
