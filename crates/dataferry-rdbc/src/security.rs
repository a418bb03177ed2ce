//! SQL safety helpers for text that cannot be parameterized.
//!
//! Catalog lookups interpolate table and schema names as string literals,
//! and DDL interpolates type names. Identifiers themselves are always
//! quoted by the dialect, so arbitrary file-derived table names are fine.

use crate::error::Error;

/// Escape a value for use inside a single-quoted SQL string literal.
///
/// # Examples
///
/// ```
/// use dataferry_rdbc::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("users"), "users");
/// assert_eq!(escape_string_literal("don't"), "don''t");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}

/// Validate a SQL type name for interpolation into DDL.
///
/// Allows letters, digits, underscores, parentheses, commas, spaces and
/// periods: `BIGINT`, `DOUBLE PRECISION`, `DECIMAL(65,30)`, `TINYINT(1)`.
///
/// ```
/// use dataferry_rdbc::security::validate_sql_type_name;
///
/// assert!(validate_sql_type_name("DECIMAL(10,2)").is_ok());
/// assert!(validate_sql_type_name("INT; DROP TABLE users--").is_err());
/// ```
pub fn validate_sql_type_name(type_name: &str) -> crate::Result<()> {
    if type_name.is_empty() {
        return Err(Error::schema("SQL type name cannot be empty"));
    }

    if type_name.len() > 255 {
        return Err(Error::schema(format!(
            "SQL type name too long: {} chars (max 255)",
            type_name.len()
        )));
    }

    if let Some(c) = type_name.chars().find(|c| {
        !(c.is_ascii_alphanumeric() || matches!(c, '_' | '(' | ')' | ',' | ' ' | '.'))
    }) {
        return Err(Error::schema(format!(
            "invalid SQL type name '{}': contains invalid character '{}'",
            type_name, c
        )));
    }

    Ok(())
}
