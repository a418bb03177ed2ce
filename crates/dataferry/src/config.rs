//! Environment configuration
//!
//! | variable              | meaning                                   |
//! |-----------------------|-------------------------------------------|
//! | `MYSQL_ROOT_USER`     | source user                               |
//! | `MYSQL_ROOT_PASSWORD` | source password                           |
//! | `MYSQL_HOST`          | source host                               |
//! | `MYSQL_PORT`          | source port                               |
//! | `MYSQL_DATABASE`      | source database, also the ingest schema   |
//! | `POSTGRES_USER`       | destination user                          |
//! | `POSTGRES_PASSWORD`   | destination password                      |
//! | `POSTGRES_HOST`       | destination host                          |
//! | `POSTGRES_PORT`       | destination port                          |
//! | `POSTGRES_DATABASE`   | destination database                      |
//! | `POSTGRES_SCHEMA`     | destination schema (default `public`)     |
//! | `RAW_DATA_PATH`       | raw CSV directory (default `data/raw`)    |
//! | `DATAFERRY_ECHO`      | log every statement (default `false`)     |

use dataferry_rdbc::connection::ConnectionParams;
use std::path::PathBuf;

use crate::error::{MigrationError, Result};

/// Raw data directory when `RAW_DATA_PATH` is unset
pub const DEFAULT_RAW_DATA_PATH: &str = "data/raw";

/// Destination schema when `POSTGRES_SCHEMA` is unset
pub const DEFAULT_DESTINATION_SCHEMA: &str = "public";

/// Resolved settings for one pipeline run
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// MySQL connection
    pub source: ConnectionParams,
    /// PostgreSQL connection
    pub destination: ConnectionParams,
    /// Schema receiving the ingested files (the MySQL database)
    pub source_schema: String,
    /// Schema receiving the migrated tables
    pub destination_schema: String,
    /// Directory holding the raw CSV files
    pub raw_data_path: PathBuf,
}

impl MigrationConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let echo = env.flag("DATAFERRY_ECHO")?;

        let source_schema = env.required("MYSQL_DATABASE")?;
        let source = ConnectionParams::new(
            "mysql",
            env.required("MYSQL_HOST")?,
            env.port("MYSQL_PORT")?,
            env.required("MYSQL_ROOT_USER")?,
            env.required("MYSQL_ROOT_PASSWORD")?,
            source_schema.clone(),
        )
        .with_echo(echo);

        let destination = ConnectionParams::new(
            "postgresql",
            env.required("POSTGRES_HOST")?,
            env.port("POSTGRES_PORT")?,
            env.required("POSTGRES_USER")?,
            env.required("POSTGRES_PASSWORD")?,
            env.required("POSTGRES_DATABASE")?,
        )
        .with_echo(echo);

        Ok(Self {
            source,
            destination,
            source_schema,
            destination_schema: env
                .optional("POSTGRES_SCHEMA")
                .unwrap_or_else(|| DEFAULT_DESTINATION_SCHEMA.to_string()),
            raw_data_path: env
                .optional("RAW_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RAW_DATA_PATH)),
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| MigrationError::config(format!("missing environment variable {}", key)))
    }

    fn port(&self, key: &str) -> Result<u16> {
        let raw = self.required(key)?;
        raw.trim().parse().map_err(|_| {
            MigrationError::config(format!("{} must be a port number, got '{}'", key, raw))
        })
    }

    fn flag(&self, key: &str) -> Result<bool> {
        match self.optional(key).map(|v| v.to_lowercase()).as_deref() {
            None | Some("false") | Some("0") | Some("no") => Ok(false),
            Some("true") | Some("1") | Some("yes") => Ok(true),
            Some(other) => Err(MigrationError::config(format!(
                "{} must be true or false, got '{}'",
                key, other
            ))),
        }
    }
}
