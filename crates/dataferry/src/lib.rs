//! # dataferry
//!
//! Two-stage data pipeline:
//!
//! 1. every CSV file in the raw-data directory is loaded into MySQL, one
//!    table per file;
//! 2. a fixed set of named queries runs against MySQL and each result
//!    replaces a table in PostgreSQL.
//!
//! ```rust,ignore
//! use dataferry::{Migration, MigrationConfig};
//!
//! let config = MigrationConfig::from_env()?;
//! let summary = Migration::from_config(&config)?.run().await?;
//! println!("{} rows written", summary.total_rows());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod csv_source;
pub mod error;
pub mod migration;

pub use catalog::{MigrationJob, NamedQuery};
pub use config::MigrationConfig;
pub use error::{MigrationError, Result};
pub use migration::{Migration, MigrationSettings, MigrationSummary};
