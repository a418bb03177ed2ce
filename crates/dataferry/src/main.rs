//! dataferry - load raw CSV files into MySQL, then migrate the named
//! query results into PostgreSQL
//!
//! Usage:
//!   # Configuration comes from the environment (see `dataferry::config`)
//!   dataferry
//!
//!   # Log every statement
//!   DATAFERRY_ECHO=true RUST_LOG=debug dataferry

use anyhow::Context;
use dataferry::{Migration, MigrationConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MigrationConfig::from_env().context("failed to read configuration")?;
    tracing::info!(
        source = %config.source.redacted_url(),
        destination = %config.destination.redacted_url(),
        raw_data_path = %config.raw_data_path.display(),
        "Starting dataferry"
    );

    let migration = Migration::from_config(&config)?;
    let summary = migration.run().await?;

    for report in summary.ingested.iter().chain(&summary.migrated) {
        tracing::info!(
            table = %report.table,
            rows = report.rows,
            action = %report.action,
            "Table written"
        );
    }
    Ok(())
}
