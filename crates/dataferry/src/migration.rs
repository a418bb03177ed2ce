//! Migration orchestrator
//!
//! A run has two stages, executed strictly in sequence:
//!
//! 1. **Ingest**: every file in the raw-data directory is parsed as CSV and
//!    loaded into the source database, replacing the table named after it.
//! 2. **Migrate**: every `(table, query)` pair of the job reads a dataset from
//!    the source and replaces the table in the destination schema.
//!
//! The first error ends the run. Rerunning is safe because every load
//! replaces its table.

use dataferry_rdbc::client::DatabaseClient;
use dataferry_rdbc::loader::{LoadOptions, LoadReport};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};

use crate::catalog::MigrationJob;
use crate::config::MigrationConfig;
use crate::csv_source::{list_files, read_csv, table_name_for};
use crate::error::Result;

/// Where each stage reads from and writes to
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    /// Directory of raw CSV files
    pub raw_data_path: PathBuf,
    /// Schema of the ingested tables in the source database
    pub source_schema: String,
    /// Schema of the migrated tables in the destination database
    pub destination_schema: String,
}

impl From<&MigrationConfig> for MigrationSettings {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            raw_data_path: config.raw_data_path.clone(),
            source_schema: config.source_schema.clone(),
            destination_schema: config.destination_schema.clone(),
        }
    }
}

/// Loads written by one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationSummary {
    /// One report per ingested file
    pub ingested: Vec<LoadReport>,
    /// One report per migrated table
    pub migrated: Vec<LoadReport>,
}

impl MigrationSummary {
    /// Rows written across both stages
    pub fn total_rows(&self) -> usize {
        self.ingested
            .iter()
            .chain(&self.migrated)
            .map(|r| r.rows)
            .sum()
    }
}

/// Ingest and migration between a source and a destination database
#[derive(Debug)]
pub struct Migration {
    source: DatabaseClient,
    destination: DatabaseClient,
    job: MigrationJob,
    settings: MigrationSettings,
}

impl Migration {
    /// Migration running the standard job
    pub fn new(
        source: DatabaseClient,
        destination: DatabaseClient,
        settings: MigrationSettings,
    ) -> Self {
        Self {
            source,
            destination,
            job: MigrationJob::standard(),
            settings,
        }
    }

    /// Build both clients from the configuration
    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        let source = DatabaseClient::from_params(config.source.clone())?;
        let destination = DatabaseClient::from_params(config.destination.clone())?;
        Ok(Self::new(source, destination, config.into()))
    }

    /// Replace the job (builder pattern)
    pub fn with_job(mut self, job: MigrationJob) -> Self {
        self.job = job;
        self
    }

    /// The job's pairs
    pub fn job(&self) -> &MigrationJob {
        &self.job
    }

    /// Load every raw-data file into the source database
    pub async fn ingest_files(&self) -> Result<Vec<LoadReport>> {
        let dir = &self.settings.raw_data_path;
        let files = list_files(dir)?;
        info!(path = %dir.display(), files = files.len(), "Ingesting raw data files");

        let options = LoadOptions::replace(self.settings.source_schema.as_str());
        let mut reports = Vec::with_capacity(files.len());

        for path in files {
            let table = match table_name_for(&path) {
                Ok(table) => table,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Cannot derive table name for raw data file");
                    return Err(e);
                }
            };
            let dataset = match read_csv(&path) {
                Ok(dataset) => dataset,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to read raw data file");
                    return Err(e);
                }
            };
            reports.push(self.source.load(&dataset, &table, &options, None).await?);
        }
        Ok(reports)
    }

    /// Copy every job query result from the source to the destination
    pub async fn migrate(&self) -> Result<Vec<LoadReport>> {
        let options = LoadOptions::replace(self.settings.destination_schema.as_str());
        let mut reports = Vec::with_capacity(self.job.len());

        for (table, query) in self.job.iter() {
            info!(table = %table, query = query.name, "Migrating query result");
            let dataset = self.source.read_dataset(query.sql, &[], None).await?;
            reports.push(self.destination.load(&dataset, table, &options, None).await?);
        }
        Ok(reports)
    }

    /// Ingest, then migrate
    pub async fn run(&self) -> Result<MigrationSummary> {
        let start = Instant::now();
        let ingested = self.ingest_files().await?;
        let migrated = self.migrate().await?;

        let summary = MigrationSummary { ingested, migrated };
        info!(
            ingested = summary.ingested.len(),
            migrated = summary.migrated.len(),
            rows = summary.total_rows(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Migration finished"
        );
        Ok(summary)
    }
}
