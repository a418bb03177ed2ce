//! Database client: one provider shared by a query executor and a table loader

use std::sync::Arc;

use crate::connection::{Connection, ConnectionFactory, ConnectionParams};
use crate::dataset::Dataset;
use crate::error::Result;
use crate::executor::QueryExecutor;
use crate::loader::{LoadOptions, LoadReport, TableLoader};
use crate::provider::{ConnectionProvider, ScopedConnection};
use crate::retry::RetryPolicy;
use crate::types::{Row, Value};

/// Reads from and writes to one database
#[derive(Debug)]
pub struct DatabaseClient {
    provider: Arc<ConnectionProvider>,
    executor: QueryExecutor,
    loader: TableLoader,
}

impl DatabaseClient {
    /// Client over an existing provider
    pub fn new(provider: ConnectionProvider) -> Self {
        let provider = Arc::new(provider);
        Self {
            executor: QueryExecutor::new(Arc::clone(&provider)),
            loader: TableLoader::new(Arc::clone(&provider)),
            provider,
        }
    }

    /// Client whose backend is chosen from the dialect name
    pub fn from_params(params: ConnectionParams) -> Result<Self> {
        Ok(Self::new(ConnectionProvider::from_params(params)?))
    }

    /// Client over a specific connection factory
    pub fn with_factory(params: ConnectionParams, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self::new(ConnectionProvider::new(params, factory))
    }

    /// Replace the executor's retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = self.executor.with_retry_policy(policy);
        self
    }

    /// Connection provider
    pub fn provider(&self) -> &ConnectionProvider {
        &self.provider
    }

    /// Open a connection to share across several calls
    pub async fn connect(&self) -> Result<ScopedConnection> {
        self.provider.connect().await
    }

    /// See [`QueryExecutor::read_rows`]
    pub async fn read_rows(
        &self,
        query: &str,
        params: &[Value],
        existing: Option<&dyn Connection>,
    ) -> Result<Vec<Row>> {
        self.executor.read_rows(query, params, existing).await
    }

    /// See [`QueryExecutor::read_dataset`]
    pub async fn read_dataset(
        &self,
        query: &str,
        params: &[Value],
        existing: Option<&dyn Connection>,
    ) -> Result<Dataset> {
        self.executor.read_dataset(query, params, existing).await
    }

    /// See [`QueryExecutor::write`]
    pub async fn write(
        &self,
        statement: &str,
        params: &[Value],
        existing: Option<&dyn Connection>,
    ) -> Result<u64> {
        self.executor.write(statement, params, existing).await
    }

    /// See [`TableLoader::load`]
    pub async fn load(
        &self,
        dataset: &Dataset,
        table: &str,
        options: &LoadOptions,
        existing: Option<&dyn Connection>,
    ) -> Result<LoadReport> {
        self.loader.load(dataset, table, options, existing).await
    }
}
