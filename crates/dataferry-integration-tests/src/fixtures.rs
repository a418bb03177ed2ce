//! Test fixtures: MySQL and PostgreSQL containers
//!
//! Each fixture starts a server through testcontainers, waits until it
//! accepts queries and hands out [`ConnectionParams`] for the pipeline.
//! The container stops when the fixture is dropped.

use anyhow::Result;
use dataferry_rdbc::connection::ConnectionParams;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

const DATABASE: &str = "testdb";

/// Retry port retrieval to handle the testcontainers race on startup
async fn mapped_port<I: testcontainers::Image>(
    container: &testcontainers::ContainerAsync<I>,
    internal: u16,
    name: &str,
) -> Result<u16> {
    for i in 0..10u64 {
        match container.get_host_port_ipv4(internal).await {
            Ok(port) => return Ok(port),
            Err(e) => {
                tracing::debug!("Waiting for {} port exposure (attempt {}): {}", name, i + 1, e);
                sleep(Duration::from_millis(100 * (i + 1))).await;
            }
        }
    }
    anyhow::bail!("{} port not exposed after retries", name)
}

// ============================================================================
// MySQL Test Container
// ============================================================================

/// MySQL test container holding the ingested raw data
pub struct TestMysql {
    pub container: testcontainers::ContainerAsync<testcontainers_modules::mysql::Mysql>,
    pub host: String,
    pub port: u16,
}

impl TestMysql {
    /// Start a MySQL container with an empty `testdb` database
    pub async fn start() -> Result<Self> {
        use testcontainers::{runners::AsyncRunner, ImageExt};
        use testcontainers_modules::mysql::Mysql;

        let container = Mysql::default()
            .with_env_var("MYSQL_ROOT_PASSWORD", "rootpass")
            .with_env_var("MYSQL_DATABASE", DATABASE)
            .start()
            .await?;

        let host = container.get_host().await?.to_string();
        let port = mapped_port(&container, 3306, "MySQL").await?;

        let fixture = Self {
            container,
            host,
            port,
        };
        fixture.wait_until_ready().await?;
        Ok(fixture)
    }

    async fn wait_until_ready(&self) -> Result<()> {
        use mysql_async::prelude::Queryable;

        for i in 0..30 {
            let pool = self.pool();
            match pool.get_conn().await {
                Ok(mut conn) => {
                    if conn.query_drop("SELECT 1").await.is_ok() {
                        drop(conn);
                        pool.disconnect().await?;
                        info!("MySQL ready after {} attempts", i + 1);
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::debug!("Waiting for MySQL (attempt {}): {}", i + 1, e);
                }
            }
            sleep(Duration::from_millis(500)).await;
        }

        anyhow::bail!("MySQL did not become ready in time")
    }

    /// Connection URL for the root user
    pub fn url(&self) -> String {
        format!("mysql://root:rootpass@{}:{}/{}", self.host, self.port, DATABASE)
    }

    /// Get a mysql_async connection pool
    pub fn pool(&self) -> mysql_async::Pool {
        mysql_async::Pool::new(self.url().as_str())
    }

    /// Pipeline parameters for this server
    pub fn params(&self) -> ConnectionParams {
        ConnectionParams::new("mysql", &self.host, self.port, "root", "rootpass", DATABASE)
    }

    /// Schema (database) the fixture creates
    pub fn database(&self) -> &'static str {
        DATABASE
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL test container receiving the migrated tables
pub struct TestPostgres {
    pub container: testcontainers::ContainerAsync<testcontainers_modules::postgres::Postgres>,
    pub connection_string: String,
    pub host: String,
    pub port: u16,
}

impl TestPostgres {
    /// Start a PostgreSQL container with an empty `testdb` database
    pub async fn start() -> Result<Self> {
        use testcontainers::{runners::AsyncRunner, ImageExt};
        use testcontainers_modules::postgres::Postgres;

        let container = Postgres::default()
            .with_env_var("POSTGRES_DB", DATABASE)
            .with_env_var("POSTGRES_USER", "testuser")
            .with_env_var("POSTGRES_PASSWORD", "testpass")
            .start()
            .await?;

        let host = container.get_host().await?.to_string();
        let port = mapped_port(&container, 5432, "PostgreSQL").await?;

        let connection_string = format!(
            "host={} port={} user=testuser password=testpass dbname={}",
            host, port, DATABASE
        );

        let fixture = Self {
            container,
            connection_string,
            host,
            port,
        };
        fixture.wait_until_ready().await?;
        Ok(fixture)
    }

    async fn wait_until_ready(&self) -> Result<()> {
        for i in 0..30 {
            match self.connect().await {
                Ok(client) => {
                    if client.simple_query("SELECT 1").await.is_ok() {
                        info!("PostgreSQL ready after {} attempts", i + 1);
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::debug!("Waiting for PostgreSQL (attempt {}): {}", i + 1, e);
                }
            }
            sleep(Duration::from_millis(500)).await;
        }

        anyhow::bail!("PostgreSQL did not become ready in time")
    }

    /// Get a tokio-postgres connection
    pub async fn connect(&self) -> Result<tokio_postgres::Client> {
        let (client, connection) =
            tokio_postgres::connect(&self.connection_string, tokio_postgres::NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(client)
    }

    /// Pipeline parameters for this server
    pub fn params(&self) -> ConnectionParams {
        ConnectionParams::new(
            "postgresql",
            &self.host,
            self.port,
            "testuser",
            "testpass",
            DATABASE,
        )
    }
}
