//! Connection provider
//!
//! A [`ConnectionProvider`] owns the parameters and backend factory for one
//! database. Every call to [`ConnectionProvider::connect`] opens a fresh,
//! scoped connection that is closed when released or dropped. Callers that
//! already hold a connection can pass it to [`ConnectionProvider::acquire`]
//! to reuse it instead.

use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionFactory, ConnectionParams, DatabaseType};
use crate::dialect::{dialect_for, SqlDialect};
use crate::error::{Error, Result};

/// Opens connections for one set of parameters
pub struct ConnectionProvider {
    params: ConnectionParams,
    factory: Arc<dyn ConnectionFactory>,
    dialect: Box<dyn SqlDialect>,
}

impl ConnectionProvider {
    /// Create a provider backed by the given factory.
    ///
    /// The SQL dialect follows the factory's database type.
    pub fn new(params: ConnectionParams, factory: Arc<dyn ConnectionFactory>) -> Self {
        let dialect = dialect_for(factory.database_type());
        Self {
            params,
            factory,
            dialect,
        }
    }

    /// Create a provider, choosing the backend from the dialect name
    pub fn from_params(params: ConnectionParams) -> Result<Self> {
        let factory: Arc<dyn ConnectionFactory> = match params.database_type()? {
            #[cfg(feature = "postgres")]
            DatabaseType::PostgreSQL => Arc::new(crate::postgres::PgConnectionFactory),
            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => Arc::new(crate::mysql::MySqlConnectionFactory),
            #[allow(unreachable_patterns)]
            other => {
                return Err(Error::config(format!(
                    "dialect '{}' ({}) is not enabled in this build",
                    params.dialect, other
                )))
            }
        };
        Ok(Self::new(params, factory))
    }

    /// Connection parameters
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// SQL dialect of the target database
    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Database type of the target database
    pub fn database_type(&self) -> DatabaseType {
        self.factory.database_type()
    }

    /// Whether statements should be logged
    pub fn echo(&self) -> bool {
        self.params.echo
    }

    /// Open a new connection
    pub async fn connect(&self) -> Result<ScopedConnection> {
        debug!(url = %self.params.redacted_url(), "Opening connection");
        let conn = self.factory.connect(&self.params).await?;
        Ok(ScopedConnection::new(conn))
    }

    /// Reuse `existing` if given, otherwise open a new connection
    pub async fn acquire<'a>(
        &self,
        existing: Option<&'a dyn Connection>,
    ) -> Result<ConnectionHandle<'a>> {
        match existing {
            Some(conn) => Ok(ConnectionHandle::Borrowed(conn)),
            None => Ok(ConnectionHandle::Owned(self.connect().await?)),
        }
    }
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("url", &self.params.redacted_url())
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

/// A connection closed on [`release`](Self::release) or when dropped
pub struct ScopedConnection {
    conn: Arc<dyn Connection>,
    released: bool,
}

impl ScopedConnection {
    /// Take ownership of an open connection
    pub fn new(conn: Box<dyn Connection>) -> Self {
        Self {
            conn: Arc::from(conn),
            released: false,
        }
    }

    /// Close the connection now
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.conn.close().await {
            warn!(error = %e, "Failed to close connection");
        }
    }
}

impl Deref for ScopedConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let conn = Arc::clone(&self.conn);
            handle.spawn(async move {
                if let Err(e) = conn.close().await {
                    warn!(error = %e, "Failed to close connection");
                }
            });
        }
    }
}

/// Either a connection opened for one operation or one supplied by the caller
pub enum ConnectionHandle<'a> {
    /// Opened by the provider; closed on release
    Owned(ScopedConnection),
    /// Supplied by the caller; left open on release
    Borrowed(&'a dyn Connection),
}

impl<'a> ConnectionHandle<'a> {
    /// Whether the provider opened this connection
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Finish a successful operation: close an owned connection, keep a borrowed one
    pub async fn release(self) {
        if let Self::Owned(conn) = self {
            conn.release().await;
        }
    }

    /// Finish a failed operation: close the connection whoever owns it
    pub async fn close(self) {
        match self {
            Self::Owned(conn) => conn.release().await,
            Self::Borrowed(conn) => {
                if let Err(e) = conn.close().await {
                    warn!(error = %e, "Failed to close connection");
                }
            }
        }
    }
}

impl<'a> Deref for ConnectionHandle<'a> {
    type Target = dyn Connection + 'a;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Owned(conn) => &**conn,
            Self::Borrowed(conn) => *conn,
        }
    }
}
