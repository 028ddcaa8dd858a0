//! Relational driver traits.
//!
//! The engine never talks to a database directly; it consumes a [`Driver`]
//! that hands out [`Connection`]s per data-source name. Connections execute
//! parameterized statements and carry the transaction boundary: every
//! operation against the same data source within one engine transaction
//! shares one connection, so they commit or roll back atomically.
//!
//! Timeout and cancellation are the driver's concern; the engine only
//! bounds retry of failed fetches.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// A database connection capable of executing parameterized statements.
///
/// Implementations must be `Send`; a connection is owned by a single
/// transaction at a time and never shared across threads.
pub trait Connection: Send {
    /// Execute a query and return all rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute an INSERT carrying a RETURNING clause and yield the
    /// generated-key row.
    fn insert_returning(&mut self, sql: &str, params: &[Value]) -> Result<Row>;

    /// Commit the connection's current transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the connection's current transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Whether this connection auto-commits each statement.
    ///
    /// Auto-commit connections are skipped by the engine's commit/rollback
    /// fan-out.
    fn auto_commit(&self) -> bool {
        false
    }
}

/// Acquires connections per data-source name.
///
/// One driver serves the whole process; acquisition may block.
pub trait Driver: Send + Sync {
    /// Acquire a connection for the named data source.
    fn acquire(&self, data_source: &str) -> Result<Box<dyn Connection>>;
}

/// Configuration for driver connections.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection string or URL
    pub url: String,
    /// Application name for connection identification
    pub application_name: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            application_name: None,
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_config_builder() {
        let config = ConnectionConfig::new("postgres://localhost/app").application_name("stratum");
        assert_eq!(config.url, "postgres://localhost/app");
        assert_eq!(config.application_name, Some("stratum".to_string()));
    }

    #[test]
    fn connection_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.url, "");
        assert!(config.application_name.is_none());
    }
}
