//! Query executor trait for running SQL against a live database

use querycache_core::Table;

/// Errors that can occur when executing a query
///
/// These are passed through the cache untouched, so the variants carry the
/// driver's message as is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Column '{column}' has unsupported type {type_name}")]
    UnsupportedColumnType { column: String, type_name: String },

    #[error("Invalid result: {0}")]
    InvalidResult(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Trait for executors that run a statement and return its full result
#[async_trait::async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Get the executor name (e.g., "PostgreSQL")
    fn name(&self) -> &'static str;

    /// Name of the connected database, used as the default cache namespace
    fn database_name(&self) -> Option<String> {
        None
    }

    /// Run `sql` and collect every row
    ///
    /// There is no cancellation: once called, the statement runs to completion
    /// or error. Callers wanting a timeout wrap the future themselves.
    async fn execute(&self, sql: &str) -> Result<Table, ExecutorError>;

    /// Test the connection to the database
    async fn test_connection(&self) -> Result<(), ExecutorError>;
}

/// Infer a database name from a connection descriptor
///
/// Understands URLs (`postgresql://user@host:5432/sales?sslmode=require` gives
/// `sales`, `sqlite:///data/app.db` gives `app.db`) and libpq key/value strings
/// (`host=localhost dbname=sales`). Names that are not a plain directory name,
/// such as `..`, give `None`.
pub fn database_from_uri(uri: &str) -> Option<String> {
    let uri = uri.trim();

    let name = if let Some((_, rest)) = uri.split_once("://") {
        let path = rest.split(['?', '#']).next().unwrap_or_default();
        // Everything before the first '/' is the authority
        let (_, path) = path.split_once('/')?;
        path.rsplit('/').find(|segment| !segment.is_empty())?
    } else {
        uri.split_whitespace()
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "dbname")
            .map(|(_, value)| value.trim_matches('\''))?
    };

    is_plain_name(name).then(|| name.to_string())
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}
