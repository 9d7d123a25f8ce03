//! Mock query executor for testing
//!
//! This executor returns predefined tables without connecting to any database.
//! It's useful for:
//! - Unit testing cache and session logic
//! - Counting how often a query actually reached the "database"
//! - Simulating slow queries and failures
//!
//! ## Usage
//!
//! ```rust,ignore
//! use querycache_executor::{MockExecutor, QueryExecutor};
//! use querycache_core::{Column, LogicalType, Table};
//!
//! let executor = MockExecutor::new().with_database("sales");
//! executor.add_result("select id from users", users_table).await;
//!
//! let table = executor.execute("select id from users").await?;
//! assert_eq!(executor.call_count(), 1);
//! ```
//!
//! Unknown SQL returns an echo table with one row: the query text and the
//! call number, so distinct executions produce distinct results.

use crate::executor::{ExecutorError, QueryExecutor};
use querycache_core::{Column, LogicalType, Table};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Mock query executor for testing
///
/// Clones share their results, errors and call counter.
pub struct MockExecutor {
    /// Predefined results by exact SQL text
    results: Arc<RwLock<HashMap<String, Table>>>,

    /// Errors to return for specific SQL text
    errors: Arc<RwLock<HashMap<String, ExecutorError>>>,

    /// Number of `execute` calls so far
    calls: Arc<AtomicUsize>,

    /// Simulate connection failure
    fail_connection: bool,

    /// Simulate query latency (milliseconds)
    latency_ms: u64,

    /// Database name reported to the session facade
    database: Option<String>,
}

impl MockExecutor {
    /// Create a new mock executor with no predefined results
    pub fn new() -> Self {
        Self {
            results: Arc::new(RwLock::new(HashMap::new())),
            errors: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_connection: false,
            latency_ms: 0,
            database: None,
        }
    }

    /// Return `table` whenever exactly `sql` is executed
    pub async fn add_result(&self, sql: impl Into<String>, table: Table) {
        self.results.write().await.insert(sql.into(), table);
    }

    /// Fail whenever exactly `sql` is executed
    pub async fn add_error(&self, sql: impl Into<String>, error: ExecutorError) {
        self.errors.write().await.insert(sql.into(), error);
    }

    /// Configure to fail all connection tests
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure simulated latency for every call
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Report `database` from `database_name()`
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Number of times `execute` has been called
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Clear all stored results and errors
    pub async fn clear(&self) {
        self.results.write().await.clear();
        self.errors.write().await.clear();
    }

    /// The table returned for SQL without a predefined result
    pub fn echo_table(sql: &str, call: usize) -> Table {
        Table {
            columns: vec![
                Column::new("query", LogicalType::String).with_values([sql]),
                Column::new("call", LogicalType::Int).with_values([call as i64]),
            ],
        }
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockExecutor {
    fn clone(&self) -> Self {
        Self {
            results: Arc::clone(&self.results),
            errors: Arc::clone(&self.errors),
            calls: Arc::clone(&self.calls),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            database: self.database.clone(),
        }
    }
}

#[async_trait::async_trait]
impl QueryExecutor for MockExecutor {
    fn name(&self) -> &'static str {
        "Mock"
    }

    fn database_name(&self) -> Option<String> {
        self.database.clone()
    }

    async fn execute(&self, sql: &str) -> Result<Table, ExecutorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.simulate_latency().await;

        if self.fail_connection {
            return Err(ExecutorError::ConnectionError(
                "Simulated connection failure".to_string(),
            ));
        }

        if let Some(error) = self.errors.read().await.get(sql) {
            return Err(error.clone());
        }

        let table = self.results.read().await.get(sql).cloned();
        Ok(table.unwrap_or_else(|| Self::echo_table(sql, call)))
    }

    async fn test_connection(&self) -> Result<(), ExecutorError> {
        self.simulate_latency().await;

        if self.fail_connection {
            Err(ExecutorError::ConnectionError(
                "Simulated connection failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}
