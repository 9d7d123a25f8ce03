//! Integration tests for query executors
//!
//! Tests against a real database are marked with `#[ignore]`.
//!
//! ```bash
//! # Run all non-ignored tests
//! cargo test -p querycache-executor --test integration_tests
//!
//! # Run PostgreSQL integration tests
//! QUERYCACHE_TEST_POSTGRES="host=localhost dbname=postgres user=postgres password=pass" \
//! cargo test -p querycache-executor --features postgres --test integration_tests -- --ignored
//! ```

use querycache_core::{Column, LogicalType, Table};
use querycache_executor::{ExecutorError, MockExecutor, QueryExecutor};
use std::sync::Arc;

// =============================================================================
// Mock Executor
// =============================================================================

#[tokio::test]
async fn test_executor_as_trait_object() {
    let executor: Arc<dyn QueryExecutor> = Arc::new(MockExecutor::new().with_database("sales"));

    assert_eq!(executor.name(), "Mock");
    assert_eq!(executor.database_name().as_deref(), Some("sales"));
    assert!(executor.test_connection().await.is_ok());

    let table = executor.execute("select 1").await.unwrap();
    assert_eq!(table.column_names(), vec!["query", "call"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_are_counted() {
    let executor = MockExecutor::new().with_latency(5);

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(&format!("select {}", i)).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(executor.call_count(), 20);
}

#[tokio::test]
async fn test_results_and_errors_per_query() {
    let executor = MockExecutor::new();
    let orders = Table::from_columns(vec![
        Column::new("order_id", LogicalType::Int).with_values([10i64, 11]),
        Column::new("status", LogicalType::String).with_values([Some("paid"), None]),
    ])
    .unwrap();

    executor.add_result("select * from orders", orders.clone()).await;
    executor
        .add_error("select * from missing", ExecutorError::QueryError("relation \"missing\" does not exist".to_string()))
        .await;

    assert_eq!(executor.execute("select * from orders").await.unwrap(), orders);
    let err = executor.execute("select * from missing").await.unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}

// =============================================================================
// PostgreSQL Executor
// =============================================================================

#[cfg(feature = "postgres")]
mod postgres {
    use super::*;
    use querycache_core::Value;
    use querycache_executor::PostgresExecutor;

    fn connection_string() -> Option<String> {
        std::env::var("QUERYCACHE_TEST_POSTGRES").ok()
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL server"]
    async fn test_postgres_query() {
        let Some(conn) = connection_string() else {
            eprintln!("Skipping: QUERYCACHE_TEST_POSTGRES not set");
            return;
        };

        let executor = PostgresExecutor::connect(&conn).await.unwrap();
        executor.test_connection().await.unwrap();

        let table = executor
            .execute("SELECT 1::int8 AS n, 'a'::text AS s, NULL::bool AS b, now() AS ts")
            .await
            .unwrap();

        assert_eq!(table.column_names(), vec!["n", "s", "b", "ts"]);
        assert_eq!(table.columns[0].values, vec![Value::Int(1)]);
        assert_eq!(table.columns[2].values, vec![Value::Null]);
        assert_eq!(table.columns[3].logical_type, LogicalType::Timestamp);
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL server"]
    async fn test_postgres_unsupported_type() {
        let Some(conn) = connection_string() else {
            return;
        };

        let executor = PostgresExecutor::connect(&conn).await.unwrap();
        let err = executor.execute("SELECT 1.5::numeric AS amount").await.unwrap_err();
        assert!(matches!(err, ExecutorError::UnsupportedColumnType { ref column, .. } if column == "amount"));
    }
}
