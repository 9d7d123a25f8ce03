//! Integration tests for the database session facade
//!
//! All tests use `MockExecutor`, so no database is required.

use pretty_assertions::assert_eq;
use querycache_core::{Column, Config, LogicalType, StoreBackend, Table};
use querycache_engine::{Database, QueryError};
use querycache_executor::{ExecutorError, MockExecutor};
use querycache_sql::SqlNormalizer;
use querycache_store::{Cache, CacheOptions, Codec, StoreError};
use std::collections::BTreeSet;
use std::path::Path;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(cache_store: &Path) -> Config {
    let mut config = Config::default();
    config.cache_store = cache_store.to_path_buf();
    config.name = Some("testdb".to_string());
    config
}

fn database(cache_store: &Path) -> Database<MockExecutor> {
    Database::new(MockExecutor::new(), &config(cache_store)).unwrap()
}

fn receipts() -> Table {
    Table::from_columns(vec![
        Column::new("tin", LogicalType::String).with_values([Some("100200300"), None]),
        Column::new("total", LogicalType::Float).with_values([10.5f64, 3.0]),
    ])
    .unwrap()
}

/// Keys contained in a bundle, read back through a fresh cache
fn bundle_keys(bundle: &Path, scratch: &Path) -> BTreeSet<querycache_core::CacheKey> {
    let codec = Codec::for_backend(StoreBackend::Parquet, None).unwrap();
    let cache = Cache::new(SqlNormalizer::new(), scratch, "scratch", codec);
    cache.import_cache(bundle).unwrap().keys.into_iter().collect()
}

// =============================================================================
// Query Flow
// =============================================================================

#[tokio::test]
async fn test_second_query_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(dir.path());
    db.executor().add_result("select * from receipts", receipts()).await;

    let first = db
        .query_with_metadata("select * from receipts", CacheOptions::default())
        .await
        .unwrap();
    let second = db
        .query_with_metadata("SELECT *\n  FROM receipts;", CacheOptions::default())
        .await
        .unwrap();

    assert!(!first.was_cached);
    assert!(second.was_cached);
    assert_eq!(second.table, receipts());
    assert_eq!(db.executor().call_count(), 1);
    assert!(db.exists_in_cache("select * from receipts"));
}

#[tokio::test]
async fn test_force_refresh_hits_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(dir.path());

    let first = db.query("select 1", CacheOptions::default()).await.unwrap();
    let refreshed = db.query("select 1", CacheOptions::refresh()).await.unwrap();
    let cached = db.query("select 1", CacheOptions::default()).await.unwrap();

    assert_eq!(db.executor().call_count(), 2);
    assert_eq!(first, MockExecutor::echo_table("select 1", 1));
    assert_eq!(refreshed, MockExecutor::echo_table("select 1", 2));
    assert_eq!(cached, refreshed);
}

#[tokio::test]
async fn test_disabled_cache_always_executes() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(dir.path());

    db.query("select 1", CacheOptions::default()).await.unwrap();
    let uncached = db.query("select 1", CacheOptions::disabled()).await.unwrap();
    db.query("select 2", CacheOptions::disabled()).await.unwrap();

    assert_eq!(uncached, MockExecutor::echo_table("select 1", 2));
    assert_eq!(db.executor().call_count(), 3);
    assert!(!db.exists_in_cache("select 2"));
    assert_eq!(db.session_keys(), db.cache().keys_for(["select 1"]));
}

#[tokio::test]
async fn test_executor_errors_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(dir.path());
    let error = ExecutorError::QueryError("relation \"nope\" does not exist".to_string());
    db.executor().add_error("select * from nope", error.clone()).await;

    let err = db
        .query("select * from nope", CacheOptions::default())
        .await
        .unwrap_err();

    match err {
        QueryError::Executor(inner) => assert_eq!(inner, error),
        other => panic!("expected executor error, got {:?}", other),
    }
    assert_eq!(
        db.query("select * from nope", CacheOptions::default()).await.unwrap_err().to_string(),
        error.to_string()
    );
    assert!(!db.exists_in_cache("select * from nope"));
    assert!(db.session_keys().is_empty());
}

#[tokio::test]
async fn test_store_errors_surface() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(dir.path());
    let uuids = Table::from_columns(vec![Column::new("id", LogicalType::Uuid)]).unwrap();
    db.executor().add_result("select id from users", uuids).await;

    let err = db
        .query("select id from users", CacheOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Store(StoreError::UnsupportedType { .. })));
}

#[tokio::test]
async fn test_escaping_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache_store = dir.path().join("cache");

    let mut configured = config(&cache_store);
    configured.name = Some("..".to_string());
    assert!(matches!(
        Database::new(MockExecutor::new(), &configured),
        Err(QueryError::Store(StoreError::InvalidName { .. }))
    ));

    let mut inferred = config(&cache_store);
    inferred.name = None;
    assert!(matches!(
        Database::new(MockExecutor::new().with_database("a/../.."), &inferred),
        Err(QueryError::Store(StoreError::InvalidName { .. }))
    ));
    assert!(!cache_store.exists());
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test]
async fn test_export_session_contains_exactly_touched_keys() {
    let dir = tempfile::tempdir().unwrap();
    let cache_store = dir.path().join("cache");

    // C is cached by an earlier session
    let earlier = database(&cache_store);
    earlier.query("select 'c'", CacheOptions::default()).await.unwrap();

    let db = database(&cache_store);
    db.query("select 'a'", CacheOptions::default()).await.unwrap();
    db.query("select 'b'", CacheOptions::default()).await.unwrap();
    // A cache hit counts as touched too
    db.query("SELECT 'a'", CacheOptions::default()).await.unwrap();

    let expected = db.cache().keys_for(["select 'a'", "select 'b'"]);
    assert_eq!(db.session_keys(), expected);
    assert_eq!(db.cache().list().unwrap().len(), 3);

    let summary = db.export_session(&dir.path().join("session")).unwrap();
    assert_eq!(summary.path, dir.path().join("session.zip"));
    assert_eq!(summary.keys.iter().cloned().collect::<BTreeSet<_>>(), expected);
    assert_eq!(bundle_keys(&summary.path, &dir.path().join("scratch")), expected);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let first = database(dir.path());
    let second = database(dir.path());

    first.query("select 1", CacheOptions::default()).await.unwrap();
    second.query("select 2", CacheOptions::default()).await.unwrap();

    assert_eq!(first.session_keys(), first.cache().keys_for(["select 1"]));
    assert_eq!(second.session_keys(), second.cache().keys_for(["select 2"]));
}

#[tokio::test]
async fn test_export_session_after_delete_reports_missing_key() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(dir.path());
    db.query("select 1", CacheOptions::default()).await.unwrap();
    db.query("select 2", CacheOptions::default()).await.unwrap();

    db.cache().delete("select 2").unwrap();

    let destination = dir.path().join("session.zip");
    let err = db.export_session(&destination).unwrap_err();
    match err {
        QueryError::Store(StoreError::MissingKeys { keys }) => {
            assert_eq!(keys, vec![db.cache().key_for("select 2")]);
        }
        other => panic!("expected MissingKeys, got {:?}", other),
    }
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_empty_session_exports_empty_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(dir.path());
    db.cache()
        .get_or_compute("select 1", CacheOptions::default(), || async {
            Ok::<_, StoreError>(receipts())
        })
        .await
        .unwrap();

    let summary = db.export_session(&dir.path().join("empty.zip")).unwrap();
    assert!(summary.keys.is_empty());
    assert!(bundle_keys(&summary.path, &dir.path().join("scratch")).is_empty());
}
