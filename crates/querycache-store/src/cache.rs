//! Cache orchestrator: normalizer + key + entry store + codec

use crate::bundle::{BundlePackager, BundleSummary};
use crate::codec::Codec;
use crate::entry::{CacheEntry, EntryMetadata};
use crate::error::StoreError;
use crate::store::{EntryStore, NamedStore};
use chrono::Utc;
use querycache_core::{CacheKey, Config, Table};
use querycache_sql::SqlNormalizer;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Per-call cache behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Recompute and overwrite even when an entry exists
    pub force: bool,

    /// When false the store is neither read nor written
    pub enabled: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            force: false,
            enabled: true,
        }
    }
}

impl CacheOptions {
    /// Always recompute and store the new result
    pub fn refresh() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    /// Bypass the cache entirely
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Outcome of [`Cache::get_or_compute`]
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub table: Table,
    pub metadata: EntryMetadata,

    /// True when the table came from the store
    pub was_cached: bool,
}

impl CachedResult {
    pub fn key(&self) -> &CacheKey {
        &self.metadata.key
    }

    fn from_entry(entry: CacheEntry, was_cached: bool) -> Self {
        Self {
            table: entry.table,
            metadata: entry.metadata,
            was_cached,
        }
    }
}

/// Query-result cache over one named store
///
/// Instances are cheap and hold no in-memory results: every lookup goes to the
/// filesystem, so two instances with the same location see each other's writes.
#[derive(Debug, Clone)]
pub struct Cache {
    normalizer: SqlNormalizer,
    location: NamedStore,
    store: EntryStore,
}

impl Cache {
    /// Open the store `{cache_store}/{name}/{store_backend}` described by `config`
    ///
    /// Fails with [`StoreError::InvalidName`] unless `name` is a plain directory name.
    pub fn open(config: &Config, name: &str) -> Result<Self, StoreError> {
        NamedStore::validate_name(name)?;
        let codec = Codec::for_backend(config.store_backend, config.compression)?;
        Ok(Self::new(
            SqlNormalizer::from_config(config),
            config.resolved_cache_store()?,
            name,
            codec,
        ))
    }

    pub fn new(
        normalizer: SqlNormalizer,
        cache_store: impl Into<PathBuf>,
        name: impl Into<String>,
        codec: Codec,
    ) -> Self {
        let location = NamedStore::new(cache_store, name, codec.backend());
        let store = EntryStore::new(location.root(), codec);
        Self {
            normalizer,
            location,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.location.name
    }

    pub fn location(&self) -> &NamedStore {
        &self.location
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn normalizer(&self) -> &SqlNormalizer {
        &self.normalizer
    }

    /// Canonical text of a query
    pub fn normalize(&self, raw_sql: &str) -> String {
        self.normalizer.normalize(raw_sql)
    }

    pub fn key_for(&self, raw_sql: &str) -> CacheKey {
        self.normalizer.key_for(raw_sql)
    }

    pub fn keys_for<I, S>(&self, queries: I) -> BTreeSet<CacheKey>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        queries
            .into_iter()
            .map(|q| self.key_for(q.as_ref()))
            .collect()
    }

    pub fn exists(&self, raw_sql: &str) -> bool {
        self.store.exists(&self.key_for(raw_sql))
    }

    pub fn load(&self, raw_sql: &str) -> Result<CacheEntry, StoreError> {
        self.store.read(&self.key_for(raw_sql))
    }

    pub fn load_metadata(&self, raw_sql: &str) -> Result<EntryMetadata, StoreError> {
        self.store.read_metadata(&self.key_for(raw_sql))
    }

    pub fn delete(&self, raw_sql: &str) -> Result<bool, StoreError> {
        self.store.delete(&self.key_for(raw_sql))
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        self.store.clear()
    }

    pub fn list(&self) -> Result<Vec<EntryMetadata>, StoreError> {
        self.store.list()
    }

    /// Export `keys` (every entry when `None`) into a zip bundle
    pub fn export(
        &self,
        destination: &Path,
        keys: Option<&BTreeSet<CacheKey>>,
    ) -> Result<BundleSummary, StoreError> {
        BundlePackager::new(&self.store, self.name()).export(destination, keys)
    }

    /// Merge a bundle into this store, overwriting entries with the same key
    pub fn import_cache(&self, source: &Path) -> Result<BundleSummary, StoreError> {
        BundlePackager::new(&self.store, self.name()).import(source)
    }

    /// Return the stored result for `raw_sql`, or run `compute` and store its result
    ///
    /// Errors from `compute` are returned unchanged and nothing is written.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        raw_sql: &str,
        options: CacheOptions,
        compute: F,
    ) -> Result<CachedResult, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Table, E>>,
        E: From<StoreError>,
    {
        let normalized_query = self.normalize(raw_sql);
        let key = CacheKey::derive(&normalized_query);

        if options.enabled && !options.force && self.store.exists(&key) {
            match self.store.read(&key) {
                Ok(entry) => return Ok(CachedResult::from_entry(entry, true)),
                // Removed between the exists check and the read
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let created_at = Utc::now();
        let started = Instant::now();
        let table = compute().await?;
        let duration = started.elapsed().as_secs_f64();

        let entry = CacheEntry {
            metadata: EntryMetadata {
                data_file: self.store.data_file_name(&key),
                key,
                raw_query: raw_sql.to_string(),
                normalized_query,
                created_at,
                duration,
                codec: self.store.codec().name().to_string(),
                db_name: self.location.name.clone(),
                num_rows: table.num_rows(),
                num_columns: table.num_columns(),
                querycache_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            table,
        };

        if options.enabled {
            self.store.write(&entry)?;
        }

        Ok(CachedResult::from_entry(entry, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querycache_core::{Column, LogicalType, StoreBackend};

    fn cache(dir: &Path) -> Cache {
        let codec = Codec::for_backend(StoreBackend::Parquet, None).unwrap();
        Cache::new(SqlNormalizer::new(), dir, "testdb", codec)
    }

    fn one_row(n: i64) -> Table {
        Table::from_columns(vec![Column::new("n", LogicalType::Int).with_values([n])]).unwrap()
    }

    #[test]
    fn options() {
        assert_eq!(CacheOptions::default(), CacheOptions { force: false, enabled: true });
        assert!(CacheOptions::refresh().force);
        assert!(!CacheOptions::disabled().enabled);
        assert_eq!(
            CacheOptions::default().with_force(true).with_enabled(false),
            CacheOptions { force: true, enabled: false }
        );
    }

    #[test]
    fn location_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        assert_eq!(cache.root(), dir.path().join("testdb").join("parquet"));
        assert_eq!(cache.name(), "testdb");
    }

    #[test]
    fn open_uses_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache_store = dir.path().to_path_buf();
        config.store_backend = StoreBackend::Bincode;
        config.compression = Some(querycache_core::Compression::Gzip);

        let cache = Cache::open(&config, "warehouse").unwrap();
        assert_eq!(cache.root(), dir.path().join("warehouse").join("bincode"));
        assert_eq!(cache.store().codec().name(), "bincode");
    }

    #[test]
    fn open_rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache_store = dir.path().join("cache");

        for name in ["..", "../elsewhere", "."] {
            assert!(matches!(
                Cache::open(&config, name),
                Err(StoreError::InvalidName { .. })
            ));
        }
        assert!(!dir.path().join("cache").exists());
    }

    #[test]
    fn open_rejects_bad_compression() {
        let mut config = Config::default();
        config.store_backend = StoreBackend::Bincode;
        config.compression = Some(querycache_core::Compression::Zstd);
        assert!(matches!(Cache::open(&config, "x"), Err(StoreError::Codec(_))));
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());

        let first = cache
            .get_or_compute("select 1", CacheOptions::default(), || async {
                Ok::<_, StoreError>(one_row(1))
            })
            .await
            .unwrap();
        assert!(!first.was_cached);
        assert_eq!(first.metadata.raw_query, "select 1");
        assert_eq!(first.metadata.normalized_query, "SELECT 1");
        assert_eq!(first.metadata.db_name, "testdb");

        let second = cache
            .get_or_compute("SELECT   1", CacheOptions::default(), || async {
                Ok::<_, StoreError>(one_row(2))
            })
            .await
            .unwrap();
        assert!(second.was_cached);
        assert_eq!(second.table, one_row(1));
        assert_eq!(second.metadata, first.metadata);
        assert_eq!(cache.load_metadata("select 1;").unwrap(), first.metadata);
        assert_eq!(cache.load("select 1").unwrap().table, one_row(1));
    }

    #[tokio::test]
    async fn compute_errors_pass_through_and_write_nothing() {
        #[derive(Debug, PartialEq)]
        enum Failure {
            Query(&'static str),
            Store,
        }
        impl From<StoreError> for Failure {
            fn from(_: StoreError) -> Self {
                Failure::Store
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());

        let err = cache
            .get_or_compute("select broken", CacheOptions::default(), || async {
                Err::<Table, _>(Failure::Query("relation does not exist"))
            })
            .await
            .unwrap_err();

        assert_eq!(err, Failure::Query("relation does not exist"));
        assert!(!cache.exists("select broken"));
        assert!(cache.list().unwrap().is_empty());
    }
}
