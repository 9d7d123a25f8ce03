//! Database session facade

use querycache_core::{CacheKey, Config, Table, UNNAMED_DB};
use querycache_executor::{ExecutorError, QueryExecutor};
use querycache_store::{BundleSummary, Cache, CacheOptions, CachedResult, StoreError};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Errors returned by [`Database`] queries
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The executor failed; the message is the driver's own
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A live database connection with a result cache in front of it
///
/// Every key served through [`Database::query`] with caching enabled is
/// remembered for the lifetime of this value (the session), so the exact set
/// of results a piece of work depended on can be exported with
/// [`Database::export_session`].
pub struct Database<E: QueryExecutor> {
    executor: E,
    cache: Cache,
    session: Mutex<BTreeSet<CacheKey>>,
}

impl<E: QueryExecutor> Database<E> {
    /// Open the cache described by `config` in front of `executor`
    ///
    /// The namespace is `config.name`, else the executor's database name,
    /// else `"unnameddb"`.
    pub fn new(executor: E, config: &Config) -> Result<Self, QueryError> {
        let name = config
            .name
            .clone()
            .or_else(|| executor.database_name())
            .unwrap_or_else(|| UNNAMED_DB.to_string());

        let cache = Cache::open(config, &name)?;
        Ok(Self::with_cache(executor, cache))
    }

    /// Use an already opened cache
    pub fn with_cache(executor: E, cache: Cache) -> Self {
        Self {
            executor,
            cache,
            session: Mutex::new(BTreeSet::new()),
        }
    }

    /// Namespace used in the cache and in log messages
    pub fn name(&self) -> &str {
        self.cache.name()
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run `sql`, serving it from the cache when possible
    pub async fn query(&self, sql: &str, options: CacheOptions) -> Result<Table, QueryError> {
        Ok(self.query_with_metadata(sql, options).await?.table)
    }

    /// Like [`query`](Self::query), also returning the entry metadata and hit flag
    pub async fn query_with_metadata(
        &self,
        sql: &str,
        options: CacheOptions,
    ) -> Result<CachedResult, QueryError> {
        tracing::info!("Querying '{}'", self.name());

        let result = self
            .cache
            .get_or_compute(sql, options, || async {
                Ok::<_, QueryError>(self.executor.execute(sql).await?)
            })
            .await?;

        if result.was_cached {
            tracing::info!("Loading from cache.");
            tracing::info!(
                "The cached query was executed on the {} and lasted {}",
                result.metadata.created_at.to_rfc3339(),
                result.metadata.duration_display()
            );
        } else {
            tracing::info!("Finished in {}", result.metadata.duration_display());
            if options.enabled {
                tracing::info!("Results have been stored in cache");
            }
        }

        if options.enabled {
            self.session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(result.key().clone());
        }

        Ok(result)
    }

    /// True if `sql` has a stored result
    pub fn exists_in_cache(&self, sql: &str) -> bool {
        self.cache.exists(sql)
    }

    /// Keys touched by this session so far
    pub fn session_keys(&self) -> BTreeSet<CacheKey> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Export the entries touched by this session into a zip bundle
    ///
    /// Fails with [`StoreError::MissingKeys`] if any of them has since been
    /// deleted from the store.
    pub fn export_session(&self, destination: &Path) -> Result<BundleSummary, QueryError> {
        let keys = self.session_keys();
        Ok(self.cache.export(destination, Some(&keys))?)
    }
}
