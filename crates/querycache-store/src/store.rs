//! Filesystem entry store
//!
//! One directory per (cache_store, name, backend). Each entry is a pair of files
//! sharing the key as base name:
//!
//! ```text
//! {cache_store}/{name}/{backend}/{key}.{parquet|bincode}
//! {cache_store}/{name}/{backend}/{key}.json
//! ```
//!
//! Both files are written and synced as `.{random}.tmp` siblings, then renamed
//! into place, data first and metadata last. A metadata file therefore never
//! references a data file that is still being written, and a failed write
//! leaves the previous pair intact.

use crate::codec::Codec;
use crate::entry::{CacheEntry, EntryMetadata};
use crate::error::{CodecError, StoreError};
use querycache_core::{CacheKey, StoreBackend};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use tempfile::NamedTempFile;

pub const METADATA_EXTENSION: &str = "json";

const TEMP_PREFIX: &str = ".";
const TEMP_SUFFIX: &str = ".tmp";

/// Address of one storage root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedStore {
    pub cache_store: PathBuf,
    pub name: String,
    pub backend: StoreBackend,
}

impl NamedStore {
    pub fn new(cache_store: impl Into<PathBuf>, name: impl Into<String>, backend: StoreBackend) -> Self {
        Self {
            cache_store: cache_store.into(),
            name: name.into(),
            backend,
        }
    }

    /// Check that `name` is a single plain path component
    ///
    /// Names come from config, the command line or a connection string, and
    /// must not point outside `cache_store`.
    pub fn validate_name(name: &str) -> Result<(), StoreError> {
        let reason = if name.is_empty() {
            "it is empty"
        } else if name == "." || name == ".." {
            "it is a relative directory reference"
        } else if name.contains(['/', '\\', '\0']) {
            "it contains a path separator"
        } else {
            return Ok(());
        };

        Err(StoreError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    }

    /// `{cache_store}/{name}/{backend}`
    pub fn root(&self) -> PathBuf {
        self.cache_store.join(&self.name).join(self.backend.as_str())
    }
}

/// Key to (data, metadata) file pairs under one root directory
#[derive(Debug, Clone)]
pub struct EntryStore {
    root: PathBuf,
    codec: Codec,
}

impl EntryStore {
    /// The root directory is created on first write
    pub fn new(root: impl Into<PathBuf>, codec: Codec) -> Self {
        Self {
            root: root.into(),
            codec,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Data file name relative to the root
    pub fn data_file_name(&self, key: &CacheKey) -> String {
        format!("{}.{}", key, self.codec.extension())
    }

    pub fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(self.data_file_name(key))
    }

    pub fn metadata_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{}", key, METADATA_EXTENSION))
    }

    /// True when both files of the entry are present and readable
    pub fn exists(&self, key: &CacheKey) -> bool {
        File::open(self.data_path(key)).is_ok() && File::open(self.metadata_path(key)).is_ok()
    }

    /// Write an entry, replacing any previous one with the same key
    pub fn write(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let key = entry.key();
        let metadata_path = self.metadata_path(key);

        self.write_pair(
            key,
            |w| Ok(self.codec.encode(&entry.table, w)?),
            |w| {
                serde_json::to_writer_pretty(w, &entry.metadata)
                    .map_err(|e| StoreError::io(&metadata_path, e.into()))
            },
        )?;

        tracing::debug!(
            "Stored entry {} ({} rows, {})",
            key.short(),
            entry.table.num_rows(),
            self.codec.name()
        );
        Ok(())
    }

    /// Read an entry and decode its table
    pub fn read(&self, key: &CacheKey) -> Result<CacheEntry, StoreError> {
        let lock = self.lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let metadata = self.read_metadata(key)?;
        if metadata.key != *key {
            return Err(StoreError::CorruptEntry {
                key: key.clone(),
                reason: format!("metadata belongs to key {}", metadata.key),
            });
        }
        if metadata.codec != self.codec.name() {
            return Err(StoreError::CorruptEntry {
                key: key.clone(),
                reason: format!(
                    "written by the {} backend, this store uses {}",
                    metadata.codec,
                    self.codec.name()
                ),
            });
        }

        let table = self.codec.decode(&self.data_path(key)).map_err(|e| match e {
            CodecError::Io(io) if io.kind() == ErrorKind::NotFound => {
                StoreError::NotFound { key: key.clone() }
            }
            other => StoreError::CorruptEntry {
                key: key.clone(),
                reason: other.to_string(),
            },
        })?;

        if table.num_rows() != metadata.num_rows || table.num_columns() != metadata.num_columns {
            return Err(StoreError::CorruptEntry {
                key: key.clone(),
                reason: format!(
                    "data has {}x{} cells, metadata records {}x{}",
                    table.num_rows(),
                    table.num_columns(),
                    metadata.num_rows,
                    metadata.num_columns
                ),
            });
        }

        Ok(CacheEntry { metadata, table })
    }

    /// Read only the metadata sidecar of an entry
    pub fn read_metadata(&self, key: &CacheKey) -> Result<EntryMetadata, StoreError> {
        let path = self.metadata_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound { key: key.clone() })
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };

        serde_json::from_slice(&bytes).map_err(|e| StoreError::CorruptEntry {
            key: key.clone(),
            reason: format!("unreadable metadata: {}", e),
        })
    }

    /// Metadata of every complete entry, sorted by key
    ///
    /// Only metadata files are parsed. Entries whose data file is missing and
    /// files that are not entries (temporaries, foreign files) are skipped.
    pub fn list(&self) -> Result<Vec<EntryMetadata>, StoreError> {
        let mut entries = Vec::new();
        for key in self.scan_keys()? {
            if !self.data_path(&key).is_file() {
                continue;
            }
            match self.read_metadata(&key) {
                Ok(metadata) => entries.push(metadata),
                // Deleted since the directory scan
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => tracing::warn!("Skipping cache entry {}: {}", key.short(), e),
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Keys of every complete entry, sorted
    pub fn keys(&self) -> Result<Vec<CacheKey>, StoreError> {
        Ok(self.list()?.into_iter().map(|m| m.key).collect())
    }

    /// Remove an entry; returns false when there was nothing to remove
    pub fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let metadata_path = self.metadata_path(key);
        let lock = self.lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Metadata first, so a concurrent list never sees an entry without data
        let removed_metadata = remove_if_exists(&metadata_path)?;
        let removed_data = remove_if_exists(&self.data_path(key))?;
        Ok(removed_metadata || removed_data)
    }

    /// Remove every entry and leftover temporary file; returns the number of entries removed
    pub fn clear(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in self.scan_keys()? {
            if self.delete(&key)? {
                removed += 1;
            }
        }

        for path in self.read_root()? {
            let is_temp = path
                .file_name()
                .and_then(OsStr::to_str)
                .map(|n| n.starts_with(TEMP_PREFIX) && n.ends_with(TEMP_SUFFIX))
                .unwrap_or(false);
            let is_orphan = path.extension() == Some(OsStr::new(self.codec.extension()));
            if is_temp || is_orphan {
                remove_if_exists(&path)?;
            }
        }

        tracing::debug!("Cleared {} entries from {}", removed, self.root.display());
        Ok(removed)
    }

    /// Replace both files of an entry under the entry lock
    ///
    /// Both temporary files are fully written and synced before either is
    /// renamed, so a failed write leaves the previous pair untouched. The renames
    /// go data first, metadata last.
    pub(crate) fn write_pair<D, M>(&self, key: &CacheKey, data: D, metadata: M) -> Result<(), StoreError>
    where
        D: FnOnce(&mut BufWriter<&mut File>) -> Result<(), StoreError>,
        M: FnOnce(&mut BufWriter<&mut File>) -> Result<(), StoreError>,
    {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;

        let lock = self.lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let data_path = self.data_path(key);
        let metadata_path = self.metadata_path(key);
        let staged_data = self.stage(&data_path, data)?;
        let staged_metadata = self.stage(&metadata_path, metadata)?;

        staged_data
            .persist(&data_path)
            .map_err(|e| StoreError::io(&data_path, e.error))?;
        staged_metadata
            .persist(&metadata_path)
            .map_err(|e| StoreError::io(&metadata_path, e.error))?;
        Ok(())
    }

    /// Write whatever `fill` produces to a synced temporary file in the root
    ///
    /// The file is removed again when dropped without being persisted.
    fn stage<F>(&self, target: &Path, fill: F) -> Result<NamedTempFile, StoreError>
    where
        F: FnOnce(&mut BufWriter<&mut File>) -> Result<(), StoreError>,
    {
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.root)
            .map_err(|e| StoreError::io(&self.root, e))?;

        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            fill(&mut writer)?;
            writer.flush().map_err(|e| StoreError::io(target, e))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(target, e))?;

        Ok(temp)
    }

    /// Lock for one entry, shared by every store on the same directory
    ///
    /// The root is canonicalized so relative, absolute and symlinked spellings
    /// of one directory share a lock.
    fn lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let root = fs::canonicalize(&self.root)
            .or_else(|_| std::path::absolute(&self.root))
            .unwrap_or_else(|_| self.root.clone());
        entry_lock(&root.join(key.as_str()))
    }

    /// Keys of all metadata files in the root, unsorted
    fn scan_keys(&self) -> Result<Vec<CacheKey>, StoreError> {
        Ok(self
            .read_root()?
            .into_iter()
            .filter(|p| p.extension() == Some(OsStr::new(METADATA_EXTENSION)))
            .filter_map(|p| {
                p.file_stem()
                    .and_then(OsStr::to_str)
                    .and_then(|s| CacheKey::parse(s).ok())
            })
            .collect())
    }

    fn read_root(&self) -> Result<Vec<PathBuf>, StoreError> {
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };

        let mut paths = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            paths.push(entry.path());
        }
        Ok(paths)
    }
}

fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Per-entry lock shared by every store in the process
///
/// Serializes the data-then-metadata pair of a write against other writes and
/// reads of the same entry, so in-process writers never interleave their files.
/// Other processes only get the atomic rename of each file.
fn entry_lock(entry: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>> = OnceLock::new();

    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(lock) = locks.get(entry).and_then(Weak::upgrade) {
        return lock;
    }

    locks.retain(|_, lock| lock.strong_count() > 0);
    let lock = Arc::new(Mutex::new(()));
    locks.insert(entry.to_path_buf(), Arc::downgrade(&lock));
    lock
}
