//! Zip bundles of cache entries
//!
//! A bundle mirrors the store layout below the cache root:
//!
//! ```text
//! {name}/{backend}/{key}.{ext}
//! {name}/{backend}/{key}.json
//! ```
//!
//! Import strips `{name}`, so a bundle can be merged into a store with any
//! namespace as long as the backend matches.

use crate::entry::EntryMetadata;
use crate::error::StoreError;
use crate::store::{EntryStore, METADATA_EXTENSION};
use querycache_core::CacheKey;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const BUNDLE_EXTENSION: &str = "zip";

/// Result of an export or import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSummary {
    /// Archive written or read
    pub path: PathBuf,

    /// Keys contained in the archive, sorted
    pub keys: Vec<CacheKey>,
}

/// Moves entries between one store and zip archives
#[derive(Debug)]
pub struct BundlePackager<'a> {
    store: &'a EntryStore,
    name: &'a str,
}

impl<'a> BundlePackager<'a> {
    /// `name` is the namespace written into exported paths
    pub fn new(store: &'a EntryStore, name: &'a str) -> Self {
        Self { store, name }
    }

    /// Export `keys`, or every entry when `None`
    ///
    /// Requested keys that are not in the store fail the whole export with
    /// [`StoreError::MissingKeys`] and nothing is written.
    pub fn export(
        &self,
        destination: &Path,
        keys: Option<&BTreeSet<CacheKey>>,
    ) -> Result<BundleSummary, StoreError> {
        let destination = with_bundle_extension(destination);
        let available = self.store.keys()?;

        let selected: Vec<CacheKey> = match keys {
            None => available,
            Some(requested) => {
                let available: BTreeSet<CacheKey> = available.into_iter().collect();
                let missing: Vec<CacheKey> = requested.difference(&available).cloned().collect();
                if !missing.is_empty() {
                    return Err(StoreError::MissingKeys { keys: missing });
                }
                requested.iter().cloned().collect()
            }
        };

        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| StoreError::io(&parent, e))?;

        let mut temp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&parent)
            .map_err(|e| StoreError::io(&parent, e))?;

        {
            let mut zip = ZipWriter::new(temp.as_file_mut());
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            let prefix = format!("{}/{}", self.name, self.store.codec().name());

            for key in &selected {
                for path in [self.store.data_path(key), self.store.metadata_path(key)] {
                    let file_name = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or_default();
                    zip.start_file(format!("{}/{}", prefix, file_name), options)
                        .map_err(|e| StoreError::bundle(&destination, e.to_string()))?;

                    let mut source = File::open(&path).map_err(|e| StoreError::io(&path, e))?;
                    io::copy(&mut source, &mut zip).map_err(|e| StoreError::io(&path, e))?;
                }
            }

            zip.finish()
                .map_err(|e| StoreError::bundle(&destination, e.to_string()))?;
        }

        temp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(&destination, e))?;
        temp.persist(&destination)
            .map_err(|e| StoreError::io(&destination, e.error))?;

        tracing::debug!("Exported {} entries to {}", selected.len(), destination.display());
        Ok(BundleSummary {
            path: destination,
            keys: selected,
        })
    }

    /// Import every entry of the archive at `source`, overwriting existing keys
    ///
    /// The whole archive is validated before anything is written.
    pub fn import(&self, source: &Path) -> Result<BundleSummary, StoreError> {
        let file = File::open(source).map_err(|e| StoreError::io(source, e))?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| StoreError::bundle(source, format!("not a zip archive: {}", e)))?;

        let members = self.validate(source, &mut archive)?;

        for (key, (data_index, metadata_index)) in &members {
            let data = read_member(source, &mut archive, *data_index)?;
            let metadata = read_member(source, &mut archive, *metadata_index)?;
            let data_path = self.store.data_path(key);
            let metadata_path = self.store.metadata_path(key);

            self.store.write_pair(
                key,
                |w| w.write_all(&data).map_err(|e| StoreError::io(&data_path, e)),
                |w| w.write_all(&metadata).map_err(|e| StoreError::io(&metadata_path, e)),
            )?;
        }

        tracing::debug!(
            "Imported {} entries from {} into {}",
            members.len(),
            source.display(),
            self.store.root().display()
        );
        Ok(BundleSummary {
            path: source.to_path_buf(),
            keys: members.into_keys().collect(),
        })
    }

    /// Map every key in the archive to its (data, metadata) member indices
    fn validate(
        &self,
        source: &Path,
        archive: &mut ZipArchive<File>,
    ) -> Result<BTreeMap<CacheKey, (usize, usize)>, StoreError> {
        let backend = self.store.codec().name();
        let data_extension = self.store.codec().extension();
        let mut halves: BTreeMap<CacheKey, (Option<usize>, Option<usize>)> = BTreeMap::new();

        for index in 0..archive.len() {
            let member_name = {
                let member = archive
                    .by_index(index)
                    .map_err(|e| StoreError::bundle(source, e.to_string()))?;
                if member.is_dir() {
                    continue;
                }
                member.name().to_string()
            };

            let parts: Vec<&str> = member_name.split('/').collect();
            let [_, member_backend, file_name] = parts.as_slice() else {
                return Err(StoreError::bundle(
                    source,
                    format!("'{}' is not a {{name}}/{{backend}}/{{file}} path", member_name),
                ));
            };

            if *member_backend != backend {
                return Err(StoreError::bundle(
                    source,
                    format!(
                        "'{}' holds {} entries, the target store uses {}",
                        member_name, member_backend, backend
                    ),
                ));
            }

            let (stem, extension) = file_name.rsplit_once('.').ok_or_else(|| {
                StoreError::bundle(source, format!("'{}' has no extension", member_name))
            })?;
            let key = CacheKey::parse(stem)
                .map_err(|e| StoreError::bundle(source, format!("'{}': {}", member_name, e)))?;

            let slot = halves.entry(key.clone()).or_default();
            if extension == data_extension {
                slot.0 = Some(index);
            } else if extension == METADATA_EXTENSION {
                let bytes = read_member(source, archive, index)?;
                let metadata: EntryMetadata = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::bundle(source, format!("'{}': unreadable metadata: {}", member_name, e))
                })?;
                if metadata.key != key {
                    return Err(StoreError::bundle(
                        source,
                        format!("'{}' describes key {}", member_name, metadata.key),
                    ));
                }
                slot.1 = Some(index);
            } else {
                return Err(StoreError::bundle(
                    source,
                    format!("'{}' has unknown extension '{}'", member_name, extension),
                ));
            }
        }

        halves
            .into_iter()
            .map(|(key, pair)| match pair {
                (Some(data), Some(metadata)) => Ok((key, (data, metadata))),
                (None, _) => Err(StoreError::bundle(
                    source,
                    format!("entry {} has no data file", key),
                )),
                (_, None) => Err(StoreError::bundle(
                    source,
                    format!("entry {} has no metadata file", key),
                )),
            })
            .collect()
    }
}

fn read_member(
    source: &Path,
    archive: &mut ZipArchive<File>,
    index: usize,
) -> Result<Vec<u8>, StoreError> {
    let mut member = archive
        .by_index(index)
        .map_err(|e| StoreError::bundle(source, e.to_string()))?;
    let mut bytes = Vec::with_capacity(member.size() as usize);
    member
        .read_to_end(&mut bytes)
        .map_err(|e| StoreError::bundle(source, format!("'{}': {}", member.name(), e)))?;
    Ok(bytes)
}

/// Append `.zip` to destinations without an extension
pub fn with_bundle_extension(destination: &Path) -> PathBuf {
    if destination.extension().is_some() {
        destination.to_path_buf()
    } else {
        destination.with_extension(BUNDLE_EXTENSION)
    }
}
