//! QueryCache Store
//!
//! Durable storage for query results: codecs, the filesystem entry store, the
//! [`Cache`] orchestrator and zip bundles.

pub mod bundle;
pub mod cache;
pub mod codec;
pub mod entry;
pub mod error;
pub mod store;

pub use bundle::{BundlePackager, BundleSummary};
pub use cache::{Cache, CacheOptions, CachedResult};
pub use codec::{Codec, ColumnarCodec, ObjectCodec};
pub use entry::{CacheEntry, EntryMetadata};
pub use error::{CodecError, StoreError};
pub use store::{EntryStore, NamedStore};
