//! Locked, persisted artifact cache for Stratus install media.
//!
//! This crate deduplicates expensive downloads and cloud-side uploads of
//! kernels, ramdisks and ISOs across concurrent builds. `CacheLayout` owns the
//! on-disk structure, `IndexLock` the exclusive file lock, `IndexTransaction`
//! the only mutable view of the persisted index, and `ArtifactCache` composes
//! them into `retrieve_and_cache_object`. Transport is pluggable through the
//! `Fetcher`, `IsoExtractor` and `RemoteStore` traits.

pub mod fetch;
pub mod index;
pub mod iso;
pub mod layout;
pub mod lock;
pub mod manager;
pub mod remote;

pub use fetch::{Fetcher, UreqFetcher};
pub use index::{CacheEntry, CacheIndex, IndexTransaction};
pub use iso::{IsoExtractor, XorrisoExtractor};
pub use layout::{CacheLayout, CACHE_FORMAT_VERSION};
pub use lock::IndexLock;
pub use manager::{ArtifactCache, CachedObject, ObjectSource};
pub use remote::RemoteStore;

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache index serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("index lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("invalid index value for '{bucket}/{object}': {reason}")]
    InvalidIndexValue {
        bucket: String,
        object: String,
        reason: String,
    },
    #[error("failed to fetch '{source_url}': {reason}")]
    Fetch { source_url: String, reason: String },
    #[error("unsupported source location: {0}")]
    UnsupportedSource(String),
    #[error("no source available for uncached object '{0}'")]
    MissingSource(String),
    #[error("remote upload requested but no remote store is configured")]
    NoRemoteStore,
    #[error("remote upload failed: {0}")]
    Upload(String),
    #[error("ISO extraction failed: {0}")]
    Extract(String),
    #[error("cache format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_error_display_invalid_value() {
        let e = CacheError::InvalidIndexValue {
            bucket: "fedora20-x86_64".to_owned(),
            object: "install-iso".to_owned(),
            reason: "expected a mapping".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("fedora20-x86_64/install-iso"));
        assert!(msg.contains("mapping"));
    }

    #[test]
    fn cache_error_display_fetch() {
        let e = CacheError::Fetch {
            source_url: "http://mirror/x".to_owned(),
            reason: "HTTP 404".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("http://mirror/x"));
        assert!(msg.contains("404"));
    }

    #[test]
    fn cache_error_display_version_mismatch() {
        let e = CacheError::VersionMismatch {
            expected: 1,
            found: 4,
        };
        let msg = e.to_string();
        assert!(msg.contains('1'));
        assert!(msg.contains('4'));
    }
}
