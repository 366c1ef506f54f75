use crate::fetch::{Fetcher, UreqFetcher};
use crate::index::{CacheEntry, IndexTransaction};
use crate::iso::{IsoExtractor, XorrisoExtractor};
use crate::layout::CacheLayout;
use crate::remote::RemoteStore;
use crate::CacheError;
use std::fs;
use std::path::{Path, PathBuf};
use stratus_schema::{CacheKey, LocationKind, OsTarget};
use tracing::{debug, info, warn};

/// Where an uncached object can be obtained from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectSource {
    /// `file://`, bare path, or `http(s)://` location.
    Url(String),
    /// A file inside an ISO that is already cached locally for the same target.
    IsoMember { iso_object: String, path: String },
    /// No source: the object must already be cached.
    Cached,
}

/// One row of [`ArtifactCache::list_entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedObject {
    pub bucket: String,
    pub object: String,
    pub entry: CacheEntry,
}

/// Deduplicating cache of install media keyed by object, OS and architecture.
pub struct ArtifactCache {
    layout: CacheLayout,
    fetcher: Box<dyn Fetcher>,
    extractor: Box<dyn IsoExtractor>,
    remote: Option<Box<dyn RemoteStore>>,
}

impl ArtifactCache {
    /// Open (and create if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let layout = CacheLayout::new(root);
        layout.initialize()?;
        Ok(Self {
            layout,
            fetcher: Box::new(UreqFetcher::new()),
            extractor: Box::new(XorrisoExtractor),
            remote: None,
        })
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Box::new(fetcher);
        self
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: impl IsoExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    #[must_use]
    pub fn with_remote(mut self, remote: impl RemoteStore + 'static) -> Self {
        self.remote = Some(Box::new(remote));
        self
    }

    #[inline]
    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Block on the index lock and return the exclusive view of the index.
    pub fn lock_and_get_index(&self) -> Result<IndexTransaction, CacheError> {
        IndexTransaction::begin(&self.layout)
    }

    /// Return the locations of `object` for `target`, fetching and uploading
    /// only what is missing.
    ///
    /// The index lock is held from lookup to write-back, so concurrent callers
    /// asking for the same key never duplicate a download or upload.
    pub fn retrieve_and_cache_object(
        &self,
        object: &str,
        target: &OsTarget,
        source: &ObjectSource,
        want_remote_upload: bool,
    ) -> Result<CacheEntry, CacheError> {
        let key = CacheKey::new(object, target);
        let wanted = if want_remote_upload {
            key.remote_kind()
        } else {
            LocationKind::Local
        };

        let mut txn = self.lock_and_get_index()?;
        let entry = txn.entry(&key);
        if let Some(location) = entry.get(wanted) {
            if wanted.is_remote() || Path::new(location).is_file() {
                debug!("cache hit for {key} ({wanted})");
                txn.unlock_index();
                return Ok(entry);
            }
        }

        info!("cache miss for {key} ({wanted})");
        let local = self.ensure_local(&mut txn, &key, source)?;

        if want_remote_upload {
            let Some(remote) = self.remote.as_deref() else {
                txn.write_index_and_unlock()?;
                return Err(CacheError::NoRemoteStore);
            };
            match remote.upload(wanted, &key.remote_name(), &local) {
                Ok(id) => {
                    info!("uploaded {key} as {wanted} {id}");
                    txn.set_location(&key, wanted, &id);
                }
                Err(e) => {
                    // Keep the local copy so a retry only repeats the upload.
                    txn.write_index_and_unlock()?;
                    return Err(e);
                }
            }
        }

        let entry = txn.entry(&key);
        txn.write_index_and_unlock()?;
        Ok(entry)
    }

    /// Make sure a local copy of `key` exists, recording it in `txn`.
    fn ensure_local(
        &self,
        txn: &mut IndexTransaction,
        key: &CacheKey,
        source: &ObjectSource,
    ) -> Result<PathBuf, CacheError> {
        if let Some(recorded) = txn.entry(key).get(LocationKind::Local) {
            let path = PathBuf::from(recorded);
            if path.is_file() {
                debug!("reusing local copy of {key}");
                return Ok(path);
            }
            warn!(
                "local copy of {key} is gone ({}), fetching again",
                path.display()
            );
        }

        let dest = self.layout.object_path(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        match source {
            ObjectSource::Url(url) => {
                self.fetcher.fetch(url, &dest)?;
            }
            ObjectSource::IsoMember { iso_object, path } => {
                let iso_key = CacheKey::new(iso_object.as_str(), &key.target);
                let iso_path = txn
                    .entry(&iso_key)
                    .get(LocationKind::Local)
                    .map(PathBuf::from)
                    .filter(|p| p.is_file())
                    .ok_or_else(|| CacheError::MissingSource(iso_key.to_string()))?;
                self.extractor.extract(&iso_path, path, &dest)?;
            }
            ObjectSource::Cached => {
                return Err(CacheError::MissingSource(key.to_string()));
            }
        }

        txn.set_location(key, LocationKind::Local, &dest.to_string_lossy());
        Ok(dest)
    }

    /// Recorded location of `kind` for `key`, without fetching anything.
    /// A local location whose file has vanished counts as absent.
    pub fn lookup(&self, key: &CacheKey, kind: LocationKind) -> Result<Option<String>, CacheError> {
        let txn = self.lock_and_get_index()?;
        let location = txn
            .entry(key)
            .get(kind)
            .filter(|l| kind.is_remote() || Path::new(l).is_file())
            .map(str::to_owned);
        txn.unlock_index();
        Ok(location)
    }

    /// Snapshot every entry in the index.
    pub fn list_entries(&self) -> Result<Vec<CachedObject>, CacheError> {
        let txn = self.lock_and_get_index()?;
        let mut rows = Vec::new();
        for (bucket, objects) in txn.index().buckets() {
            for (object, value) in objects {
                rows.push(CachedObject {
                    bucket: bucket.to_owned(),
                    object: object.clone(),
                    entry: CacheEntry::from_value(value),
                });
            }
        }
        txn.unlock_index();
        Ok(rows)
    }

    /// Drop one location of `key` from the index.
    ///
    /// Forgetting a local copy also removes the file. Remote resources are left
    /// to the caller, who knows how to delete them.
    pub fn forget(&self, key: &CacheKey, kind: LocationKind) -> Result<Option<String>, CacheError> {
        let mut txn = self.lock_and_get_index()?;
        let removed = txn.remove_location(key, kind);
        if let (LocationKind::Local, Some(path)) = (kind, removed.as_deref()) {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove cached file {path}: {e}");
                }
            }
        }
        txn.write_index_and_unlock()?;
        Ok(removed)
    }
}
