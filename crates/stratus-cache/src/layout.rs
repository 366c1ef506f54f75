use crate::CacheError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use stratus_schema::CacheKey;
use tempfile::NamedTempFile;

/// Current cache format version. Incremented on incompatible layout changes.
pub const CACHE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of the artifact cache.
///
/// ```text
/// <root>/index.json                     persisted index document
/// <root>/.index.lock                    exclusive lock, never holds content
/// <root>/objects/<os>-<arch>/<object>   local copies
/// <root>/version                        format marker
/// ```
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheVersion {
    format_version: u32,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn index_file(&self) -> PathBuf {
        self.root.join("index.json")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".index.lock")
    }

    #[inline]
    pub fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    #[inline]
    pub fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.objects_dir().join(bucket)
    }

    /// Local path a cached object is stored under.
    #[inline]
    pub fn object_path(&self, key: &CacheKey) -> PathBuf {
        self.bucket_dir(&key.bucket()).join(&key.object)
    }

    pub fn initialize(&self) -> Result<(), CacheError> {
        fs::create_dir_all(self.objects_dir())?;

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = CacheVersion {
                format_version: CACHE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(&self.root)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| CacheError::Io(e.error))?;
            crate::fsync_dir(&self.root)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), CacheError> {
        let version_path = self.root.join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: CacheVersion = serde_json::from_str(&content)?;

        if ver.format_version != CACHE_FORMAT_VERSION {
            return Err(CacheError::VersionMismatch {
                expected: CACHE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
