use crate::CacheError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Transport that materializes a source location as a local file.
pub trait Fetcher: Send + Sync {
    /// Copy `source` to `dest`, returning the number of bytes written.
    ///
    /// `dest` must only appear once the copy is complete.
    fn fetch(&self, source: &str, dest: &Path) -> Result<u64, CacheError>;
}

/// Fetcher for `file://` URLs, bare paths, and `http(s)://` URLs.
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl Default for UreqFetcher {
    fn default() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl UreqFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn fetch_http(&self, url: &str, dest: &Path) -> Result<u64, CacheError> {
        let fetch_err = |reason: String| CacheError::Fetch {
            source_url: url.to_owned(),
            reason,
        };
        let resp = match self.agent.get(url).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(fetch_err(format!("HTTP {code}")));
            }
            Err(e) => return Err(fetch_err(e.to_string())),
        };
        let mut reader = resp.into_body().into_reader();
        write_atomically(dest, |file| {
            io::copy(&mut reader, file).map_err(|e| fetch_err(e.to_string()))
        })
    }

    fn fetch_file(source: &str, path: &Path, dest: &Path) -> Result<u64, CacheError> {
        let mut input = fs::File::open(path).map_err(|e| CacheError::Fetch {
            source_url: source.to_owned(),
            reason: e.to_string(),
        })?;
        write_atomically(dest, |file| Ok(io::copy(&mut input, file)?))
    }
}

impl Fetcher for UreqFetcher {
    fn fetch(&self, source: &str, dest: &Path) -> Result<u64, CacheError> {
        info!("fetching {source}");
        let bytes = if source.starts_with("http://") || source.starts_with("https://") {
            self.fetch_http(source, dest)?
        } else if let Some(path) = local_source_path(source) {
            Self::fetch_file(source, &path, dest)?
        } else {
            return Err(CacheError::UnsupportedSource(source.to_owned()));
        };
        debug!("fetched {bytes} bytes into {}", dest.display());
        Ok(bytes)
    }
}

/// Filesystem path named by a `file://` URL or a bare path.
pub fn local_source_path(source: &str) -> Option<PathBuf> {
    if let Some(rest) = source.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if source.contains("://") || source.is_empty() {
        return None;
    }
    Some(PathBuf::from(source))
}

/// Write through a temp file in `dest`'s directory and rename into place.
fn write_atomically(
    dest: &Path,
    fill: impl FnOnce(&mut fs::File) -> Result<u64, CacheError>,
) -> Result<u64, CacheError> {
    let dir = dest.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    let bytes = fill(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| CacheError::Io(e.error))?;
    Ok(bytes)
}
