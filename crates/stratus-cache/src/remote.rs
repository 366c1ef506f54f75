use crate::CacheError;
use std::path::Path;
use stratus_schema::LocationKind;

/// Cloud-side store that cached objects can be uploaded to.
pub trait RemoteStore: Send + Sync {
    /// Upload the file at `path` as `name` into the service behind `kind`
    /// (`Volume` or `Image`), returning the remote identifier.
    fn upload(&self, kind: LocationKind, name: &str, path: &Path) -> Result<String, CacheError>;
}
