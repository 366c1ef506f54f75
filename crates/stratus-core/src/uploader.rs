use std::path::Path;
use std::sync::Arc;
use stratus_cache::{CacheError, RemoteStore};
use stratus_cloud::{CloudFacade, DiskFormat};
use stratus_schema::LocationKind;

/// Uploads cached objects into the block storage and image services of a cloud.
#[derive(Clone)]
pub struct CloudRemoteStore {
    cloud: Arc<dyn CloudFacade>,
}

impl CloudRemoteStore {
    pub fn new(cloud: Arc<dyn CloudFacade>) -> Self {
        Self { cloud }
    }
}

/// Image format for an object name: kernels are `aki`, ramdisks `ari`,
/// anything else (boot stubs) `raw`.
pub fn disk_format_for(name: &str) -> DiskFormat {
    if name.ends_with("-kernel") {
        DiskFormat::Aki
    } else if name.ends_with("-initrd") {
        DiskFormat::Ari
    } else {
        DiskFormat::Raw
    }
}

impl RemoteStore for CloudRemoteStore {
    fn upload(&self, kind: LocationKind, name: &str, path: &Path) -> Result<String, CacheError> {
        let uploaded = match kind {
            LocationKind::Volume => self
                .cloud
                .volumes_create_from_file(name, path)
                .map(|id| id.into_inner()),
            LocationKind::Image => self
                .cloud
                .images_upload(name, path, disk_format_for(name))
                .map(|id| id.into_inner()),
            LocationKind::Local => {
                return Err(CacheError::Upload(format!(
                    "{name}: local is not a remote location"
                )))
            }
        };
        uploaded.map_err(|e| CacheError::Upload(format!("{name}: {e}")))
    }
}
