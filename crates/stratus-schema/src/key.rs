use crate::os::OsTarget;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a cached artifact currently resides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    /// A path on the local filesystem.
    Local,
    /// A block volume id.
    Volume,
    /// An image service id.
    Image,
}

impl LocationKind {
    pub const ALL: [LocationKind; 3] = [Self::Local, Self::Volume, Self::Image];

    pub fn as_str(self) -> &'static str {
        match self {
            LocationKind::Local => "local",
            LocationKind::Volume => "volume",
            LocationKind::Image => "image",
        }
    }

    pub fn is_remote(self) -> bool {
        !matches!(self, LocationKind::Local)
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "volume" => Ok(Self::Volume),
            "image" => Ok(Self::Image),
            other => Err(format!(
                "unknown location kind '{other}', expected local, volume or image"
            )),
        }
    }
}

/// Identity of one cacheable artifact: object name plus OS short-id and arch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub object: String,
    pub target: OsTarget,
}

impl CacheKey {
    pub fn new(object: impl Into<String>, target: &OsTarget) -> Self {
        Self {
            object: object.into(),
            target: target.clone(),
        }
    }

    #[inline]
    pub fn bucket(&self) -> String {
        self.target.bucket()
    }

    /// Remote location kind this object is uploaded to.
    ///
    /// ISOs become block volumes (attached as CD-ROMs); kernels, ramdisks and
    /// boot stubs go to the image service.
    pub fn remote_kind(&self) -> LocationKind {
        if self.object.ends_with("-iso") || self.object.ends_with(".iso") {
            LocationKind::Volume
        } else {
            LocationKind::Image
        }
    }

    /// Name used for the remote copy, unique per bucket and object.
    pub fn remote_name(&self) -> String {
        format!("{}-{}", self.bucket(), self.object)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket(), self.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> OsTarget {
        OsTarget::new("fedora20", "x86_64")
    }

    #[test]
    fn key_is_derived_from_parts() {
        let a = CacheKey::new("install-iso", &target());
        let b = CacheKey::new("install-iso", &target());
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "fedora20-x86_64/install-iso");
        assert_eq!(a.remote_name(), "fedora20-x86_64-install-iso");
    }

    #[test]
    fn iso_objects_go_to_volumes() {
        assert_eq!(
            CacheKey::new("install-iso", &target()).remote_kind(),
            LocationKind::Volume
        );
        assert_eq!(
            CacheKey::new("boot.iso", &target()).remote_kind(),
            LocationKind::Volume
        );
        assert_eq!(
            CacheKey::new("install-iso-kernel", &target()).remote_kind(),
            LocationKind::Image
        );
        assert_eq!(
            CacheKey::new("install-url-initrd", &target()).remote_kind(),
            LocationKind::Image
        );
    }

    #[test]
    fn location_kind_parse_and_display() {
        for kind in LocationKind::ALL {
            assert_eq!(kind.as_str().parse::<LocationKind>().unwrap(), kind);
        }
        assert!("cinder".parse::<LocationKind>().is_err());
        assert!(!LocationKind::Local.is_remote());
        assert!(LocationKind::Volume.is_remote());
    }

    #[test]
    fn location_kind_serializes_lowercase() {
        let json = serde_json::to_string(&LocationKind::Image).unwrap();
        assert_eq!(json, "\"image\"");
    }
}
