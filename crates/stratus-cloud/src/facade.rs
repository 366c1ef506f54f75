use crate::CloudError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use stratus_schema::{ImageId, SecurityGroupId, ServerId, VolumeId};

/// Raw diagnostics counters as reported by the hypervisor.
pub type Diagnostics = BTreeMap<String, serde_json::Value>;

/// Status strings the controller interprets. Everything else is opaque.
pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const STATUS_SHUTOFF: &str = "SHUTOFF";
pub const STATUS_ERROR: &str = "ERROR";

/// Image service statuses that end a snapshot poll.
pub const IMAGE_ACTIVE: &str = "active";
pub const IMAGE_ERROR: &str = "error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: ServerId,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: ImageId,
    pub name: String,
    pub status: String,
    pub public: bool,
    /// Free-form image properties (everything outside the service's core fields).
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub id: VolumeId,
    pub name: String,
    pub status: String,
    pub size_gb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub name: String,
    pub public_key: String,
    /// Only present in the response to a create call.
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr: String,
}

impl SecurityGroupRule {
    /// Inbound TCP on a single port from anywhere.
    pub fn tcp_ingress(port: u16) -> Self {
        Self {
            protocol: "tcp".to_owned(),
            from_port: port,
            to_port: port,
            cidr: "0.0.0.0/0".to_owned(),
        }
    }
}

/// Disk format of an uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    /// Kernel image for direct boot.
    Aki,
    /// Ramdisk image for direct boot.
    Ari,
    Raw,
}

impl DiskFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DiskFormat::Aki => "aki",
            DiskFormat::Ari => "ari",
            DiskFormat::Raw => "raw",
        }
    }

    /// Container format the image service expects alongside this disk format.
    pub fn container_format(self) -> &'static str {
        match self {
            DiskFormat::Aki => "aki",
            DiskFormat::Ari => "ari",
            DiskFormat::Raw => "bare",
        }
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "source")]
pub enum RootDisk {
    /// Empty volume the installer partitions.
    Blank { size_gb: u32 },
    /// Boot from an existing image, e.g. a syslinux stub.
    Image { image: ImageId, size_gb: u32 },
}

impl RootDisk {
    pub fn size_gb(&self) -> u32 {
        match self {
            RootDisk::Blank { size_gb } | RootDisk::Image { size_gb, .. } => *size_gb,
        }
    }
}

/// Kernel, ramdisk and command line the hypervisor boots directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectBoot {
    pub kernel: ImageId,
    pub ramdisk: ImageId,
    pub command_line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub name: String,
    pub flavor: String,
    pub root_disk: RootDisk,
    /// Install ISO attached as a CD-ROM.
    pub install_iso: Option<VolumeId>,
    pub direct_boot: Option<DirectBoot>,
    /// Install script served by the metadata service.
    pub user_data: Option<String>,
    pub key_name: Option<String>,
    pub network_id: Option<String>,
}

/// Changes applied to an image record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUpdate {
    pub public: Option<bool>,
    pub set_properties: BTreeMap<String, String>,
    pub remove_properties: Vec<String>,
}

impl ImageUpdate {
    pub fn is_empty(&self) -> bool {
        self.public.is_none() && self.set_properties.is_empty() && self.remove_properties.is_empty()
    }
}

/// The cloud control plane as seen by the build.
///
/// Every call may fail transiently; callers treat an error as "state unknown"
/// and re-query rather than assume the operation did or did not happen.
pub trait CloudFacade: Send + Sync {
    fn name(&self) -> &str;

    fn servers_get(&self, id: &ServerId) -> Result<ServerRecord, CloudError>;

    fn servers_create(&self, spec: &LaunchSpec) -> Result<ServerRecord, CloudError>;

    fn servers_diagnostics(&self, id: &ServerId) -> Result<Diagnostics, CloudError>;

    /// Ask the hypervisor for a clean shutdown.
    fn servers_stop(&self, id: &ServerId) -> Result<(), CloudError>;

    fn servers_delete(&self, id: &ServerId) -> Result<(), CloudError>;

    /// Export the server's root disk as a new image.
    fn servers_create_image(&self, id: &ServerId, name: &str) -> Result<ImageId, CloudError>;

    fn servers_add_floating_ip(&self, id: &ServerId, address: &str) -> Result<(), CloudError>;

    fn servers_remove_floating_ip(&self, id: &ServerId, address: &str) -> Result<(), CloudError>;

    fn servers_add_security_group(
        &self,
        id: &ServerId,
        group: &SecurityGroupId,
    ) -> Result<(), CloudError>;

    fn servers_remove_security_group(
        &self,
        id: &ServerId,
        group: &SecurityGroupId,
    ) -> Result<(), CloudError>;

    fn floating_ips_create(&self, pool: Option<&str>) -> Result<FloatingIp, CloudError>;

    fn floating_ips_delete(&self, ip: &FloatingIp) -> Result<(), CloudError>;

    fn volumes_get(&self, id: &VolumeId) -> Result<VolumeRecord, CloudError>;

    /// Create a block volume holding the contents of `path`.
    fn volumes_create_from_file(&self, name: &str, path: &Path) -> Result<VolumeId, CloudError>;

    fn volumes_delete(&self, id: &VolumeId) -> Result<(), CloudError>;

    fn images_get(&self, id: &ImageId) -> Result<ImageRecord, CloudError>;

    fn images_upload(
        &self,
        name: &str,
        path: &Path,
        format: DiskFormat,
    ) -> Result<ImageId, CloudError>;

    fn images_update(&self, id: &ImageId, update: &ImageUpdate) -> Result<(), CloudError>;

    fn security_groups_create(
        &self,
        name: &str,
        description: &str,
    ) -> Result<SecurityGroupId, CloudError>;

    fn security_groups_delete(&self, id: &SecurityGroupId) -> Result<(), CloudError>;

    fn security_group_rules_create(
        &self,
        group: &SecurityGroupId,
        rule: &SecurityGroupRule,
    ) -> Result<(), CloudError>;

    fn keypairs_create(&self, name: &str) -> Result<KeyPair, CloudError>;

    fn keypairs_delete(&self, name: &str) -> Result<(), CloudError>;

    /// Whether volumes can be attached as CD-ROM devices.
    fn supports_cdrom(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_format_names() {
        assert_eq!(DiskFormat::Aki.to_string(), "aki");
        assert_eq!(DiskFormat::Ari.container_format(), "ari");
        assert_eq!(DiskFormat::Raw.container_format(), "bare");
    }

    #[test]
    fn root_disk_size() {
        assert_eq!(RootDisk::Blank { size_gb: 10 }.size_gb(), 10);
        let stub = RootDisk::Image {
            image: ImageId::new("img-1"),
            size_gb: 20,
        };
        assert_eq!(stub.size_gb(), 20);
    }

    #[test]
    fn launch_spec_serializes_root_disk_tag() {
        let spec = LaunchSpec {
            name: "fedora20-x86_64-install".to_owned(),
            flavor: "m1.small".to_owned(),
            root_disk: RootDisk::Blank { size_gb: 10 },
            install_iso: None,
            direct_boot: None,
            user_data: None,
            key_name: None,
            network_id: None,
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["root_disk"]["source"], "blank");
        assert_eq!(json["root_disk"]["size_gb"], 10);
    }

    #[test]
    fn empty_image_update() {
        assert!(ImageUpdate::default().is_empty());
        let update = ImageUpdate {
            public: Some(false),
            ..ImageUpdate::default()
        };
        assert!(!update.is_empty());
    }
}
