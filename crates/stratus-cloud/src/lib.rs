//! Cloud control plane access for Stratus.
//!
//! Builds talk to the cloud only through the [`CloudFacade`] trait. Two
//! implementations ship here: [`MockCloud`], an in-memory, scriptable backend
//! used by tests and dry runs, and [`OpenStackCloud`], a blocking HTTP client
//! for compute, image and volume endpoints authenticated with a pre-issued
//! token.

pub mod facade;
pub mod mock;
pub mod openstack;

pub use facade::{
    CloudFacade, Diagnostics, DirectBoot, DiskFormat, FloatingIp, ImageRecord, ImageUpdate,
    KeyPair, LaunchSpec, RootDisk, SecurityGroupRule, ServerRecord, VolumeRecord, IMAGE_ACTIVE,
    IMAGE_ERROR, STATUS_ACTIVE, STATUS_ERROR, STATUS_SHUTOFF,
};
pub use mock::MockCloud;
pub use openstack::{OpenStackCloud, OpenStackConfig};

use stratus_schema::CloudSection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("cloud I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unexpected response from {endpoint}: {reason}")]
    Response { endpoint: String, reason: String },
    #[error("operation not supported by {backend} backend: {operation}")]
    Unsupported { backend: String, operation: String },
    #[error("cloud config error: {0}")]
    Config(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

impl CloudError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }
}

/// Instantiate the cloud backend named by `name`.
pub fn select_cloud(name: &str, section: &CloudSection) -> Result<Box<dyn CloudFacade>, CloudError> {
    match name {
        "mock" => Ok(Box::new(MockCloud::new().with_cdrom(section.cdrom))),
        "openstack" => Ok(Box::new(OpenStackCloud::new(
            OpenStackConfig::from_section(section)?,
        ))),
        other => Err(CloudError::Config(format!("unknown cloud backend '{other}'"))),
    }
}
