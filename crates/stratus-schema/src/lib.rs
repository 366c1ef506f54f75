//! Build configuration, OS catalog, and cache identity types for Stratus.
//!
//! This crate defines the schema layer shared by every other crate: TOML build
//! configuration parsing (`BuildConfig`), the closed set of OS families an
//! install can be delegated to (`OsFamily`), cache keys and location kinds for
//! the artifact cache, and string newtypes for cloud resource identifiers.

pub mod config;
pub mod key;
pub mod os;
pub mod types;

pub use config::{
    parse_config_file, parse_config_str, AccessSection, BuildConfig, CloudSection, ImageSection,
    InstallSection, InstallType, OsSection, TimingSection, CONFIG_VERSION,
};
pub use key::{CacheKey, LocationKind};
pub use os::{distro_of, OsFamily, OsTarget};
pub use types::{ImageId, SecurityGroupId, ServerId, VolumeId};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read build config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse build config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported config_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("no install delegate for distro '{0}'")]
    UnsupportedDistro(String),
    #[error("missing required install parameter: {0}")]
    MissingParameter(String),
    #[error("invalid install: {0}")]
    InvalidInstall(String),
}
