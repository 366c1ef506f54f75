use crate::os::{OsFamily, OsTarget};
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub config_version: u32,
    pub os: OsSection,
    pub install: InstallSection,
    pub image: ImageSection,
    #[serde(default)]
    pub access: AccessSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub cloud: CloudSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OsSection {
    pub short_id: String,
    #[serde(default = "default_arch")]
    pub arch: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstallType {
    /// Install from an ISO attached as a CD-ROM volume.
    Iso,
    /// Network install from a package tree URL.
    Tree,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstallSection {
    #[serde(rename = "type")]
    pub install_type: InstallType,
    #[serde(default)]
    pub location: Option<String>,
    /// Path to the install script (kickstart, preseed, unattend).
    #[serde(default)]
    pub script: Option<PathBuf>,
    #[serde(default)]
    pub direct_boot: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ImageSection {
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default = "default_disk_size")]
    pub disk_size_gb: u32,
    #[serde(default = "default_flavor")]
    pub flavor: String,
    #[serde(default = "default_true")]
    pub keep_install_media: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AccessSection {
    #[serde(default)]
    pub keypair: bool,
    #[serde(default)]
    pub ssh: bool,
    #[serde(default)]
    pub floating_ip: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TimingSection {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_snapshot_settle")]
    pub snapshot_settle_secs: u64,
    #[serde(default = "default_delete_timeout")]
    pub delete_timeout_ticks: u64,
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_ticks: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            snapshot_settle_secs: default_snapshot_settle(),
            delete_timeout_ticks: default_delete_timeout(),
            snapshot_timeout_ticks: default_snapshot_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CloudSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub compute_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub volume_url: Option<String>,
    /// Environment variable holding a pre-issued auth token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub floating_ip_pool: Option<String>,
    #[serde(default)]
    pub network_id: Option<String>,
    /// Whether the compute service can map a volume as a CD-ROM device.
    #[serde(default = "default_true")]
    pub cdrom: bool,
}

impl Default for CloudSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            compute_url: None,
            image_url: None,
            volume_url: None,
            token_env: default_token_env(),
            floating_ip_pool: None,
            network_id: None,
            cdrom: true,
        }
    }
}

fn default_arch() -> String {
    "x86_64".to_owned()
}

fn default_disk_size() -> u32 {
    10
}

fn default_flavor() -> String {
    "m1.small".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> u64 {
    1
}

fn default_snapshot_settle() -> u64 {
    10
}

fn default_delete_timeout() -> u64 {
    300
}

fn default_snapshot_timeout() -> u64 {
    3600
}

fn default_backend() -> String {
    "openstack".to_owned()
}

fn default_token_env() -> String {
    "OS_TOKEN".to_owned()
}

impl BuildConfig {
    pub fn target(&self) -> OsTarget {
        OsTarget::new(&self.os.short_id, &self.os.arch)
    }

    pub fn family(&self) -> Result<OsFamily, ConfigError> {
        self.target().family()
    }

    /// Check the parameters every delegate needs before any resource exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config_version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(self.config_version));
        }
        let family = self.family()?;
        if self.image.name.trim().is_empty() {
            return Err(ConfigError::MissingParameter("image.name".to_owned()));
        }
        if self.install.script.is_none() {
            return Err(ConfigError::MissingParameter("install.script".to_owned()));
        }
        if self.install.location.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::MissingParameter("install.location".to_owned()));
        }
        if family == OsFamily::Windows {
            if self.install.install_type != InstallType::Iso {
                return Err(ConfigError::InvalidInstall(
                    "windows installs require install.type = \"iso\"".to_owned(),
                ));
            }
            if self.install.direct_boot {
                return Err(ConfigError::InvalidInstall(
                    "windows installs cannot use direct boot".to_owned(),
                ));
            }
        }
        Ok(())
    }

    /// Read the install script, resolving relative paths against `base_dir`.
    pub fn read_install_script(&self, base_dir: &Path) -> Result<String, ConfigError> {
        let script = self
            .install
            .script
            .as_ref()
            .ok_or_else(|| ConfigError::MissingParameter("install.script".to_owned()))?;
        let path = if script.is_absolute() {
            script.clone()
        } else {
            base_dir.join(script)
        };
        Ok(fs::read_to_string(path)?)
    }
}

pub fn parse_config_str(input: &str) -> Result<BuildConfig, ConfigError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<BuildConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}
