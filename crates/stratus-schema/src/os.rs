use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// OS family an install is delegated to.
///
/// The set is closed: every family has exactly one delegate and adding a
/// family forces every `match` over it to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    RedHat,
    Ubuntu,
    Windows,
}

impl OsFamily {
    /// Map a distro name (`fedora`, `rhel`, `ubuntu`, `win`) to its family.
    pub fn for_distro(distro: &str) -> Result<Self, ConfigError> {
        match distro {
            "fedora" | "rhel" => Ok(Self::RedHat),
            "ubuntu" => Ok(Self::Ubuntu),
            "win" => Ok(Self::Windows),
            other => Err(ConfigError::UnsupportedDistro(other.to_owned())),
        }
    }

    /// Resolve the family for an OS short-id such as `fedora20` or `win2k8r2`.
    pub fn for_short_id(short_id: &str) -> Result<Self, ConfigError> {
        Self::for_distro(distro_of(short_id))
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::RedHat => write!(f, "redhat"),
            OsFamily::Ubuntu => write!(f, "ubuntu"),
            OsFamily::Windows => write!(f, "windows"),
        }
    }
}

/// Leading alphabetic run of a short-id: `fedora20` → `fedora`, `rhel6.5` → `rhel`.
pub fn distro_of(short_id: &str) -> &str {
    let end = short_id
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(short_id.len());
    &short_id[..end]
}

/// The OS/architecture combination a build (or a cache request) targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OsTarget {
    pub short_id: String,
    pub arch: String,
}

impl OsTarget {
    pub fn new(short_id: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            short_id: short_id.into(),
            arch: arch.into(),
        }
    }

    /// Index bucket name, `"<os-short-id>-<arch>"`.
    pub fn bucket(&self) -> String {
        format!("{}-{}", self.short_id, self.arch)
    }

    pub fn family(&self) -> Result<OsFamily, ConfigError> {
        OsFamily::for_short_id(&self.short_id)
    }
}

impl fmt::Display for OsTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.short_id, self.arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distro_prefix_extraction() {
        assert_eq!(distro_of("fedora20"), "fedora");
        assert_eq!(distro_of("rhel6.5"), "rhel");
        assert_eq!(distro_of("ubuntu12.04"), "ubuntu");
        assert_eq!(distro_of("win2k8r2"), "win");
        assert_eq!(distro_of("mockos"), "mockos");
        assert_eq!(distro_of(""), "");
    }

    #[test]
    fn known_families() {
        assert_eq!(OsFamily::for_short_id("fedora20").unwrap(), OsFamily::RedHat);
        assert_eq!(OsFamily::for_short_id("rhel7.0").unwrap(), OsFamily::RedHat);
        assert_eq!(OsFamily::for_short_id("ubuntu13.10").unwrap(), OsFamily::Ubuntu);
        assert_eq!(OsFamily::for_short_id("win7").unwrap(), OsFamily::Windows);
    }

    #[test]
    fn unknown_family_is_config_error() {
        let err = OsFamily::for_short_id("haiku1").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedDistro(ref d) if d == "haiku"));
    }

    #[test]
    fn target_bucket() {
        let t = OsTarget::new("fedora20", "x86_64");
        assert_eq!(t.bucket(), "fedora20-x86_64");
        assert_eq!(t.to_string(), "fedora20 x86_64");
    }
}
