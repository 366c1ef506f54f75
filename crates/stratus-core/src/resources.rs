use crate::CoreError;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use stratus_cloud::CloudFacade;
use tracing::{debug, info, warn};

/// `~/.stratus/keys`, or `.stratus/keys` when `HOME` is unset.
pub fn default_keys_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".stratus")
        .join("keys")
}

fn write_owner_only(path: &Path, content: &str) -> Result<(), io::Error> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; tighten a pre-existing file too.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove key file {}: {e}", path.display()),
    }
}

/// A keypair created for one build, with its key material on disk.
#[derive(Debug)]
pub struct EphemeralKeyPair {
    name: String,
    private_key_path: PathBuf,
    public_key_path: PathBuf,
}

impl EphemeralKeyPair {
    /// Create `name` remotely and store `<keys_dir>/<name>` and
    /// `<keys_dir>/<name>.pub`, both readable by the owner only.
    pub fn provision(
        cloud: &dyn CloudFacade,
        name: &str,
        keys_dir: &Path,
    ) -> Result<Self, CoreError> {
        let pair = cloud.keypairs_create(name)?;
        let Some(private_key) = pair.private_key.as_deref() else {
            if let Err(e) = cloud.keypairs_delete(name) {
                warn!("failed to delete keypair {name}: {e}");
            }
            return Err(CoreError::MissingKeyMaterial(name.to_owned()));
        };

        let this = Self {
            name: pair.name.clone(),
            private_key_path: keys_dir.join(name),
            public_key_path: keys_dir.join(format!("{name}.pub")),
        };
        let written = fs::create_dir_all(keys_dir)
            .and_then(|()| write_owner_only(&this.private_key_path, private_key))
            .and_then(|()| write_owner_only(&this.public_key_path, &pair.public_key));
        if let Err(e) = written {
            this.release(cloud);
            return Err(e.into());
        }
        info!("provisioned keypair {name}");
        Ok(this)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn private_key_path(&self) -> &Path {
        &self.private_key_path
    }

    pub fn public_key_path(&self) -> &Path {
        &self.public_key_path
    }

    /// Delete the keypair remotely and remove its files. Failures are logged.
    pub fn release(self, cloud: &dyn CloudFacade) {
        match cloud.keypairs_delete(&self.name) {
            Ok(()) => debug!("deleted keypair {}", self.name),
            Err(e) => warn!("failed to delete keypair {}: {e}", self.name),
        }
        remove_if_present(&self.private_key_path);
        remove_if_present(&self.public_key_path);
    }
}
