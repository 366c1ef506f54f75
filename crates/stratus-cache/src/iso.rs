use crate::CacheError;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Pulls single files (kernels, ramdisks) out of a cached ISO image.
pub trait IsoExtractor: Send + Sync {
    fn extract(&self, iso: &Path, member: &str, dest: &Path) -> Result<(), CacheError>;
}

/// Extractor backed by `xorriso -osirrox`.
#[derive(Debug, Default)]
pub struct XorrisoExtractor;

impl IsoExtractor for XorrisoExtractor {
    fn extract(&self, iso: &Path, member: &str, dest: &Path) -> Result<(), CacheError> {
        let member = format!("/{}", member.trim_start_matches('/'));
        let partial = dest.with_extension("partial");
        if partial.exists() {
            fs::remove_file(&partial)?;
        }
        debug!("extracting {member} from {}", iso.display());

        let output = Command::new("xorriso")
            .args(["-osirrox", "on", "-indev"])
            .arg(iso)
            .arg("-extract")
            .arg(&member)
            .arg(&partial)
            .output()
            .map_err(|e| CacheError::Extract(format!("xorriso failed to start: {e}")))?;
        if !output.status.success() {
            let _ = fs::remove_file(&partial);
            return Err(CacheError::Extract(format!(
                "xorriso could not extract {member} from {}: {}",
                iso.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // ISO members come out read-only.
        fs::set_permissions(&partial, fs::Permissions::from_mode(0o644))?;
        fs::rename(&partial, dest)?;
        Ok(())
    }
}
