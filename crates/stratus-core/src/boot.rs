use crate::CoreError;
use std::fs::{self, File};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Size of the FAT boot stub, large enough for a distro kernel and initrd.
pub const STUB_SIZE_BYTES: u64 = 128 * 1024 * 1024;

/// Produces a small bootable disk that chain-loads an installer kernel.
///
/// Used when the cloud cannot boot a kernel directly: the stub image becomes
/// the instance's boot disk.
pub trait BootStubBuilder: Send + Sync {
    fn build_stub(
        &self,
        kernel: &Path,
        initrd: &Path,
        command_line: &str,
        dest: &Path,
    ) -> Result<(), CoreError>;
}

/// Builds a FAT image with syslinux using `mkfs.vfat`, `mcopy` and `syslinux`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyslinuxStubBuilder;

/// Boot configuration that starts `vmlinuz` with `command_line` immediately.
pub fn syslinux_config(command_line: &str) -> String {
    format!(
        "DEFAULT install\nTIMEOUT 1\nPROMPT 0\nLABEL install\n  KERNEL vmlinuz\n  APPEND initrd=initrd.img {command_line}\n"
    )
}

fn run(program: &str, args: &[&str]) -> Result<(), CoreError> {
    debug!("running {program} {}", args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| CoreError::BootStub(format!("{program} failed to start: {e}")))?;
    if !output.status.success() {
        return Err(CoreError::BootStub(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

impl BootStubBuilder for SyslinuxStubBuilder {
    fn build_stub(
        &self,
        kernel: &Path,
        initrd: &Path,
        command_line: &str,
        dest: &Path,
    ) -> Result<(), CoreError> {
        let staging = tempfile::tempdir()?;
        let cfg = staging.path().join("syslinux.cfg");
        fs::write(&cfg, syslinux_config(command_line))?;

        let partial = dest.with_extension("partial");
        File::create(&partial)?.set_len(STUB_SIZE_BYTES)?;
        let image = partial.to_string_lossy().into_owned();
        let target = |name: &str| format!("::{name}");

        let built = run("mkfs.vfat", &[&image])
            .and_then(|()| {
                run(
                    "mcopy",
                    &["-i", &image, &kernel.to_string_lossy(), &target("vmlinuz")],
                )
            })
            .and_then(|()| {
                run(
                    "mcopy",
                    &["-i", &image, &initrd.to_string_lossy(), &target("initrd.img")],
                )
            })
            .and_then(|()| {
                run(
                    "mcopy",
                    &["-i", &image, &cfg.to_string_lossy(), &target("syslinux.cfg")],
                )
            })
            .and_then(|()| run("syslinux", &["--install", &image]));
        if let Err(e) = built {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        fs::rename(&partial, dest)?;
        info!("built boot stub {}", dest.display());
        Ok(())
    }
}
