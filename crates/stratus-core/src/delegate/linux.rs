use super::{install_location, BootPlan, InstallSession, INSTALL_ISO};
use crate::CoreError;
use std::path::PathBuf;
use stratus_cache::ObjectSource;
use stratus_cloud::{DirectBoot, RootDisk};
use stratus_schema::{CacheKey, ImageId, InstallType, LocationKind};
use tracing::{debug, info};

/// Where a Linux family keeps its installer kernel, and how to start it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinuxMedia {
    pub iso_kernel: &'static str,
    pub iso_initrd: &'static str,
    pub tree_kernel: &'static str,
    pub tree_initrd: &'static str,
    pub command_line: &'static str,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace `from` with `to` wherever it stands as a whole word.
pub(crate) fn replace_word(text: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, _) in text.match_indices(from) {
        let end = start + from.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        if before.is_some_and(is_word_char) || after.is_some_and(is_word_char) {
            continue;
        }
        out.push_str(&text[last..start]);
        out.push_str(to);
        last = end;
    }
    out.push_str(&text[last..]);
    out
}

/// Completion is detected by the guest powering off, so it must never reboot.
pub(crate) fn poweroff_instead_of_reboot(script: &str) -> String {
    replace_word(script, "reboot", "poweroff")
}

fn tree_url(location: &str, path: &str) -> String {
    format!("{}/{}", location.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Stage kernel, initrd and (for ISO installs) the ISO volume, then record
/// how the instance will boot.
pub(crate) fn prepare(session: &mut InstallSession, media: &LinuxMedia) -> Result<(), CoreError> {
    let config = session.config().clone();
    let (objects, sources, stub_object) = match config.install.install_type {
        InstallType::Iso => {
            session.stage_iso()?;
            let member = |path: &str| ObjectSource::IsoMember {
                iso_object: INSTALL_ISO.to_owned(),
                path: path.to_owned(),
            };
            (
                ["install-iso-kernel", "install-iso-initrd"],
                [member(media.iso_kernel), member(media.iso_initrd)],
                "install-iso-boot-stub",
            )
        }
        InstallType::Tree => {
            let location = install_location(&config)?;
            (
                ["install-url-kernel", "install-url-initrd"],
                [
                    ObjectSource::Url(tree_url(location, media.tree_kernel)),
                    ObjectSource::Url(tree_url(location, media.tree_initrd)),
                ],
                "install-url-boot-stub",
            )
        }
    };

    let plan = if config.install.direct_boot {
        let kernel = session.retrieve(objects[0], &sources[0], LocationKind::Image)?;
        let ramdisk = session.retrieve(objects[1], &sources[1], LocationKind::Image)?;
        BootPlan::Direct(DirectBoot {
            kernel: ImageId::new(kernel),
            ramdisk: ImageId::new(ramdisk),
            command_line: media.command_line.to_owned(),
        })
    } else {
        BootPlan::Stub(boot_stub_image(session, stub_object, &objects, &sources, media)?)
    };
    info!("install media for {} staged", config.target());
    session.set_boot_plan(plan);
    Ok(())
}

/// Image id of the syslinux stub for this target, built and uploaded only
/// when the cache has none.
fn boot_stub_image(
    session: &InstallSession,
    stub_object: &str,
    objects: &[&str; 2],
    sources: &[ObjectSource; 2],
    media: &LinuxMedia,
) -> Result<ImageId, CoreError> {
    let ctx = session.context();
    let key = CacheKey::new(stub_object, &ctx.config.target());
    if let Some(image) = ctx.cache.lookup(&key, LocationKind::Image)? {
        debug!("reusing boot stub {image} for {key}");
        return Ok(ImageId::new(image));
    }

    let kernel = PathBuf::from(session.retrieve(objects[0], &sources[0], LocationKind::Local)?);
    let initrd = PathBuf::from(session.retrieve(objects[1], &sources[1], LocationKind::Local)?);
    let staging = tempfile::tempdir()?;
    let dest = staging.path().join("boot-stub.img");
    ctx.boot_stub.build_stub(&kernel, &initrd, media.command_line, &dest)?;
    let source = ObjectSource::Url(dest.to_string_lossy().into_owned());
    let image = ImageId::new(session.retrieve(stub_object, &source, LocationKind::Image)?);
    info!("boot stub for {key} is image {image}");
    Ok(image)
}

pub(crate) fn start(session: &mut InstallSession) -> Result<(), CoreError> {
    let mut spec = session.base_launch_spec();
    match session.boot_plan().clone() {
        BootPlan::Unprepared => return Err(CoreError::NotPrepared),
        BootPlan::Direct(boot) => spec.direct_boot = Some(boot),
        BootPlan::Stub(image) => {
            spec.root_disk = RootDisk::Image {
                image,
                size_gb: spec.root_disk.size_gb(),
            };
        }
        BootPlan::Iso => {}
    }
    session.launch(spec)
}
