use super::linux::{self, LinuxMedia};
use super::{install_location, DelegateContext, InstallSession, OsDelegate};
use crate::CoreError;
use stratus_schema::{InstallType, OsFamily};

const MEDIA: LinuxMedia = LinuxMedia {
    iso_kernel: "isolinux/vmlinuz",
    iso_initrd: "isolinux/initrd.img",
    tree_kernel: "images/pxeboot/vmlinuz",
    tree_initrd: "images/pxeboot/initrd.img",
    command_line: "ks=http://169.254.169.254/latest/user-data",
};

/// Kickstart rewrite: power off instead of rebooting and, for tree installs,
/// install from the tree URL instead of a CD-ROM.
pub fn kickstart_for(script: &str, install_type: InstallType, tree: &str) -> String {
    let script = linux::poweroff_instead_of_reboot(script);
    match install_type {
        InstallType::Iso => script,
        InstallType::Tree => {
            let body: String = script
                .lines()
                .filter(|line| line.split_whitespace().next() != Some("cdrom"))
                .map(|line| format!("{line}\n"))
                .collect();
            format!("url --url={tree}\n{body}")
        }
    }
}

/// Fedora and RHEL installs driven by kickstart.
pub struct RedHatDelegate {
    session: InstallSession,
}

impl RedHatDelegate {
    pub fn new(ctx: DelegateContext) -> Result<Self, CoreError> {
        let tree = install_location(&ctx.config)?;
        let script = kickstart_for(&ctx.install_script, ctx.config.install.install_type, tree);
        Ok(Self {
            session: InstallSession::new(ctx, script),
        })
    }
}

impl OsDelegate for RedHatDelegate {
    fn family(&self) -> OsFamily {
        OsFamily::RedHat
    }

    fn session(&self) -> &InstallSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut InstallSession {
        &mut self.session
    }

    fn prepare_install_instance(&mut self) -> Result<(), CoreError> {
        linux::prepare(&mut self.session, &MEDIA)
    }

    fn start_install_instance(&mut self) -> Result<(), CoreError> {
        linux::start(&mut self.session)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{config, fixture};
    use super::super::BootPlan;
    use super::*;
    use stratus_cloud::RootDisk;

    #[test]
    fn tree_kickstart_installs_from_url() {
        let ks = "cdrom\nlang en_US\nreboot\n";
        let out = kickstart_for(ks, InstallType::Tree, "http://m/f20/");
        assert_eq!(out, "url --url=http://m/f20/\nlang en_US\npoweroff\n");
    }

    #[test]
    fn iso_kickstart_keeps_cdrom() {
        let out = kickstart_for("cdrom\nreboot\n", InstallType::Iso, "http://m/f20.iso");
        assert_eq!(out, "cdrom\npoweroff\n");
    }

    #[test]
    fn direct_boot_tree_install_uploads_kernel_images() {
        let f = fixture(
            &config("fedora20", "tree", "http://m/f20/", "direct_boot = true"),
            "cdrom\nreboot\n",
        );
        let cloud = f.cloud.clone();
        let mut d = RedHatDelegate::new(f.ctx).unwrap();
        d.prepare_install_instance().unwrap();
        let BootPlan::Direct(boot) = d.session().boot_plan().clone() else {
            panic!("expected a direct boot plan");
        };
        assert_eq!(boot.command_line, MEDIA.command_line);
        assert_eq!(cloud.image(&boot.kernel).unwrap().properties["disk_format"], "aki");
        assert_eq!(cloud.image(&boot.ramdisk).unwrap().properties["disk_format"], "ari");

        d.start_install_instance().unwrap();
        let id = d.install_instance().unwrap().id().clone();
        let spec = cloud.launch_spec(&id).unwrap();
        assert_eq!(spec.name, "fedora20-x86_64-install");
        assert_eq!(spec.root_disk, RootDisk::Blank { size_gb: 10 });
        assert_eq!(spec.direct_boot, Some(boot));
        assert!(spec.install_iso.is_none());
        assert_eq!(
            spec.user_data.as_deref(),
            Some("url --url=http://m/f20/\npoweroff\n")
        );
    }

    #[test]
    fn stub_iso_install_boots_from_stub_with_iso_attached() {
        let f = fixture(&config("fedora20", "iso", "http://m/f20.iso", ""), "reboot\n");
        let cloud = f.cloud.clone();
        let mut d = RedHatDelegate::new(f.ctx).unwrap();
        d.prepare_install_instance().unwrap();
        d.start_install_instance().unwrap();

        let id = d.install_instance().unwrap().id().clone();
        let spec = cloud.launch_spec(&id).unwrap();
        let RootDisk::Image { image, size_gb } = spec.root_disk else {
            panic!("expected an image root disk");
        };
        assert_eq!(size_gb, 10);
        let stub = cloud.image(&image).unwrap();
        assert_eq!(stub.name, "fedora20-x86_64-install-iso-boot-stub");
        assert_eq!(stub.properties["disk_format"], "raw");
        assert_eq!(spec.install_iso.as_ref(), d.install_media_volume());
        assert!(spec.direct_boot.is_none());
    }

    #[test]
    fn identical_stub_prepares_share_one_stub_image() {
        let f = fixture(&config("fedora20", "tree", "http://m/f20/", ""), "reboot\n");
        let cloud = f.cloud.clone();
        let ctx = f.ctx.clone();
        let mut first = RedHatDelegate::new(f.ctx).unwrap();
        first.prepare_install_instance().unwrap();
        let mut second = RedHatDelegate::new(ctx).unwrap();
        second.prepare_install_instance().unwrap();

        assert_eq!(cloud.call_count("images_upload"), 1);
        assert!(matches!(first.session().boot_plan(), BootPlan::Stub(_)));
        assert_eq!(first.session().boot_plan(), second.session().boot_plan());
        assert_eq!(cloud.image_ids().len(), 1);
    }

    #[test]
    fn second_prepare_reuses_cached_media() {
        let f = fixture(
            &config("fedora20", "iso", "http://m/f20.iso", "direct_boot = true"),
            "reboot\n",
        );
        let cloud = f.cloud.clone();
        let ctx = f.ctx.clone();
        let mut first = RedHatDelegate::new(f.ctx).unwrap();
        first.prepare_install_instance().unwrap();
        let mut second = RedHatDelegate::new(ctx).unwrap();
        second.prepare_install_instance().unwrap();

        assert_eq!(cloud.call_count("volumes_create_from_file"), 1);
        assert_eq!(cloud.call_count("images_upload"), 2);
        assert_eq!(first.session().boot_plan(), second.session().boot_plan());
    }
}
