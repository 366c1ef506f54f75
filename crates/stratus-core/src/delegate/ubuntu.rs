use super::linux::{self, LinuxMedia};
use super::{DelegateContext, InstallSession, OsDelegate};
use crate::CoreError;
use stratus_schema::OsFamily;

const PRESEED_COMMAND_LINE: &str = "preseed/url=http://169.254.169.254/latest/user-data \
debian-installer/locale=en_US console-setup/layoutcode=us ipv6.disable=1 \
netcfg/choose_interface=auto keyboard-configuration/layoutcode=us priority=critical --";

const MEDIA_AMD64: LinuxMedia = LinuxMedia {
    iso_kernel: "install/vmlinuz",
    iso_initrd: "install/initrd.gz",
    tree_kernel: "main/installer-amd64/current/images/netboot/ubuntu-installer/amd64/linux",
    tree_initrd: "main/installer-amd64/current/images/netboot/ubuntu-installer/amd64/initrd.gz",
    command_line: PRESEED_COMMAND_LINE,
};

const MEDIA_I386: LinuxMedia = LinuxMedia {
    iso_kernel: "install/vmlinuz",
    iso_initrd: "install/initrd.gz",
    tree_kernel: "main/installer-i386/current/images/netboot/ubuntu-installer/i386/linux",
    tree_initrd: "main/installer-i386/current/images/netboot/ubuntu-installer/i386/initrd.gz",
    command_line: PRESEED_COMMAND_LINE,
};

fn media_for(arch: &str) -> &'static LinuxMedia {
    match arch {
        "x86" | "i386" | "i486" | "i586" | "i686" => &MEDIA_I386,
        _ => &MEDIA_AMD64,
    }
}

/// Ubuntu installs driven by a debian-installer preseed.
pub struct UbuntuDelegate {
    session: InstallSession,
    media: &'static LinuxMedia,
}

impl UbuntuDelegate {
    pub fn new(ctx: DelegateContext) -> Result<Self, CoreError> {
        let script = linux::poweroff_instead_of_reboot(&ctx.install_script);
        let media = media_for(&ctx.config.os.arch);
        Ok(Self {
            session: InstallSession::new(ctx, script),
            media,
        })
    }
}

impl OsDelegate for UbuntuDelegate {
    fn family(&self) -> OsFamily {
        OsFamily::Ubuntu
    }

    fn session(&self) -> &InstallSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut InstallSession {
        &mut self.session
    }

    fn prepare_install_instance(&mut self) -> Result<(), CoreError> {
        linux::prepare(&mut self.session, self.media)
    }

    fn start_install_instance(&mut self) -> Result<(), CoreError> {
        linux::start(&mut self.session)
    }
}
