use super::{BootPlan, DelegateContext, InstallSession, OsDelegate};
use crate::CoreError;
use stratus_schema::{ConfigError, InstallType, OsFamily};

/// Windows installs: the unattend file is user data and firmware boots the
/// attached ISO from a blank disk.
pub struct WindowsDelegate {
    session: InstallSession,
}

impl WindowsDelegate {
    pub fn new(ctx: DelegateContext) -> Result<Self, CoreError> {
        if ctx.config.install.install_type != InstallType::Iso {
            return Err(ConfigError::InvalidInstall(
                "windows installs require install.type = \"iso\"".to_owned(),
            )
            .into());
        }
        if ctx.config.install.direct_boot {
            return Err(
                ConfigError::InvalidInstall("windows installs cannot use direct boot".to_owned())
                    .into(),
            );
        }
        let script = ctx.install_script.clone();
        Ok(Self {
            session: InstallSession::new(ctx, script),
        })
    }
}

impl OsDelegate for WindowsDelegate {
    fn family(&self) -> OsFamily {
        OsFamily::Windows
    }

    fn session(&self) -> &InstallSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut InstallSession {
        &mut self.session
    }

    fn prepare_install_instance(&mut self) -> Result<(), CoreError> {
        self.session.stage_iso()?;
        self.session.set_boot_plan(BootPlan::Iso);
        Ok(())
    }

    fn start_install_instance(&mut self) -> Result<(), CoreError> {
        if *self.session.boot_plan() != BootPlan::Iso {
            return Err(CoreError::NotPrepared);
        }
        let spec = self.session.base_launch_spec();
        self.session.launch(spec)
    }
}
