//! Per-OS install delegates.
//!
//! A delegate turns a `BuildConfig` into boot media and a launched install
//! instance. The three families share one `InstallSession` that owns the
//! instance, the install-media volume and the build status; the family types
//! only decide which media to stage and how to boot it.

mod linux;
mod redhat;
mod ubuntu;
mod windows;

pub use redhat::RedHatDelegate;
pub use ubuntu::UbuntuDelegate;
pub use windows::WindowsDelegate;

use crate::boot::BootStubBuilder;
use crate::clock::Clock;
use crate::concurrency::AbortSignal;
use crate::instance::{Instance, InstanceContext, InstanceSettings};
use crate::lifecycle::{validate_transition, BuildStatus};
use crate::resources::EphemeralKeyPair;
use crate::CoreError;
use std::path::PathBuf;
use std::sync::Arc;
use stratus_cache::{ArtifactCache, CacheEntry, CacheError, ObjectSource};
use stratus_cloud::{CloudFacade, DirectBoot, LaunchSpec, STATUS_ERROR};
use stratus_schema::{
    BuildConfig, CacheKey, ConfigError, ImageId, InstallType, LocationKind, OsFamily, VolumeId,
};
use tracing::{debug, info, warn};

/// Cache object name of the install ISO.
pub const INSTALL_ISO: &str = "install-iso";

/// Everything a delegate needs from the outside world.
#[derive(Clone)]
pub struct DelegateContext {
    pub config: BuildConfig,
    /// Install script as read from disk, before any rewriting.
    pub install_script: String,
    pub cloud: Arc<dyn CloudFacade>,
    pub cache: Arc<ArtifactCache>,
    pub clock: Arc<dyn Clock>,
    pub settings: InstanceSettings,
    pub boot_stub: Arc<dyn BootStubBuilder>,
    pub abort: AbortSignal,
    pub keys_dir: PathBuf,
}

impl DelegateContext {
    pub fn instance_context(&self) -> InstanceContext {
        InstanceContext {
            cloud: Arc::clone(&self.cloud),
            clock: Arc::clone(&self.clock),
            settings: self.settings.clone(),
            abort: self.abort.clone(),
        }
    }

    /// ISO installs attach the image as a CD-ROM, which not every backend can do.
    fn require_cdrom_for_iso(&self) -> Result<(), ConfigError> {
        if self.config.install.install_type == InstallType::Iso && !self.cloud.supports_cdrom() {
            return Err(ConfigError::InvalidInstall(format!(
                "ISO installs need CD-ROM block device mapping, which the {} backend lacks",
                self.cloud.name()
            )));
        }
        Ok(())
    }
}

/// How the install instance boots once media are staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootPlan {
    /// Nothing staged yet.
    Unprepared,
    /// Hypervisor boots kernel and ramdisk images directly.
    Direct(DirectBoot),
    /// Boot disk cloned from a syslinux stub image.
    Stub(ImageId),
    /// Blank root disk; firmware boots the attached ISO.
    Iso,
}

/// Install state shared by every delegate.
pub struct InstallSession {
    ctx: DelegateContext,
    script: String,
    status: BuildStatus,
    aborted: bool,
    instance: Option<Instance>,
    iso_volume: Option<VolumeId>,
    boot: BootPlan,
}

impl InstallSession {
    pub fn new(ctx: DelegateContext, script: String) -> Self {
        Self {
            ctx,
            script,
            status: BuildStatus::Running,
            aborted: false,
            instance: None,
            iso_volume: None,
            boot: BootPlan::Unprepared,
        }
    }

    pub fn context(&self) -> &DelegateContext {
        &self.ctx
    }

    pub fn config(&self) -> &BuildConfig {
        &self.ctx.config
    }

    /// The install script after OS-specific rewriting; sent as user data.
    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn instance(&self) -> Option<&Instance> {
        self.instance.as_ref()
    }

    pub fn instance_mut(&mut self) -> Option<&mut Instance> {
        self.instance.as_mut()
    }

    pub fn iso_volume(&self) -> Option<&VolumeId> {
        self.iso_volume.as_ref()
    }

    pub fn boot_plan(&self) -> &BootPlan {
        &self.boot
    }

    pub(crate) fn set_boot_plan(&mut self, plan: BootPlan) {
        self.boot = plan;
    }

    /// Move to `to` if the lifecycle allows it; terminal states stick.
    pub fn mark(&mut self, to: BuildStatus) -> BuildStatus {
        match validate_transition(self.status, to) {
            Ok(()) => {
                if self.status != to {
                    info!("build {} is {to}", self.ctx.config.image.name);
                }
                self.status = to;
            }
            Err(e) => debug!("ignoring status change: {e}"),
        }
        self.status
    }

    /// Cache `object` for this build's target and return the location of `kind`.
    pub(crate) fn retrieve(
        &self,
        object: &str,
        source: &ObjectSource,
        kind: LocationKind,
    ) -> Result<String, CoreError> {
        let target = self.ctx.config.target();
        let entry = self.ctx.cache.retrieve_and_cache_object(
            object,
            &target,
            source,
            kind.is_remote(),
        )?;
        location_of(&entry, &CacheKey::new(object, &target), kind)
    }

    /// Stage the install ISO as a volume.
    pub(crate) fn stage_iso(&mut self) -> Result<VolumeId, CoreError> {
        let location = install_location(&self.ctx.config)?;
        let source = ObjectSource::Url(location.to_owned());
        let volume = VolumeId::new(self.retrieve(INSTALL_ISO, &source, LocationKind::Volume)?);
        debug!("install ISO available as volume {volume}");
        self.iso_volume = Some(volume.clone());
        Ok(volume)
    }

    /// Launch spec with the fields every family shares filled in.
    pub(crate) fn base_launch_spec(&self) -> LaunchSpec {
        let config = &self.ctx.config;
        LaunchSpec {
            name: format!("{}-install", config.image.name),
            flavor: config.image.flavor.clone(),
            root_disk: stratus_cloud::RootDisk::Blank {
                size_gb: config.image.disk_size_gb,
            },
            install_iso: self.iso_volume.clone(),
            direct_boot: None,
            user_data: Some(self.script.clone()),
            key_name: None,
            network_id: config.cloud.network_id.clone(),
        }
    }

    /// Create the install instance with the access aids the config asks for.
    pub(crate) fn launch(&mut self, mut spec: LaunchSpec) -> Result<(), CoreError> {
        if self.instance.is_some() {
            return Ok(());
        }
        let access = self.ctx.config.access.clone();
        let keypair = if access.keypair {
            let name = self.keypair_name();
            let pair = EphemeralKeyPair::provision(self.ctx.cloud.as_ref(), &name, &self.ctx.keys_dir)?;
            spec.key_name = Some(pair.name().to_owned());
            Some(pair)
        } else {
            None
        };

        let mut instance = Instance::launch(self.ctx.instance_context(), &spec, keypair)?;
        if access.ssh {
            instance.open_ssh();
        }
        if access.floating_ip {
            if let Err(e) = instance.add_floating_ip() {
                warn!("continuing without a floating ip: {e}");
            }
        }
        self.instance = Some(instance);
        Ok(())
    }

    fn keypair_name(&self) -> String {
        let seed = format!(
            "{}:{}",
            self.ctx.config.image.name,
            self.ctx.clock.now().to_rfc3339()
        );
        let digest = blake3::hash(seed.as_bytes()).to_hex();
        format!("stratus-{}-{}", self.ctx.config.image.name, &digest[..8])
    }

    pub fn update_status(&mut self) -> BuildStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        if self.aborted || self.ctx.abort.is_raised() {
            return self.mark(BuildStatus::Failed);
        }
        let errored = self.instance.as_ref().is_some_and(|inst| match inst.status() {
            Ok(record) => record.status == STATUS_ERROR,
            Err(e) => {
                debug!("instance status unavailable: {e}");
                false
            }
        });
        if errored {
            warn!("install instance entered {STATUS_ERROR}");
            return self.mark(BuildStatus::Failed);
        }
        self.mark(BuildStatus::Running)
    }

    pub fn abort(&mut self) {
        if !self.aborted {
            info!("aborting build {}", self.ctx.config.image.name);
        }
        self.aborted = true;
        self.mark(BuildStatus::Failed);
    }

    /// Tear down what an aborted build left behind and release install media.
    ///
    /// Install media stay in place while a failed build's instance is still
    /// running, since it may have them attached.
    pub fn cleanup(&mut self) {
        if self.aborted || self.ctx.abort.is_raised() {
            if let Some(instance) = self.instance.as_mut() {
                if let Err(e) = instance.terminate() {
                    warn!("failed to terminate {}: {e}", instance.id());
                }
            }
        }
        let live = self.instance.as_ref().is_some_and(|i| !i.is_terminated());
        if live {
            debug!("install instance still running, keeping install media");
            return;
        }
        self.release_install_media();
    }

    /// Delete the install ISO volume unless configured to keep it, and forget
    /// its cache location. A failed delete keeps both so a later call retries.
    pub fn release_install_media(&mut self) {
        if self.ctx.config.image.keep_install_media {
            return;
        }
        let Some(volume) = self.iso_volume.take() else {
            return;
        };
        match self.ctx.cloud.volumes_delete(&volume) {
            Ok(()) => info!("deleted install ISO volume {volume}"),
            Err(e) if e.is_not_found() => debug!("install ISO volume {volume} already gone"),
            Err(e) => {
                warn!("failed to delete install ISO volume {volume}: {e}");
                self.iso_volume = Some(volume);
                return;
            }
        }
        let key = CacheKey::new(INSTALL_ISO, &self.ctx.config.target());
        if let Err(e) = self.ctx.cache.forget(&key, LocationKind::Volume) {
            warn!("failed to forget volume location of {key}: {e}");
        }
    }
}

pub(crate) fn install_location(config: &BuildConfig) -> Result<&str, ConfigError> {
    config
        .install
        .location
        .as_deref()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ConfigError::MissingParameter("install.location".to_owned()))
}

fn location_of(entry: &CacheEntry, key: &CacheKey, kind: LocationKind) -> Result<String, CoreError> {
    entry.get(kind).map(str::to_owned).ok_or_else(|| {
        CoreError::Cache(CacheError::InvalidIndexValue {
            bucket: key.bucket(),
            object: key.object.clone(),
            reason: format!("no {kind} location after retrieval"),
        })
    })
}

/// Family-specific half of an install.
pub trait OsDelegate: Send {
    fn family(&self) -> OsFamily;

    fn session(&self) -> &InstallSession;

    fn session_mut(&mut self) -> &mut InstallSession;

    /// Stage install media: downloads, uploads and boot stubs. May take long.
    fn prepare_install_instance(&mut self) -> Result<(), CoreError>;

    /// Launch the install instance from the staged media.
    fn start_install_instance(&mut self) -> Result<(), CoreError>;

    fn update_status(&mut self) -> BuildStatus {
        self.session_mut().update_status()
    }

    fn abort(&mut self) {
        self.session_mut().abort();
    }

    fn cleanup(&mut self) {
        self.session_mut().cleanup();
    }

    fn install_instance(&mut self) -> Option<&mut Instance> {
        self.session_mut().instance_mut()
    }

    fn install_media_volume(&self) -> Option<&VolumeId> {
        self.session().iso_volume()
    }

    fn release_install_media(&mut self) {
        self.session_mut().release_install_media();
    }
}

/// Pick the delegate for `family`. Fails before any resource exists.
pub fn select_delegate(
    family: OsFamily,
    ctx: DelegateContext,
) -> Result<Box<dyn OsDelegate>, CoreError> {
    ctx.require_cdrom_for_iso()?;
    match family {
        OsFamily::RedHat => Ok(Box::new(RedHatDelegate::new(ctx)?)),
        OsFamily::Ubuntu => Ok(Box::new(UbuntuDelegate::new(ctx)?)),
        OsFamily::Windows => Ok(Box::new(WindowsDelegate::new(ctx)?)),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use stratus_cloud::MockCloud;

    #[test]
    fn delegate_matches_family() {
        let f = fixture(&config("ubuntu14", "tree", "http://m/ubuntu/", ""), "d-i");
        let d = select_delegate(OsFamily::Ubuntu, f.ctx).unwrap();
        assert_eq!(d.family(), OsFamily::Ubuntu);
        assert_eq!(d.session().status(), BuildStatus::Running);
    }

    #[test]
    fn iso_without_cdrom_is_rejected_before_any_call() {
        let f = fixture_with(
            &config("fedora20", "iso", "http://m/f20.iso", ""),
            "reboot",
            MockCloud::new().with_cdrom(false),
        );
        let cloud = f.cloud.clone();
        let err = select_delegate(OsFamily::RedHat, f.ctx).err().unwrap();
        assert!(matches!(err, CoreError::Config(ConfigError::InvalidInstall(_))));
        assert!(cloud.calls().is_empty());
    }

    #[test]
    fn start_before_prepare_fails() {
        let f = fixture(&config("fedora20", "tree", "http://m/f20/", ""), "reboot");
        let mut d = select_delegate(OsFamily::RedHat, f.ctx).unwrap();
        assert!(matches!(
            d.start_install_instance(),
            Err(CoreError::NotPrepared)
        ));
    }

    #[test]
    fn terminal_status_sticks() {
        let f = fixture(&config("fedora20", "tree", "http://m/f20/", ""), "reboot");
        let mut d = select_delegate(OsFamily::RedHat, f.ctx).unwrap();
        d.session_mut().mark(BuildStatus::Complete);
        d.abort();
        assert_eq!(d.update_status(), BuildStatus::Complete);
    }

    #[test]
    fn abort_signal_fails_the_build() {
        let f = fixture(&config("fedora20", "tree", "http://m/f20/", ""), "reboot");
        let signal = f.ctx.abort.clone();
        let mut d = select_delegate(OsFamily::RedHat, f.ctx).unwrap();
        assert_eq!(d.update_status(), BuildStatus::Running);
        signal.raise();
        assert_eq!(d.update_status(), BuildStatus::Failed);
    }

    #[test]
    fn backend_error_status_fails_the_build() {
        let f = fixture(&config("fedora20", "tree", "http://m/f20/", ""), "reboot");
        let cloud = f.cloud.clone();
        let mut d = select_delegate(OsFamily::RedHat, f.ctx).unwrap();
        d.prepare_install_instance().unwrap();
        d.start_install_instance().unwrap();
        cloud.script_server_statuses(["BUILD", "ERROR"]);
        assert_eq!(d.update_status(), BuildStatus::Running);
        assert_eq!(d.update_status(), BuildStatus::Failed);
    }

    #[test]
    fn access_aids_are_provisioned() {
        let extra = "[access]\nkeypair = true\nssh = true\nfloating_ip = true";
        let toml = config("fedora20", "tree", "http://m/f20/", "").replace("[image]", &format!("{extra}\n[image]"));
        let f = fixture(&toml, "reboot");
        let cloud = f.cloud.clone();
        let keys_dir = f.ctx.keys_dir.clone();
        let mut d = select_delegate(OsFamily::RedHat, f.ctx).unwrap();
        d.prepare_install_instance().unwrap();
        d.start_install_instance().unwrap();

        let id = d.install_instance().unwrap().id().clone();
        let spec = cloud.launch_spec(&id).unwrap();
        let key_name = spec.key_name.unwrap();
        assert!(key_name.starts_with("stratus-fedora20-x86_64-"));
        assert!(keys_dir.join(&key_name).is_file());
        assert_eq!(cloud.server_security_groups(&id).len(), 1);
        assert_eq!(cloud.server_floating_ips(&id).len(), 1);

        d.abort();
        d.cleanup();
        assert!(cloud.keypair_names().is_empty());
        assert_eq!(cloud.security_group_count(), 0);
        assert_eq!(cloud.floating_ip_count(), 0);
        assert!(!keys_dir.join(&key_name).exists());
    }

    #[test]
    fn aborted_iso_build_releases_volume_and_forgets_it() {
        let toml = config("fedora20", "iso", "http://m/f20.iso", "").replace(
            "[image]\nname = \"fedora20-x86_64\"",
            "[image]\nname = \"fedora20-x86_64\"\nkeep_install_media = false",
        );
        let f = fixture(&toml, "reboot");
        let cloud = f.cloud.clone();
        let cache = f.ctx.cache.clone();
        let mut d = select_delegate(OsFamily::RedHat, f.ctx).unwrap();
        d.prepare_install_instance().unwrap();
        d.start_install_instance().unwrap();
        assert_eq!(cloud.volume_ids().len(), 1);

        d.abort();
        d.cleanup();
        d.cleanup();
        assert!(cloud.volume_ids().is_empty());
        assert_eq!(cloud.call_count("volumes_delete"), 1);
        let entries = cache.list_entries().unwrap();
        let iso = entries.iter().find(|e| e.object == INSTALL_ISO).unwrap();
        assert!(!iso.entry.contains(LocationKind::Volume));
        assert!(iso.entry.contains(LocationKind::Local));
    }

    #[test]
    fn failed_volume_delete_keeps_cache_location_for_retry() {
        let toml = config("fedora20", "iso", "http://m/f20.iso", "").replace(
            "[image]\nname = \"fedora20-x86_64\"",
            "[image]\nname = \"fedora20-x86_64\"\nkeep_install_media = false",
        );
        let f = fixture(&toml, "reboot");
        let cloud = f.cloud.clone();
        let cache = f.ctx.cache.clone();
        let mut d = select_delegate(OsFamily::RedHat, f.ctx).unwrap();
        d.prepare_install_instance().unwrap();
        d.start_install_instance().unwrap();
        let volume = d.install_media_volume().unwrap().clone();

        d.abort();
        cloud.fail("volumes_delete", 1);
        d.cleanup();
        assert_eq!(cloud.volume_ids(), vec![volume.clone()]);
        assert_eq!(d.install_media_volume(), Some(&volume));
        let key = CacheKey::new(INSTALL_ISO, &d.session().config().target());
        let entry = cache.lock_and_get_index().unwrap().entry(&key);
        assert_eq!(entry.get(LocationKind::Volume), Some(volume.as_str()));

        d.release_install_media();
        assert!(cloud.volume_ids().is_empty());
        assert_eq!(d.install_media_volume(), None);
        let entry = cache.lock_and_get_index().unwrap().entry(&key);
        assert!(!entry.contains(LocationKind::Volume));
    }

    #[test]
    fn failed_build_with_live_instance_keeps_media() {
        let toml = config("fedora20", "iso", "http://m/f20.iso", "").replace(
            "[image]\nname = \"fedora20-x86_64\"",
            "[image]\nname = \"fedora20-x86_64\"\nkeep_install_media = false",
        );
        let f = fixture(&toml, "reboot");
        let cloud = f.cloud.clone();
        let mut d = select_delegate(OsFamily::RedHat, f.ctx).unwrap();
        d.prepare_install_instance().unwrap();
        d.start_install_instance().unwrap();
        d.session_mut().mark(BuildStatus::Failed);
        d.cleanup();
        assert_eq!(cloud.volume_ids().len(), 1);
        assert_eq!(cloud.call_count("servers_delete"), 0);
    }
}
