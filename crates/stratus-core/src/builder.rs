use crate::boot::{BootStubBuilder, SyslinuxStubBuilder};
use crate::clock::{Clock, SystemClock};
use crate::concurrency::AbortSignal;
use crate::delegate::{select_delegate, DelegateContext, OsDelegate};
use crate::instance::InstanceSettings;
use crate::lifecycle::BuildStatus;
use crate::resources::default_keys_dir;
use crate::uploader::CloudRemoteStore;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stratus_cache::ArtifactCache;
use stratus_cloud::CloudFacade;
use stratus_schema::{BuildConfig, ImageId, OsFamily, ServerId};
use tracing::{info, warn};

/// Host-side knobs that are not part of the build file.
#[derive(Clone)]
pub struct BuildSettings {
    /// Directory relative install-script paths are resolved against.
    pub script_dir: PathBuf,
    pub keys_dir: PathBuf,
    pub clock: Arc<dyn Clock>,
    pub boot_stub: Arc<dyn BootStubBuilder>,
}

impl BuildSettings {
    pub fn new(script_dir: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
            keys_dir: default_keys_dir(),
            clock: Arc::new(SystemClock),
            boot_stub: Arc::new(SyslinuxStubBuilder),
        }
    }

    #[must_use]
    pub fn with_keys_dir(mut self, keys_dir: impl Into<PathBuf>) -> Self {
        self.keys_dir = keys_dir.into();
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_boot_stub(mut self, boot_stub: Arc<dyn BootStubBuilder>) -> Self {
        self.boot_stub = boot_stub;
        self
    }
}

/// Summary of a build, suitable for `--json` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub image_name: String,
    pub target: String,
    pub family: OsFamily,
    pub status: BuildStatus,
    pub instance_id: Option<ServerId>,
    pub image_id: Option<ImageId>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// Handle for one image build.
///
/// Drives the delegate through prepare and start, waits for the guest to power
/// off, then snapshots it. `status()` runs the delegate's cleanup exactly once,
/// the first time a terminal status is observed.
pub struct Builder {
    delegate: Box<dyn OsDelegate>,
    abort: AbortSignal,
    clock: Arc<dyn Clock>,
    image_name: String,
    target: String,
    properties: BTreeMap<String, String>,
    public: bool,
    image_id: Option<ImageId>,
    started_at: String,
    finished_at: Option<String>,
    cleaned_up: bool,
}

impl Builder {
    /// Validate `config` and select its delegate. Nothing is created in the
    /// cloud until [`Builder::run`].
    pub fn new(
        config: BuildConfig,
        cloud: Arc<dyn CloudFacade>,
        cache: ArtifactCache,
        settings: BuildSettings,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let family = config.family()?;
        let install_script = config.read_install_script(&settings.script_dir)?;
        let cache = cache.with_remote(CloudRemoteStore::new(Arc::clone(&cloud)));
        let abort = AbortSignal::new();

        let ctx = DelegateContext {
            settings: InstanceSettings::from_config(&config),
            config: config.clone(),
            install_script,
            cloud,
            cache: Arc::new(cache),
            clock: Arc::clone(&settings.clock),
            boot_stub: settings.boot_stub,
            abort: abort.clone(),
            keys_dir: settings.keys_dir,
        };
        let delegate = select_delegate(family, ctx)?;
        let target = config.target().to_string();
        info!(
            "building {} for {target} with the {family} delegate",
            config.image.name
        );

        Ok(Self {
            delegate,
            abort,
            started_at: settings.clock.now().to_rfc3339(),
            clock: settings.clock,
            image_name: config.image.name,
            target,
            properties: config.image.properties,
            public: config.image.public,
            image_id: None,
            finished_at: None,
            cleaned_up: false,
        })
    }

    /// Convenience for callers holding a config file path.
    pub fn script_dir_for(config_path: &Path) -> PathBuf {
        config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Stage install media and launch the install instance.
    pub fn run(&mut self) -> Result<(), CoreError> {
        self.delegate.prepare_install_instance()?;
        self.delegate.start_install_instance()?;
        if let Some(instance) = self.delegate.install_instance() {
            info!("install running on {}", instance.id());
        }
        Ok(())
    }

    /// Block until the install finishes, then snapshot and tear down.
    ///
    /// Returns `None` when the instance went idle for `inactivity_timeout`
    /// ticks or the build was aborted; the instance is left running for
    /// inspection in that case.
    pub fn wait_for_completion(
        &mut self,
        inactivity_timeout: u64,
    ) -> Result<Option<ImageId>, CoreError> {
        let Some(instance) = self.delegate.install_instance() else {
            return Err(CoreError::NoInstance);
        };
        if !instance.shutoff(inactivity_timeout, true)? {
            warn!(
                "install on {} did not finish, leaving it running",
                instance.id()
            );
            self.fail();
            return Ok(None);
        }

        let name = format!("{}-jeos", self.image_name);
        let properties = (!self.properties.is_empty()).then_some(&self.properties);
        let image = match instance.create_snapshot(&name, properties, self.public) {
            Ok(image) => image,
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };
        if let Err(e) = instance.terminate() {
            warn!("failed to terminate install instance: {e}");
        }
        self.delegate.release_install_media();
        self.delegate.session_mut().mark(BuildStatus::Complete);
        self.finish();
        info!("build {} produced image {image}", self.image_name);
        self.image_id = Some(image.clone());
        Ok(Some(image))
    }

    fn fail(&mut self) {
        self.delegate.session_mut().mark(BuildStatus::Failed);
        self.finish();
    }

    fn finish(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(self.clock.now().to_rfc3339());
        }
    }

    /// Abort the build and report the resulting status.
    pub fn abort(&mut self) -> BuildStatus {
        self.delegate.abort();
        self.status()
    }

    pub fn status(&mut self) -> BuildStatus {
        let status = self.delegate.update_status();
        if status.is_terminal() && !self.cleaned_up {
            self.cleaned_up = true;
            self.finish();
            self.delegate.cleanup();
        }
        status
    }

    /// Signal a Ctrl-C handler can raise while `wait_for_completion` blocks.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn family(&self) -> OsFamily {
        self.delegate.family()
    }

    pub fn image_id(&self) -> Option<&ImageId> {
        self.image_id.as_ref()
    }

    pub fn instance_id(&self) -> Option<&ServerId> {
        self.delegate.session().instance().map(|i| i.id())
    }

    pub fn report(&self) -> BuildReport {
        BuildReport {
            image_name: self.image_name.clone(),
            target: self.target.clone(),
            family: self.delegate.family(),
            status: self.delegate.session().status(),
            instance_id: self.instance_id().cloned(),
            image_id: self.image_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: self.finished_at.clone(),
        }
    }
}
