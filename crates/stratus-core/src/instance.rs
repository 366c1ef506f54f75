//! Controller for one compute instance: launch, inactivity detection,
//! snapshot, and teardown of everything attached to it.

use crate::activity::{sum_counters, ActivitySample, ActivityWindow};
use crate::clock::Clock;
use crate::concurrency::AbortSignal;
use crate::resources::EphemeralKeyPair;
use crate::CoreError;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use stratus_cloud::{
    CloudError, CloudFacade, FloatingIp, ImageUpdate, LaunchSpec, SecurityGroupRule,
    ServerRecord, IMAGE_ACTIVE, IMAGE_ERROR, STATUS_SHUTOFF,
};
use stratus_schema::{BuildConfig, ImageId, SecurityGroupId, ServerId};
use tracing::{debug, info, warn};

/// Countdown used when diagnostics are unreadable at the start of
/// [`Instance::shutoff`]; only a reported `SHUTOFF` ends the wait in practice.
pub const INACTIVITY_FALLBACK_TICKS: u64 = 1_000_000;

/// Image properties that make the hypervisor boot a kernel directly.
const DIRECT_BOOT_PROPERTIES: [&str; 3] = ["kernel_id", "ramdisk_id", "os_command_line"];

const SSH_PORT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSettings {
    pub tick: Duration,
    pub snapshot_settle: Duration,
    pub delete_timeout_ticks: u64,
    pub snapshot_timeout_ticks: u64,
    pub floating_ip_pool: Option<String>,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            snapshot_settle: Duration::from_secs(10),
            delete_timeout_ticks: 300,
            snapshot_timeout_ticks: 3600,
            floating_ip_pool: None,
        }
    }
}

impl InstanceSettings {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            tick: Duration::from_secs(config.timing.tick_interval_secs),
            snapshot_settle: Duration::from_secs(config.timing.snapshot_settle_secs),
            delete_timeout_ticks: config.timing.delete_timeout_ticks,
            snapshot_timeout_ticks: config.timing.snapshot_timeout_ticks,
            floating_ip_pool: config.cloud.floating_ip_pool.clone(),
        }
    }
}

/// Collaborators every instance needs.
#[derive(Clone)]
pub struct InstanceContext {
    pub cloud: Arc<dyn CloudFacade>,
    pub clock: Arc<dyn Clock>,
    pub settings: InstanceSettings,
    pub abort: AbortSignal,
}

pub struct Instance {
    id: ServerId,
    ctx: InstanceContext,
    direct_boot: bool,
    window: ActivityWindow,
    floating_ips: Vec<FloatingIp>,
    keypair: Option<EphemeralKeyPair>,
    ssh_group: Option<SecurityGroupId>,
    terminated: bool,
}

impl Instance {
    /// Create a server from `spec`. The instance takes ownership of `keypair`
    /// and releases it on terminate, or right away if the launch fails.
    pub fn launch(
        ctx: InstanceContext,
        spec: &LaunchSpec,
        keypair: Option<EphemeralKeyPair>,
    ) -> Result<Self, CoreError> {
        let record = match ctx.cloud.servers_create(spec) {
            Ok(r) => r,
            Err(e) => {
                if let Some(pair) = keypair {
                    pair.release(ctx.cloud.as_ref());
                }
                return Err(e.into());
            }
        };
        info!("launched install instance {} ({})", record.id, spec.name);
        let mut instance = Self::attach(ctx, record.id, spec.direct_boot.is_some());
        instance.keypair = keypair;
        Ok(instance)
    }

    /// Take control of an existing server.
    pub fn attach(ctx: InstanceContext, id: ServerId, direct_boot: bool) -> Self {
        Self {
            id,
            ctx,
            direct_boot,
            window: ActivityWindow::new(),
            floating_ips: Vec::new(),
            keypair: None,
            ssh_group: None,
            terminated: false,
        }
    }

    pub fn id(&self) -> &ServerId {
        &self.id
    }

    /// Whether the server is confirmed gone.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn is_direct_boot(&self) -> bool {
        self.direct_boot
    }

    pub fn floating_ips(&self) -> &[FloatingIp] {
        &self.floating_ips
    }

    pub fn keypair(&self) -> Option<&EphemeralKeyPair> {
        self.keypair.as_ref()
    }

    pub fn ssh_group(&self) -> Option<&SecurityGroupId> {
        self.ssh_group.as_ref()
    }

    /// Fresh server record from the backend.
    pub fn status(&self) -> Result<ServerRecord, CoreError> {
        Ok(self.ctx.cloud.servers_get(&self.id)?)
    }

    pub fn get_disk_and_net_activity(&self) -> Result<ActivitySample, CoreError> {
        let diagnostics = self.ctx.cloud.servers_diagnostics(&self.id)?;
        sum_counters(&diagnostics)
    }

    /// Compare the current counters with the previous poll.
    ///
    /// Unreadable diagnostics count as idle and leave the window as it was.
    pub fn is_active(&mut self) -> bool {
        match self.get_disk_and_net_activity() {
            Ok(sample) => {
                let active = self.window.observe(sample);
                debug!(
                    "instance {} disk={} net={} active={active}",
                    self.id, sample.disk, sample.net
                );
                active
            }
            Err(e) => {
                debug!("diagnostics for {} unavailable: {e}", self.id);
                false
            }
        }
    }

    /// Wait until the server reports `SHUTOFF`.
    ///
    /// Returns `Ok(false)` once `timeout` consecutive idle ticks pass (any
    /// active tick restarts the count) or the abort signal is raised. The
    /// server is left running in both cases.
    pub fn shutoff(&mut self, timeout: u64, in_progress: bool) -> Result<bool, CoreError> {
        if !in_progress {
            info!("requesting stop of {}", self.id);
            if let Err(e) = self.ctx.cloud.servers_stop(&self.id) {
                warn!("stop request for {} failed: {e}", self.id);
            }
        }

        let mut countdown = match self.get_disk_and_net_activity() {
            Ok(sample) => {
                self.window.observe(sample);
                timeout
            }
            Err(e) => {
                warn!("diagnostics for {} unreadable ({e}), waiting for SHUTOFF only", self.id);
                INACTIVITY_FALLBACK_TICKS
            }
        };

        loop {
            if self.ctx.abort.is_raised() {
                warn!("abort requested while waiting for {}", self.id);
                return Ok(false);
            }
            match self.status() {
                Ok(record) if record.status == STATUS_SHUTOFF => {
                    info!("instance {} is SHUTOFF", self.id);
                    return Ok(true);
                }
                Ok(record) => debug!("instance {} is {}", self.id, record.status),
                Err(e) => debug!("status of {} unavailable: {e}", self.id),
            }

            if self.is_active() {
                countdown = timeout;
            } else {
                countdown = countdown.saturating_sub(1);
            }
            if countdown == 0 {
                warn!(
                    "instance {} idle for {timeout} ticks, leaving it running",
                    self.id
                );
                return Ok(false);
            }
            self.ctx.clock.sleep(self.ctx.settings.tick);
        }
    }

    /// Release floating IPs, delete the server and wait for it to disappear.
    ///
    /// The SSH security group and keypair are released on every path out of
    /// here, successful or not.
    pub fn terminate(&mut self) -> Result<(), CoreError> {
        let result = self.terminate_server();
        self.release_ephemeral();
        result
    }

    fn terminate_server(&mut self) -> Result<(), CoreError> {
        if self.terminated {
            return Ok(());
        }
        let ips = std::mem::take(&mut self.floating_ips);
        for ip in ips {
            if let Err(e) = self.release_floating_ip(&ip) {
                warn!("failed to release floating ip {}: {e}", ip.address);
                self.floating_ips.push(ip);
            }
        }

        match self.ctx.cloud.servers_delete(&self.id) {
            Ok(()) => info!("deleting instance {}", self.id),
            Err(e) if e.is_not_found() => {
                self.terminated = true;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        for _ in 0..self.ctx.settings.delete_timeout_ticks {
            match self.ctx.cloud.servers_get(&self.id) {
                Err(e) => {
                    debug!("instance {} gone: {e}", self.id);
                    self.terminated = true;
                    return Ok(());
                }
                Ok(record) => debug!("instance {} still {}", self.id, record.status),
            }
            self.ctx.clock.sleep(self.ctx.settings.tick);
        }
        Err(CoreError::Timeout(format!(
            "instance {} still present after {} ticks",
            self.id, self.ctx.settings.delete_timeout_ticks
        )))
    }

    fn release_ephemeral(&mut self) {
        let cloud = self.ctx.cloud.as_ref();
        if let Some(group) = self.ssh_group.take() {
            if !self.terminated {
                if let Err(e) = cloud.servers_remove_security_group(&self.id, &group) {
                    warn!("failed to detach security group {group}: {e}");
                }
            }
            match cloud.security_groups_delete(&group) {
                Ok(()) => debug!("deleted security group {group}"),
                Err(e) => warn!("failed to delete security group {group}: {e}"),
            }
        }
        if let Some(pair) = self.keypair.take() {
            pair.release(cloud);
        }
    }

    /// Export the root disk as image `name` and wait for it to become usable.
    ///
    /// Visibility and properties are overwritten, not merged: the image ends
    /// up with exactly `properties` (none when `None`).
    pub fn create_snapshot(
        &self,
        name: &str,
        properties: Option<&BTreeMap<String, String>>,
        public: bool,
    ) -> Result<ImageId, CoreError> {
        let image = self.ctx.cloud.servers_create_image(&self.id, name)?;
        info!("snapshotting {} as {name} ({image})", self.id);

        for _ in 0..self.ctx.settings.snapshot_timeout_ticks {
            match self.ctx.cloud.images_get(&image) {
                Ok(record) if record.status == IMAGE_ACTIVE => {
                    let update = self.snapshot_update(&record.properties, properties, public);
                    self.ctx.cloud.images_update(&image, &update)?;
                    self.ctx.clock.sleep(self.ctx.settings.snapshot_settle);
                    info!("snapshot {image} is active");
                    return Ok(image);
                }
                Ok(record) if record.status == IMAGE_ERROR => {
                    return Err(CoreError::SnapshotFailed {
                        image: image.into_inner(),
                        reason: "image entered error state".to_owned(),
                    });
                }
                Ok(record) => debug!("snapshot {image} is {}", record.status),
                Err(e) => debug!("snapshot {image} not readable yet: {e}"),
            }
            self.ctx.clock.sleep(self.ctx.settings.tick);
        }
        Err(CoreError::Timeout(format!(
            "snapshot {image} not active after {} ticks",
            self.ctx.settings.snapshot_timeout_ticks
        )))
    }

    fn snapshot_update(
        &self,
        current: &BTreeMap<String, String>,
        wanted: Option<&BTreeMap<String, String>>,
        public: bool,
    ) -> ImageUpdate {
        let strip = |key: &str| self.direct_boot && DIRECT_BOOT_PROPERTIES.contains(&key);
        let set_properties: BTreeMap<String, String> = wanted
            .into_iter()
            .flatten()
            .filter(|(k, _)| !strip(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let remove_properties = current
            .keys()
            .filter(|k| !set_properties.contains_key(*k) || strip(k))
            .cloned()
            .collect();
        ImageUpdate {
            public: Some(public),
            set_properties,
            remove_properties,
        }
    }

    /// Allocate a floating IP and attach it to this instance.
    pub fn add_floating_ip(&mut self) -> Result<FloatingIp, CoreError> {
        let cloud = self.ctx.cloud.as_ref();
        let ip = cloud.floating_ips_create(self.ctx.settings.floating_ip_pool.as_deref())?;
        if let Err(e) = cloud.servers_add_floating_ip(&self.id, &ip.address) {
            if let Err(e) = cloud.floating_ips_delete(&ip) {
                warn!("failed to release floating ip {}: {e}", ip.address);
            }
            return Err(e.into());
        }
        info!("attached floating ip {} to {}", ip.address, self.id);
        self.floating_ips.push(ip.clone());
        Ok(ip)
    }

    /// Detach and release one of this instance's floating IPs.
    pub fn remove_floating_ip(&mut self, address: &str) -> Result<(), CoreError> {
        let idx = self
            .floating_ips
            .iter()
            .position(|ip| ip.address == address)
            .ok_or_else(|| {
                CloudError::NotFound(format!("floating ip {address} on {}", self.id))
            })?;
        let ip = self.floating_ips[idx].clone();
        self.release_floating_ip(&ip)?;
        self.floating_ips.remove(idx);
        Ok(())
    }

    fn release_floating_ip(&self, ip: &FloatingIp) -> Result<(), CoreError> {
        let cloud = self.ctx.cloud.as_ref();
        if let Err(e) = cloud.servers_remove_floating_ip(&self.id, &ip.address) {
            debug!("detach of {} failed ({e}), releasing anyway", ip.address);
        }
        cloud.floating_ips_delete(ip)?;
        debug!("released floating ip {}", ip.address);
        Ok(())
    }

    /// Attach a temporary security group that admits SSH. Best-effort.
    pub fn open_ssh(&mut self) -> bool {
        if self.ssh_group.is_some() {
            return true;
        }
        let cloud = self.ctx.cloud.as_ref();
        let name = format!("stratus-ssh-{}", self.id);
        let group = match cloud.security_groups_create(&name, "Temporary SSH access for an image build") {
            Ok(g) => g,
            Err(e) => {
                warn!("could not create security group {name}: {e}");
                return false;
            }
        };
        let attached = cloud
            .security_group_rules_create(&group, &SecurityGroupRule::tcp_ingress(SSH_PORT))
            .and_then(|()| cloud.servers_add_security_group(&self.id, &group));
        if let Err(e) = attached {
            warn!("could not open ssh on {}: {e}", self.id);
            if let Err(e) = cloud.security_groups_delete(&group) {
                warn!("failed to delete security group {group}: {e}");
            }
            return false;
        }
        info!("opened ssh on {} via {group}", self.id);
        self.ssh_group = Some(group);
        true
    }

    /// Detach and delete the SSH security group, if one is attached.
    pub fn close_ssh(&mut self) -> Result<(), CoreError> {
        let Some(group) = self.ssh_group.take() else {
            return Ok(());
        };
        let cloud = self.ctx.cloud.as_ref();
        let closed = cloud
            .servers_remove_security_group(&self.id, &group)
            .and_then(|()| cloud.security_groups_delete(&group));
        if let Err(e) = closed {
            self.ssh_group = Some(group);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use stratus_cloud::{DirectBoot, MockCloud, RootDisk};

    fn spec(direct_boot: bool) -> LaunchSpec {
        LaunchSpec {
            name: "mock-install".to_owned(),
            flavor: "m1.small".to_owned(),
            root_disk: RootDisk::Blank { size_gb: 10 },
            install_iso: None,
            direct_boot: direct_boot.then(|| DirectBoot {
                kernel: ImageId::new("aki-1"),
                ramdisk: ImageId::new("ari-1"),
                command_line: "ks=http://169.254.169.254/latest/user-data".to_owned(),
            }),
            user_data: Some("poweroff".to_owned()),
            key_name: None,
            network_id: None,
        }
    }

    fn setup(direct_boot: bool) -> (Arc<MockCloud>, FakeClock, AbortSignal, Instance) {
        let cloud = Arc::new(MockCloud::new());
        let clock = FakeClock::new();
        let abort = AbortSignal::new();
        let ctx = InstanceContext {
            cloud: cloud.clone(),
            clock: Arc::new(clock.clone()),
            settings: InstanceSettings {
                delete_timeout_ticks: 5,
                snapshot_timeout_ticks: 10,
                ..InstanceSettings::default()
            },
            abort: abort.clone(),
        };
        let instance = Instance::launch(ctx, &spec(direct_boot), None).unwrap();
        (cloud, clock, abort, instance)
    }

    #[test]
    fn flat_counters_are_inactive() {
        let (cloud, _, _, mut inst) = setup(false);
        cloud.script_counters(&[(100, 1000), (100, 1000)]);
        inst.is_active();
        assert!(!inst.is_active());
    }

    #[test]
    fn disk_delta_is_active_regardless_of_network() {
        let (cloud, _, _, mut inst) = setup(false);
        cloud.script_counters(&[(100, 1000), (150, 1000)]);
        inst.is_active();
        assert!(inst.is_active());
    }

    #[test]
    fn unreadable_diagnostics_are_idle_and_keep_window() {
        let (cloud, _, _, mut inst) = setup(false);
        cloud.script_counters(&[(100, 1000), (100, 1000)]);
        inst.is_active();
        cloud.fail("servers_diagnostics", 1);
        assert!(!inst.is_active());
        assert_eq!(inst.window.previous(), ActivitySample::new(100, 1000));
        assert!(!inst.is_active());
    }

    #[test]
    fn shutoff_succeeds_on_reported_shutoff() {
        let (cloud, clock, _, mut inst) = setup(false);
        cloud.script_counters(&[(0, 0), (10, 0), (20, 0)]);
        cloud.script_server_statuses(["ACTIVE", "ACTIVE", "SHUTOFF"]);
        assert!(inst.shutoff(3, true).unwrap());
        assert_eq!(clock.sleeps(), 2);
        assert_eq!(cloud.call_count("servers_stop"), 0);
    }

    #[test]
    fn shutoff_requests_stop_when_not_in_progress() {
        let (cloud, _, _, mut inst) = setup(false);
        assert!(inst.shutoff(3, false).unwrap());
        assert_eq!(cloud.call_count("servers_stop"), 1);
    }

    #[test]
    fn active_tick_resets_the_countdown() {
        let (cloud, clock, _, mut inst) = setup(false);
        // Seed, idle, idle, active, idle, idle, idle.
        cloud.script_counters(&[
            (100, 1000),
            (100, 1000),
            (100, 1000),
            (150, 1000),
            (150, 1000),
            (150, 1000),
            (150, 1000),
        ]);
        assert!(!inst.shutoff(3, true).unwrap());
        assert_eq!(cloud.call_count("servers_diagnostics"), 7);
        assert_eq!(clock.sleeps(), 5);
        assert!(cloud.server_exists(inst.id()));
    }

    #[test]
    fn unreadable_diagnostics_at_start_disable_the_countdown() {
        let (cloud, _, _, mut inst) = setup(false);
        cloud.fail("servers_diagnostics", 1);
        cloud.script_server_statuses(["ACTIVE", "ACTIVE", "ACTIVE", "ACTIVE", "SHUTOFF"]);
        assert!(inst.shutoff(1, true).unwrap());
    }

    #[test]
    fn abort_stops_the_wait() {
        let cloud = Arc::new(MockCloud::new());
        let abort = AbortSignal::new();
        let raiser = abort.clone();
        let clock = FakeClock::new().on_sleep(move |n| {
            if n == 2 {
                raiser.raise();
            }
        });
        let ctx = InstanceContext {
            cloud: cloud.clone(),
            clock: Arc::new(clock.clone()),
            settings: InstanceSettings::default(),
            abort,
        };
        let mut inst = Instance::launch(ctx, &spec(false), None).unwrap();
        cloud.script_counters(&[(0, 0), (1, 0), (2, 0), (3, 0), (4, 0)]);
        assert!(!inst.shutoff(10, true).unwrap());
        assert_eq!(clock.sleeps(), 2);
    }

    #[test]
    fn snapshot_error_state_fails() {
        let (cloud, _, _, inst) = setup(false);
        cloud.script_image_statuses(["saving", "error"]);
        let err = inst.create_snapshot("snap", None, false).unwrap_err();
        assert!(matches!(err, CoreError::SnapshotFailed { .. }));
        assert_eq!(cloud.call_count("images_update"), 0);
    }

    #[test]
    fn snapshot_active_applies_exact_metadata() {
        let (cloud, clock, _, inst) = setup(false);
        cloud.script_image_statuses(["queued", "saving", "active"]);
        let mut props = BTreeMap::new();
        props.insert("os_distro".to_owned(), "fedora".to_owned());
        let id = inst.create_snapshot("snap", Some(&props), true).unwrap();

        let image = cloud.image(&id).unwrap();
        assert!(image.public);
        assert_eq!(image.properties, props);
        // Two polling ticks plus the settle delay.
        assert_eq!(clock.sleeps(), 3);
        assert!(clock.elapsed() >= Duration::from_secs(10));
    }

    #[test]
    fn snapshot_without_properties_clears_them() {
        let (cloud, _, _, inst) = setup(false);
        let id = inst.create_snapshot("snap", None, false).unwrap();
        let image = cloud.image(&id).unwrap();
        assert!(!image.public);
        assert!(image.properties.is_empty());
    }

    #[test]
    fn direct_boot_metadata_is_stripped() {
        let (cloud, _, _, inst) = setup(true);
        let mut props = BTreeMap::new();
        props.insert("kernel_id".to_owned(), "aki-9".to_owned());
        props.insert("os_version".to_owned(), "20".to_owned());
        let id = inst.create_snapshot("snap", Some(&props), false).unwrap();
        let image = cloud.image(&id).unwrap();
        assert_eq!(image.properties.len(), 1);
        assert_eq!(image.properties["os_version"], "20");
    }

    #[test]
    fn transient_image_read_errors_are_retried() {
        let (cloud, _, _, inst) = setup(false);
        cloud.fail("images_get", 2);
        assert!(inst.create_snapshot("snap", None, false).is_ok());
    }

    #[test]
    fn terminate_releases_everything() {
        let (cloud, _, _, mut inst) = setup(false);
        cloud.set_delete_lag(2);
        inst.add_floating_ip().unwrap();
        inst.add_floating_ip().unwrap();
        assert!(inst.open_ssh());
        assert_eq!(cloud.floating_ip_count(), 2);

        inst.terminate().unwrap();
        assert_eq!(cloud.floating_ip_count(), 0);
        assert_eq!(cloud.security_group_count(), 0);
        assert!(!cloud.server_exists(inst.id()));
        assert!(inst.floating_ips().is_empty());
        assert!(inst.ssh_group().is_none());
    }

    #[test]
    fn terminate_timeout_still_releases_ephemeral_resources() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = Arc::new(MockCloud::new());
        let ctx = InstanceContext {
            cloud: cloud.clone(),
            clock: Arc::new(FakeClock::new()),
            settings: InstanceSettings {
                delete_timeout_ticks: 2,
                ..InstanceSettings::default()
            },
            abort: AbortSignal::new(),
        };
        let pair = EphemeralKeyPair::provision(cloud.as_ref(), "stratus-k", dir.path()).unwrap();
        let private = pair.private_key_path().to_path_buf();
        let mut inst = Instance::launch(ctx, &spec(false), Some(pair)).unwrap();
        cloud.set_delete_lag(10);

        assert!(matches!(inst.terminate(), Err(CoreError::Timeout(_))));
        assert!(cloud.keypair_names().is_empty());
        assert!(!private.exists());
    }

    #[test]
    fn terminate_is_idempotent() {
        let (cloud, _, _, mut inst) = setup(false);
        inst.terminate().unwrap();
        inst.terminate().unwrap();
        assert_eq!(cloud.call_count("servers_delete"), 1);
    }

    #[test]
    fn failed_launch_releases_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = Arc::new(MockCloud::new());
        cloud.fail("servers_create", 1);
        let ctx = InstanceContext {
            cloud: cloud.clone(),
            clock: Arc::new(FakeClock::new()),
            settings: InstanceSettings::default(),
            abort: AbortSignal::new(),
        };
        let pair = EphemeralKeyPair::provision(cloud.as_ref(), "stratus-k", dir.path()).unwrap();
        assert!(Instance::launch(ctx, &spec(false), Some(pair)).is_err());
        assert!(cloud.keypair_names().is_empty());
    }

    #[test]
    fn floating_ip_add_and_remove() {
        let (cloud, _, _, mut inst) = setup(false);
        let ip = inst.add_floating_ip().unwrap();
        assert_eq!(cloud.server_floating_ips(inst.id()), vec![ip.address.clone()]);
        inst.remove_floating_ip(&ip.address).unwrap();
        assert!(inst.floating_ips().is_empty());
        assert_eq!(cloud.floating_ip_count(), 0);
        assert!(inst.remove_floating_ip("10.9.9.9").is_err());
    }

    #[test]
    fn failed_attach_releases_allocated_ip() {
        let (cloud, _, _, mut inst) = setup(false);
        cloud.fail("servers_add_floating_ip", 1);
        assert!(inst.add_floating_ip().is_err());
        assert_eq!(cloud.floating_ip_count(), 0);
    }

    #[test]
    fn open_ssh_is_best_effort() {
        let (cloud, _, _, mut inst) = setup(false);
        cloud.fail("servers_add_security_group", 1);
        assert!(!inst.open_ssh());
        assert_eq!(cloud.security_group_count(), 0);

        assert!(inst.open_ssh());
        let group = inst.ssh_group().unwrap().clone();
        let rules = cloud.security_group_rules(&group).unwrap();
        assert_eq!(rules, vec![SecurityGroupRule::tcp_ingress(22)]);
        inst.close_ssh().unwrap();
        assert_eq!(cloud.security_group_count(), 0);
    }
}
