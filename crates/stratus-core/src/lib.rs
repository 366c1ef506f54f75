//! Build orchestration for Stratus.
//!
//! This crate drives one image build end to end: the `Builder` handle selects
//! an OS delegate, the delegate materializes boot media through the artifact
//! cache and launches the install instance, and the `Instance` controller
//! watches I/O counters and hypervisor status until the guest powers off, then
//! snapshots and tears it down. Waiting is done by blocking poll loops over an
//! injectable `Clock`.

pub mod activity;
pub mod boot;
pub mod builder;
pub mod clock;
pub mod concurrency;
pub mod delegate;
pub mod instance;
pub mod lifecycle;
pub mod resources;
pub mod uploader;

pub use activity::{sum_counters, ActivitySample, ActivityWindow, NET_ACTIVITY_TOLERANCE};
pub use boot::{BootStubBuilder, SyslinuxStubBuilder};
pub use builder::{BuildReport, BuildSettings, Builder};
pub use clock::{Clock, FakeClock, SystemClock};
pub use concurrency::{install_signal_handler, AbortSignal};
pub use delegate::{select_delegate, DelegateContext, InstallSession, OsDelegate};
pub use instance::{Instance, InstanceContext, InstanceSettings, INACTIVITY_FALLBACK_TICKS};
pub use lifecycle::{validate_transition, BuildStatus};
pub use resources::{default_keys_dir, EphemeralKeyPair};
pub use uploader::CloudRemoteStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(#[from] stratus_schema::ConfigError),
    #[error("cache error: {0}")]
    Cache(#[from] stratus_cache::CacheError),
    #[error("cloud error: {0}")]
    Cloud(#[from] stratus_cloud::CloudError),
    #[error("snapshot {image} failed: {reason}")]
    SnapshotFailed { image: String, reason: String },
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("no install instance has been launched")]
    NoInstance,
    #[error("install media have not been prepared")]
    NotPrepared,
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("boot stub creation failed: {0}")]
    BootStub(String),
    #[error("invalid diagnostics: {0}")]
    Diagnostics(String),
    #[error("keypair '{0}' was created without private key material")]
    MissingKeyMaterial(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
