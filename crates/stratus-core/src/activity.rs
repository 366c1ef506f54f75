use crate::CoreError;
use serde_json::Value;
use stratus_cloud::Diagnostics;

/// Network counters may grow by less than this between polls and still count
/// as idle. Disk counters must not move at all.
pub const NET_ACTIVITY_TOLERANCE: u64 = 4096;

/// Summed disk and network I/O counters from one diagnostics read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivitySample {
    pub disk: u64,
    pub net: u64,
}

impl ActivitySample {
    pub fn new(disk: u64, net: u64) -> Self {
        Self { disk, net }
    }
}

/// The previous sample, compared against each new one.
#[derive(Debug, Clone, Default)]
pub struct ActivityWindow {
    previous: ActivitySample,
}

impl ActivityWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> ActivitySample {
        self.previous
    }

    /// Record `sample` and report whether anything happened since the last one.
    pub fn observe(&mut self, sample: ActivitySample) -> bool {
        let disk_idle = sample.disk == self.previous.disk;
        let net_idle = sample.net < self.previous.net.saturating_add(NET_ACTIVITY_TOLERANCE);
        self.previous = sample;
        !(disk_idle && net_idle)
    }
}

fn counter(key: &str, value: &Value) -> Result<u64, CoreError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| CoreError::Diagnostics(format!("counter {key} is not a number: {value}")))
}

/// Sum `read`/`write` counters as disk and `rx`/`tx` counters as network.
pub fn sum_counters(diagnostics: &Diagnostics) -> Result<ActivitySample, CoreError> {
    let mut sample = ActivitySample::default();
    for (key, value) in diagnostics {
        let disk = key.contains("read") || key.contains("write");
        let net = key.contains("rx") || key.contains("tx");
        if !disk && !net {
            continue;
        }
        let n = counter(key, value)?;
        if disk {
            sample.disk = sample.disk.saturating_add(n);
        }
        if net {
            sample.net = sample.net.saturating_add(n);
        }
    }
    Ok(sample)
}
