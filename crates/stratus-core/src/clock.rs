use chrono::{DateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Time source for poll loops.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);

    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

type SleepHook = Arc<dyn Fn(u64) + Send + Sync>;

/// Clock that never blocks. Sleeps advance a virtual time and are counted.
#[derive(Clone)]
pub struct FakeClock {
    start: DateTime<Utc>,
    sleeps: Arc<AtomicU64>,
    slept_ms: Arc<AtomicU64>,
    hook: Option<SleepHook>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self {
            start: DateTime::UNIX_EPOCH,
            sleeps: Arc::new(AtomicU64::new(0)),
            slept_ms: Arc::new(AtomicU64::new(0)),
            hook: None,
        }
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` with the 1-based sleep count after every sleep.
    #[must_use]
    pub fn on_sleep(mut self, hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn sleeps(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.slept_ms.load(Ordering::SeqCst))
    }
}

impl Clock for FakeClock {
    fn sleep(&self, duration: Duration) {
        let n = self.sleeps.fetch_add(1, Ordering::SeqCst) + 1;
        self.slept_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        if let Some(hook) = &self.hook {
            hook(n);
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::milliseconds(self.slept_ms.load(Ordering::SeqCst) as i64);
        self.start + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_counts_and_advances() {
        let clock = FakeClock::new();
        clock.sleep(Duration::from_secs(1));
        clock.sleep(Duration::from_millis(500));
        assert_eq!(clock.sleeps(), 2);
        assert_eq!(clock.elapsed(), Duration::from_millis(1500));
        assert_eq!((clock.now() - DateTime::UNIX_EPOCH).num_milliseconds(), 1500);
    }

    #[test]
    fn clones_share_counters() {
        let clock = FakeClock::new();
        let other = clock.clone();
        other.sleep(Duration::from_secs(2));
        assert_eq!(clock.sleeps(), 1);
    }

    #[test]
    fn hook_sees_sleep_number() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen2 = Arc::clone(&seen);
        let clock = FakeClock::new().on_sleep(move |n| seen2.store(n, Ordering::SeqCst));
        clock.sleep(Duration::ZERO);
        clock.sleep(Duration::ZERO);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
