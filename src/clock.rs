use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Time source for waits.
pub trait Clock {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

type AdvanceHook = Arc<dyn Fn(Duration) + Send + Sync>;

/// Virtual clock: `sleep` moves time forward instantly.
///
/// An advance hook runs after every step with the new time, which lets tests
/// deliver messages at exact virtual instants.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
    on_advance: Option<AdvanceHook>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_advance(mut self, hook: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.on_advance = Some(Arc::new(hook));
        self
    }

    pub fn advance(&self, delta: Duration) {
        let now = {
            let mut now = self.now.lock();
            *now = now.saturating_add(delta);
            *now
        };
        if let Some(hook) = &self.on_advance {
            hook(now);
        }
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &*self.now.lock())
            .field("on_advance", &self.on_advance.is_some())
            .finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn manual_clock_advances_on_sleep_and_runs_hook() {
        let seen = Arc::new(AtomicU64::new(0));
        let hook_seen = Arc::clone(&seen);
        let clock = ManualClock::new().on_advance(move |now| {
            hook_seen.store(now.as_millis() as u64, Ordering::SeqCst);
        });
        clock.sleep(Duration::from_millis(15));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(20));
        assert_eq!(seen.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_secs(1));
        assert_eq!(other.now(), Duration::from_secs(1));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now();
        clock.sleep(Duration::from_millis(2));
        assert!(clock.now() >= first + Duration::from_millis(2));
    }
}
