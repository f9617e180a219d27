use std::time::{Duration, Instant};

/// World loop configuration.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Loop iterations per second. Bounds the latency between a message
    /// arriving and the world thread handling it.
    pub tps: u32,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { tps: 20 }
    }
}

impl TickConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tps.max(1) as f64)
    }
}

/// Fixed-period timer polled from a loop.
///
/// Time is passed in explicitly so callers (and tests) control the clock.
/// When the loop falls behind by more than one period the missed periods are
/// skipped rather than fired back to back.
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    period: Duration,
    next_due: Instant,
    fired: u64,
}

impl IntervalTimer {
    /// First firing happens one full period after `start`.
    pub fn new(period: Duration, start: Instant) -> Self {
        Self {
            period,
            next_due: start + period,
            fired: 0,
        }
    }

    /// Number of times the timer has fired.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Returns true (at most once per call) if the timer is due at `now`.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due += self.period;
        if self.next_due <= now {
            let behind = now.duration_since(self.next_due);
            tracing::debug!(behind_ms = behind.as_millis() as u64, "interval timer fell behind, skipping");
            self.next_due = now + self.period;
        }
        self.fired += 1;
        true
    }
}
