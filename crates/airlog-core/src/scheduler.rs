//! Drift-free sample clock
//!
//! The sampler is armed for absolute target times. Each target is derived
//! from the previous target, never from the time the handler actually ran,
//! so a late tick delays only itself and the long-run rate stays exact.

use embassy_time::Duration;

/// Absolute-target clock for the periodic IMU sampler.
///
/// All times are microseconds on the same monotonic timebase as the
/// hardware alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleClock {
    origin_us: u64,
    period_us: u64,
    next_us: u64,
    ticks: u64,
}

impl SampleClock {
    /// Create a clock whose first target is one period after `origin_us`.
    pub const fn new(origin_us: u64, period: Duration) -> Self {
        let period_us = period.as_micros();
        Self {
            origin_us,
            period_us,
            next_us: origin_us + period_us,
            ticks: 0,
        }
    }

    /// Target time the alarm should be armed for.
    #[inline]
    pub const fn next_target(&self) -> u64 {
        self.next_us
    }

    /// Consume the pending target and schedule the following one.
    ///
    /// Returns the target that just fired; that value, not the current
    /// time, is what the sample is stamped with.
    pub fn advance(&mut self) -> u64 {
        let fired = self.next_us;
        self.next_us = fired + self.period_us;
        self.ticks += 1;
        fired
    }

    /// Number of targets consumed so far.
    #[inline]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    #[inline]
    pub const fn origin(&self) -> u64 {
        self.origin_us
    }

    #[inline]
    pub const fn period_us(&self) -> u64 {
        self.period_us
    }

    /// Milliseconds between the clock origin and a fired target.
    pub const fn elapsed_ms(&self, target_us: u64) -> u64 {
        target_us.saturating_sub(self.origin_us) / 1000
    }
}
