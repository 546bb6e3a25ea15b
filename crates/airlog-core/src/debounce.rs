//! Stop-button debouncer
//!
//! Two-state filter (idle / within refractory window). An edge is accepted
//! when no press has been accepted yet, or when strictly more than the
//! window has elapsed since the last accepted press. Rejected edges do not
//! extend the window.

use embassy_time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debouncer {
    window_us: u64,
    last_accepted_us: Option<u64>,
}

impl Debouncer {
    pub const fn new(window: Duration) -> Self {
        Self {
            window_us: window.as_micros(),
            last_accepted_us: None,
        }
    }

    /// Feed a falling edge observed at `now_us`. Returns `true` when the
    /// edge counts as a press.
    pub fn on_edge(&mut self, now_us: u64) -> bool {
        let accept = match self.last_accepted_us {
            None => true,
            Some(last) => now_us.saturating_sub(last) > self.window_us,
        };
        if accept {
            self.last_accepted_us = Some(now_us);
        }
        accept
    }

    /// Whether an edge at `now_us` would fall inside the refractory window.
    pub fn is_refractory(&self, now_us: u64) -> bool {
        self.last_accepted_us
            .is_some_and(|last| now_us.saturating_sub(last) <= self.window_us)
    }
}
