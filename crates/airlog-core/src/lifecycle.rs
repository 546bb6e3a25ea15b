//! Collection lifecycle
//!
//! ```text
//! Booting → WaitingForStorage → WaitingForStart → Collecting → Stopping → Stopped
//!     └──────────────┴────────────────┴──────────────┴────────────┴──→ Faulted
//! ```
//!
//! Transitions only move forward. The control loop owns the [`Lifecycle`];
//! interrupt-side tasks read the published copy in a [`StateCell`].

use core::sync::atomic::{AtomicU8, Ordering};

use log::{error, info, warn};
use thiserror_no_std::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionState {
    Booting = 0,
    WaitingForStorage = 1,
    WaitingForStart = 2,
    Collecting = 3,
    Stopping = 4,
    Stopped = 5,
    Faulted = 6,
}

impl CollectionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Booting,
            1 => Self::WaitingForStorage,
            2 => Self::WaitingForStart,
            3 => Self::Collecting,
            4 => Self::Stopping,
            5 => Self::Stopped,
            _ => Self::Faulted,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Faulted)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("{event} is not allowed in state {from:?}")]
    IllegalTransition {
        from: CollectionState,
        event: &'static str,
    },
}

/// Published copy of the lifecycle state, readable from any context.
pub struct StateCell(AtomicU8);

impl StateCell {
    pub const fn new() -> Self {
        Self(AtomicU8::new(CollectionState::Booting as u8))
    }

    pub fn load(&self) -> CollectionState {
        CollectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_collecting(&self) -> bool {
        self.load() == CollectionState::Collecting
    }

    fn store(&self, state: CollectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Lifecycle<'a> {
    state: CollectionState,
    cell: &'a StateCell,
    mount_attempts: u32,
    mount_retry_limit: Option<u32>,
    started_at_us: Option<u64>,
}

impl<'a> Lifecycle<'a> {
    /// Start in `Booting` and publish to `cell`.
    pub fn new(cell: &'a StateCell, mount_retry_limit: Option<u32>) -> Self {
        cell.store(CollectionState::Booting);
        Self {
            state: CollectionState::Booting,
            cell,
            mount_attempts: 0,
            mount_retry_limit,
            started_at_us: None,
        }
    }

    pub fn state(&self) -> CollectionState {
        self.state
    }

    /// Collection start time, once started.
    pub fn started_at_us(&self) -> Option<u64> {
        self.started_at_us
    }

    pub fn mount_attempts(&self) -> u32 {
        self.mount_attempts
    }

    pub fn peripherals_ready(&mut self) -> Result<CollectionState, LifecycleError> {
        self.expect(CollectionState::Booting, "peripherals_ready")?;
        Ok(self.enter(CollectionState::WaitingForStorage))
    }

    /// Record one mount attempt.
    ///
    /// A failed attempt keeps waiting for storage unless the retry limit is
    /// exhausted, in which case the lifecycle faults.
    pub fn mount_attempt(&mut self, mounted: bool) -> Result<CollectionState, LifecycleError> {
        self.expect(CollectionState::WaitingForStorage, "mount_attempt")?;
        self.mount_attempts = self.mount_attempts.saturating_add(1);

        if mounted {
            info!("Storage mounted after {} attempt(s)", self.mount_attempts);
            return Ok(self.enter(CollectionState::WaitingForStart));
        }

        match self.mount_retry_limit {
            Some(limit) if self.mount_attempts >= limit => {
                error!("Storage mount failed {} times, giving up", self.mount_attempts);
                Ok(self.enter(CollectionState::Faulted))
            }
            _ => {
                if self.mount_attempts % 20 == 1 {
                    warn!("Storage mount failed (attempt {}), retrying", self.mount_attempts);
                }
                Ok(self.state)
            }
        }
    }

    pub fn start_observed(&mut self, now_us: u64) -> Result<CollectionState, LifecycleError> {
        self.expect(CollectionState::WaitingForStart, "start_observed")?;
        self.started_at_us = Some(now_us);
        Ok(self.enter(CollectionState::Collecting))
    }

    pub fn stop_requested(&mut self) -> Result<CollectionState, LifecycleError> {
        self.expect(CollectionState::Collecting, "stop_requested")?;
        Ok(self.enter(CollectionState::Stopping))
    }

    /// The partial buffer is flushed and storage released.
    pub fn flushed(&mut self) -> Result<CollectionState, LifecycleError> {
        self.expect(CollectionState::Stopping, "flushed")?;
        Ok(self.enter(CollectionState::Stopped))
    }

    pub fn fault(&mut self) -> Result<CollectionState, LifecycleError> {
        if self.state.is_terminal() {
            return Err(LifecycleError::IllegalTransition {
                from: self.state,
                event: "fault",
            });
        }
        Ok(self.enter(CollectionState::Faulted))
    }

    fn expect(&self, state: CollectionState, event: &'static str) -> Result<(), LifecycleError> {
        if self.state == state {
            Ok(())
        } else {
            Err(LifecycleError::IllegalTransition {
                from: self.state,
                event,
            })
        }
    }

    fn enter(&mut self, next: CollectionState) -> CollectionState {
        info!("Lifecycle: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.cell.store(next);
        next
    }
}
