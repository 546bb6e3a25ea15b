//! Cross-context signalling between the pipeline tasks
//!
//! One static [`PipelineSignals`] connects the sampler (interrupt
//! executor), the control loop (thread executor) and the storage writer
//! (second core). Producers never wait on these primitives.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use log::warn;

use crate::sensors::StampedSample;

/// Samples that may queue up between the sampler and the control loop
pub const SAMPLE_QUEUE_DEPTH: usize = 8;

pub type SampleChannel = Channel<CriticalSectionRawMutex, StampedSample, SAMPLE_QUEUE_DEPTH>;

pub struct PipelineSignals {
    /// Sampler → control loop
    pub samples: SampleChannel,
    /// Accepted stop press
    pub stop: Signal<CriticalSectionRawMutex, ()>,
    /// Index of a buffer that just became ready
    pub buffer_ready: Signal<CriticalSectionRawMutex, usize>,
    /// The writer finished at least one buffer
    pub buffer_drained: Signal<CriticalSectionRawMutex, ()>,
    sample_overflows: AtomicU32,
}

impl PipelineSignals {
    pub const fn new() -> Self {
        Self {
            samples: Channel::new(),
            stop: Signal::new(),
            buffer_ready: Signal::new(),
            buffer_drained: Signal::new(),
            sample_overflows: AtomicU32::new(0),
        }
    }

    /// Queue a sample for the control loop without waiting.
    ///
    /// Returns `false` and counts the sample as lost when the queue is full.
    pub fn offer_sample(&self, sample: StampedSample) -> bool {
        if self.samples.try_send(sample).is_ok() {
            return true;
        }
        let lost = self.sample_overflows.fetch_add(1, Ordering::Relaxed) + 1;
        if lost % 100 == 1 {
            warn!("Sample queue full, {} samples lost", lost);
        }
        false
    }

    pub fn sample_overflows(&self) -> u32 {
        self.sample_overflows.load(Ordering::Relaxed)
    }
}

impl Default for PipelineSignals {
    fn default() -> Self {
        Self::new()
    }
}
