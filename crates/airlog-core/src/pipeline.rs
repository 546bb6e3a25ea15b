//! Control-core side of the pipeline
//!
//! The [`Collector`] turns stamped IMU samples into CSV lines and appends
//! them to the double buffer. It owns everything the control loop mutates
//! per sample: the record formatter, the producer end of the buffer and the
//! collection start time.

use embassy_time::Duration;
use log::{error, info};

use crate::buffer::{Append, BufferError, Producer};
use crate::co2_cache::Co2Cache;
use crate::error::LoggerError;
use crate::record::RecordFormatter;
use crate::sensors::StampedSample;
use crate::storage::LineSink;

/// What happened to one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Stored in the active buffer
    Stored { co2_merged: bool },
    /// Stored, and it completed buffer `index`
    Filled { index: usize, co2_merged: bool },
    /// Both buffers were busy; the line was dropped
    Dropped { dropped: u32 },
}

impl Recorded {
    pub fn co2_merged(&self) -> bool {
        matches!(
            self,
            Self::Stored { co2_merged: true } | Self::Filled { co2_merged: true, .. }
        )
    }
}

pub struct Collector<'a, const N: usize> {
    formatter: RecordFormatter,
    producer: Producer<'a, N>,
    started_at_us: u64,
    recorded: u64,
}

impl<'a, const N: usize> Collector<'a, N> {
    pub fn new(producer: Producer<'a, N>, co2_merge_cadence: u32, started_at_us: u64) -> Self {
        Self {
            formatter: RecordFormatter::new(co2_merge_cadence),
            producer,
            started_at_us,
            recorded: 0,
        }
    }

    pub fn started_at_us(&self) -> u64 {
        self.started_at_us
    }

    /// Samples stored in a buffer so far.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    pub fn dropped(&self) -> u32 {
        self.producer.dropped()
    }

    pub fn fills(&self) -> u32 {
        self.producer.fills()
    }

    /// Whether a filled buffer still waits for the writer.
    pub fn drain_pending(&self) -> bool {
        self.producer.peer_pending()
    }

    /// Filled buffers the writer has not released yet.
    pub fn pending_drains(&self) -> usize {
        self.producer.pending_drains()
    }

    /// Format one sample, merging the cached CO₂ value on cadence, and
    /// append it to the active buffer.
    pub fn record(
        &mut self,
        stamped: &StampedSample,
        co2: &Co2Cache,
    ) -> Result<Recorded, LoggerError> {
        let elapsed_us = stamped.target_us.saturating_sub(self.started_at_us);
        let formatted = self
            .formatter
            .format(&stamped.sample, elapsed_us / 1000, co2)?;
        let co2_merged = formatted.co2_merged;

        match self.producer.append(formatted.line) {
            Ok(Append::Stored { .. }) => {
                self.recorded += 1;
                Ok(Recorded::Stored { co2_merged })
            }
            Ok(Append::Filled { index }) => {
                self.recorded += 1;
                Ok(Recorded::Filled { index, co2_merged })
            }
            Err(BufferError::Overrun { dropped }) => Ok(Recorded::Dropped { dropped }),
            Err(e) => Err(e.into()),
        }
    }

    /// Flush the partially filled buffer and close the producer.
    ///
    /// Call once no filled buffer is pending any more, so the partial lines
    /// land after everything the writer has drained.
    pub fn finish<S: LineSink>(&mut self, sink: &mut S) -> Result<usize, S::Error> {
        let flushed = self.producer.flush_partial(sink)?;
        info!(
            "Collection finished: {} samples recorded, {} dropped, {} buffers filled, {} lines in final flush",
            self.recorded,
            self.producer.dropped(),
            self.producer.fills(),
            flushed
        );
        Ok(flushed)
    }
}

/// State of the stop-time wait for the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainWait {
    /// No filled buffer is left for the writer
    Drained,
    /// Buffers are still pending and the deadline has not passed
    Pending,
    /// The deadline passed; `buffers` filled buffers (at most `lines`
    /// lines) will not reach the file
    Abandoned { buffers: usize, lines: usize },
}

/// Bounds how long stopping waits for the writer, so a failing card cannot
/// keep the logger from its final flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainDeadline {
    deadline_us: u64,
}

impl DrainDeadline {
    pub fn new(now_us: u64, timeout: Duration) -> Self {
        Self {
            deadline_us: now_us.saturating_add(timeout.as_micros()),
        }
    }

    pub fn check<const N: usize>(&self, collector: &Collector<'_, N>, now_us: u64) -> DrainWait {
        let buffers = collector.pending_drains();
        if buffers == 0 {
            return DrainWait::Drained;
        }
        if now_us < self.deadline_us {
            return DrainWait::Pending;
        }
        let lines = buffers * N;
        error!(
            "Writer did not catch up before stop, {} buffers (up to {} lines) not written",
            buffers, lines
        );
        DrainWait::Abandoned { buffers, lines }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DoubleBuffer;
    use crate::lifecycle::{CollectionState, Lifecycle, StateCell};
    use crate::record::SampleRecord;
    use crate::scheduler::SampleClock;
    use crate::sensors::ImuSample;
    use crate::storage::LogFile;
    use crate::storage::test_support::{Injected, MemoryVolume, RecordingSink};
    use crate::writer::StorageWriter;

    const START_US: u64 = 7_000_000;

    fn stamped(clock: &mut SampleClock) -> StampedSample {
        StampedSample {
            target_us: clock.advance(),
            sample: ImuSample {
                accel: [0.0, 0.0, 1.0],
                gyro: [0.5, -0.5, 0.0],
            },
        }
    }

    #[test]
    fn test_records_carry_elapsed_time_from_targets() {
        let buffer = DoubleBuffer::<8>::new();
        let (producer, drainer) = buffer.split().unwrap();
        let mut collector = Collector::new(producer, 5, START_US);
        let mut writer = StorageWriter::new(drainer);
        let mut clock = SampleClock::new(START_US, Duration::from_millis(10));
        let cache = Co2Cache::new();
        let mut sink = RecordingSink::default();

        for _ in 0..8 {
            collector.record(&stamped(&mut clock), &cache).unwrap();
        }
        writer.service(&mut sink).unwrap();

        let elapsed: std::vec::Vec<u64> = sink
            .lines
            .iter()
            .map(|l| SampleRecord::parse_line(l).unwrap().elapsed_ms)
            .collect();
        assert_eq!(elapsed, [10, 20, 30, 40, 50, 60, 70, 80]);
    }

    #[test]
    fn test_fill_and_merge_are_reported() {
        let buffer = DoubleBuffer::<5>::new();
        let (producer, _drainer) = buffer.split().unwrap();
        let mut collector = Collector::new(producer, 5, START_US);
        let mut clock = SampleClock::new(START_US, Duration::from_millis(10));
        let cache = Co2Cache::new();
        cache.store(415);

        for _ in 0..4 {
            let outcome = collector.record(&stamped(&mut clock), &cache).unwrap();
            assert_eq!(outcome, Recorded::Stored { co2_merged: false });
        }
        let fifth = collector.record(&stamped(&mut clock), &cache).unwrap();
        assert_eq!(
            fifth,
            Recorded::Filled {
                index: 0,
                co2_merged: true
            }
        );
        assert!(fifth.co2_merged());
        assert_eq!(collector.fills(), 1);
        assert!(collector.drain_pending());
    }

    #[test]
    fn test_overrun_is_reported_not_raised() {
        let buffer = DoubleBuffer::<1>::new();
        let (producer, _drainer) = buffer.split().unwrap();
        let mut collector = Collector::new(producer, 5, START_US);
        let mut clock = SampleClock::new(START_US, Duration::from_millis(10));
        let cache = Co2Cache::new();

        collector.record(&stamped(&mut clock), &cache).unwrap();
        collector.record(&stamped(&mut clock), &cache).unwrap();
        assert_eq!(
            collector.record(&stamped(&mut clock), &cache),
            Ok(Recorded::Dropped { dropped: 1 })
        );
        assert_eq!(collector.recorded(), 2);
        assert_eq!(collector.dropped(), 1);
    }

    #[test]
    fn test_stop_flushes_partial_buffer_after_drains() {
        let buffer = DoubleBuffer::<4>::new();
        let (producer, drainer) = buffer.split().unwrap();
        let mut collector = Collector::new(producer, 5, START_US);
        let mut writer = StorageWriter::new(drainer);
        let mut clock = SampleClock::new(START_US, Duration::from_millis(10));
        let cache = Co2Cache::new();
        let mut sink = RecordingSink::default();

        for _ in 0..7 {
            collector.record(&stamped(&mut clock), &cache).unwrap();
        }
        assert!(collector.drain_pending());
        writer.service(&mut sink).unwrap();
        assert!(!collector.drain_pending());

        assert_eq!(collector.finish(&mut sink), Ok(3));
        assert_eq!(sink.lines.len(), 7);
        let last = SampleRecord::parse_line(&sink.lines[6]).unwrap();
        assert_eq!(last.elapsed_ms, 70);

        assert_eq!(
            collector.record(&stamped(&mut clock), &cache),
            Err(LoggerError::Buffer(BufferError::Closed))
        );
        assert_eq!(collector.finish(&mut sink), Ok(0));
    }

    #[test]
    fn test_deadline_reports_drained_without_waiting() {
        let buffer = DoubleBuffer::<4>::new();
        let (producer, _drainer) = buffer.split().unwrap();
        let collector = Collector::new(producer, 5, START_US);

        let deadline = DrainDeadline::new(1_000, Duration::from_millis(5));
        assert_eq!(deadline.check(&collector, 0), DrainWait::Drained);
        assert_eq!(deadline.check(&collector, u64::MAX), DrainWait::Drained);
    }

    #[test]
    fn test_stop_completes_when_storage_keeps_failing() {
        let cell = StateCell::new();
        let mut lifecycle = Lifecycle::new(&cell, None);
        lifecycle.peripherals_ready().unwrap();
        lifecycle.mount_attempt(true).unwrap();
        lifecycle.start_observed(START_US).unwrap();

        let buffer = DoubleBuffer::<4>::new();
        let (producer, drainer) = buffer.split().unwrap();
        let mut collector = Collector::new(producer, 5, START_US);
        let mut writer = StorageWriter::new(drainer);
        let mut clock = SampleClock::new(START_US, Duration::from_millis(10));
        let cache = Co2Cache::new();
        let mut pulled_card = RecordingSink {
            broken: true,
            ..Default::default()
        };

        for _ in 0..6 {
            collector.record(&stamped(&mut clock), &cache).unwrap();
        }
        lifecycle.stop_requested().unwrap();

        let deadline = DrainDeadline::new(0, Duration::from_millis(100));
        for pass in 0..1000u64 {
            assert_eq!(writer.service(&mut pulled_card), Err(Injected));
            assert_eq!(deadline.check(&collector, pass * 10), DrainWait::Pending);
        }
        assert_eq!(writer.failures(), 1000);
        assert!(collector.drain_pending());
        assert_eq!(
            deadline.check(&collector, 100_000),
            DrainWait::Abandoned {
                buffers: 1,
                lines: 4
            }
        );

        // The partial buffer still reaches a working file and stop completes
        let mut file = LogFile::create(MemoryVolume::default()).unwrap();
        assert_eq!(collector.finish(&mut file), Ok(2));
        file.close().unwrap();
        assert_eq!(lifecycle.flushed(), Ok(CollectionState::Stopped));

        let contents = file.volume().contents("log_01.csv");
        let elapsed: std::vec::Vec<u64> = contents
            .lines()
            .skip(1)
            .map(|l| SampleRecord::parse_line(l).unwrap().elapsed_ms)
            .collect();
        assert_eq!(elapsed, [50, 60]);
    }

    #[test]
    fn test_failed_final_flush_can_be_retried() {
        let buffer = DoubleBuffer::<8>::new();
        let (producer, _drainer) = buffer.split().unwrap();
        let mut collector = Collector::new(producer, 5, START_US);
        let mut clock = SampleClock::new(START_US, Duration::from_millis(10));
        let cache = Co2Cache::new();
        let mut sink = RecordingSink {
            fail_at_line: Some(1),
            ..Default::default()
        };

        for _ in 0..3 {
            collector.record(&stamped(&mut clock), &cache).unwrap();
        }
        assert_eq!(collector.finish(&mut sink), Err(Injected));
        assert_eq!(collector.finish(&mut sink), Ok(3));
        assert_eq!(sink.lines.len(), 3);
        assert_eq!(sink.syncs, 1);
        assert_eq!(collector.finish(&mut sink), Ok(0));
    }
}
