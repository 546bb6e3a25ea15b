//! Cross-core double buffer
//!
//! Two fixed-capacity line buffers shared between the producer (control
//! core) and the drainer (writer core). Each slot carries an atomic state
//! tag:
//!
//! ```text
//!   Free ──claim──▶ Active ──fill──▶ Ready ──claim──▶ Draining ──done──▶ Free
//!                  (producer)                        (drainer)
//! ```
//!
//! Only the producer moves a slot `Free → Active → Ready`; only the drainer
//! moves it `Ready → Draining → Free`. Whoever holds a slot in `Active`
//! (producer) or `Draining` (drainer) has exclusive access to its lines.
//! The `Ready` store is a release and the drainer's claim an acquire, so a
//! drainer always sees every line of the buffer it claims. The drainer's
//! `Free` store pairs with the producer's claim the same way.
//!
//! When the producer fills a buffer while the other one is still not free,
//! it does not wait: subsequent lines are dropped and counted until the
//! drainer releases the slot.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use log::warn;
use thiserror_no_std::Error;

use crate::config::BUFFER_LINES;
use crate::record::Line;
use crate::storage::LineSink;

/// Number of buffers
pub const SLOTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Empty and not owned
    Free = 0,
    /// Being filled by the producer
    Active = 1,
    /// Full, waiting for the drainer
    Ready = 2,
    /// Being written out by the drainer
    Draining = 3,
}

impl SlotState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Active,
            2 => Self::Ready,
            3 => Self::Draining,
            _ => Self::Free,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("double buffer was already split")]
    AlreadySplit,
    #[error("producer is closed")]
    Closed,
    #[error("both buffers are full, line dropped ({dropped} so far)")]
    Overrun { dropped: u32 },
    #[error("buffer {index} found in state {found:?}")]
    InvalidState { index: usize, found: SlotState },
}

/// Result of a successful [`Producer::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    /// Line stored; `offset` lines are now in the active buffer
    Stored { offset: usize },
    /// Line stored and it completed buffer `index`, which is now ready for
    /// the drainer
    Filled { index: usize },
}

struct Slot<const N: usize> {
    state: AtomicU8,
    lines: UnsafeCell<heapless::Vec<Line, N>>,
}

impl<const N: usize> Slot<N> {
    const fn new(state: SlotState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
            lines: UnsafeCell::new(heapless::Vec::new()),
        }
    }

    fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SlotState, to: SlotState, success: Ordering) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, success, Ordering::Relaxed)
            .is_ok()
    }
}

/// Two buffers of `N` lines each, meant to live in a `static`.
pub struct DoubleBuffer<const N: usize = BUFFER_LINES> {
    slots: [Slot<N>; SLOTS],
    split: AtomicBool,
}

// SAFETY: the lines of a slot are only accessed by the side that currently
// owns it according to its state tag, and ownership changes hands through
// acquire/release operations on that tag.
unsafe impl<const N: usize> Sync for DoubleBuffer<N> {}

impl<const N: usize> Default for DoubleBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> DoubleBuffer<N> {
    /// Buffer 0 starts out active, buffer 1 free.
    pub const fn new() -> Self {
        Self {
            slots: [Slot::new(SlotState::Active), Slot::new(SlotState::Free)],
            split: AtomicBool::new(false),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Hand out the two ends. Succeeds only once.
    pub fn split(&self) -> Result<(Producer<'_, N>, Drainer<'_, N>), BufferError> {
        if self.split.swap(true, Ordering::AcqRel) {
            return Err(BufferError::AlreadySplit);
        }
        Ok((
            Producer {
                buffer: self,
                active: 0,
                claimed: true,
                offset: 0,
                flushed: 0,
                fills: 0,
                dropped: 0,
                closed: false,
            },
            Drainer {
                buffer: self,
                progress: [0; SLOTS],
                drained: 0,
            },
        ))
    }

    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(Slot::state)
    }

    /// Number of buffers waiting for or undergoing a drain.
    pub fn pending_drains(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.state(), SlotState::Ready | SlotState::Draining))
            .count()
    }
}

/// Filling end, owned by the control core.
pub struct Producer<'a, const N: usize> {
    buffer: &'a DoubleBuffer<N>,
    active: usize,
    /// Whether `active` is currently held in `Active` by us
    claimed: bool,
    offset: usize,
    /// Lines of the active buffer already written by an interrupted flush
    flushed: usize,
    fills: u32,
    dropped: u32,
    closed: bool,
}

impl<const N: usize> Producer<'_, N> {
    /// Index of the buffer being filled (or waited for).
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Lines in the active buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Buffers completed so far.
    pub fn fills(&self) -> u32 {
        self.fills
    }

    /// Lines dropped because no buffer was free.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether another buffer still waits for, or undergoes, a drain.
    pub fn peer_pending(&self) -> bool {
        self.pending_drains() > 0
    }

    /// Filled buffers not yet released by the drainer.
    pub fn pending_drains(&self) -> usize {
        self.buffer.pending_drains()
    }

    /// Store one line in the active buffer.
    ///
    /// Never blocks. When the line completes the buffer, the buffer is
    /// published to the drainer, the producer switches to the other buffer
    /// and tries to claim it right away.
    pub fn append(&mut self, line: Line) -> Result<Append, BufferError> {
        if self.closed {
            return Err(BufferError::Closed);
        }
        if !self.claimed && !self.try_claim() {
            self.dropped = self.dropped.saturating_add(1);
            if self.dropped % 100 == 1 {
                warn!(
                    "Buffer {} not drained yet, {} lines dropped",
                    self.active, self.dropped
                );
            }
            return Err(BufferError::Overrun {
                dropped: self.dropped,
            });
        }

        let slot = &self.buffer.slots[self.active];
        // SAFETY: the slot is in `Active` and owned by this producer.
        let lines = unsafe { &mut *slot.lines.get() };
        if lines.push(line).is_err() {
            return Err(BufferError::InvalidState {
                index: self.active,
                found: slot.state(),
            });
        }
        self.offset += 1;

        if self.offset < N {
            return Ok(Append::Stored {
                offset: self.offset,
            });
        }

        let filled = self.active;
        if !slot.transition(SlotState::Active, SlotState::Ready, Ordering::Release) {
            return Err(BufferError::InvalidState {
                index: filled,
                found: slot.state(),
            });
        }
        self.fills += 1;
        self.active = (filled + 1) % SLOTS;
        self.offset = 0;
        self.claimed = false;
        self.try_claim();

        Ok(Append::Filled { index: filled })
    }

    /// Write the partially filled active buffer to `sink` and close the
    /// producer.
    ///
    /// Writes exactly the lines stored since the last fill, then syncs.
    /// After a successful call every `append` fails with
    /// [`BufferError::Closed`] and further flushes write nothing. Returns the
    /// number of lines in the partial buffer.
    ///
    /// On a sink error the producer stays open and keeps its lines; calling
    /// again resumes after the last line that was written.
    pub fn flush_partial<S: LineSink>(&mut self, sink: &mut S) -> Result<usize, S::Error> {
        if self.closed {
            return Ok(0);
        }
        if !self.claimed {
            self.closed = true;
            return Ok(0);
        }

        let slot = &self.buffer.slots[self.active];
        // SAFETY: the slot is in `Active` and owned by this producer.
        let lines = unsafe { &mut *slot.lines.get() };
        let count = lines.len();
        if count > 0 {
            write_from(lines, &mut self.flushed, sink)?;
        }

        lines.clear();
        self.offset = 0;
        self.flushed = 0;
        self.claimed = false;
        self.closed = true;
        slot.state.store(SlotState::Free as u8, Ordering::Release);
        Ok(count)
    }

    fn try_claim(&mut self) -> bool {
        let slot = &self.buffer.slots[self.active];
        self.claimed = slot.transition(SlotState::Free, SlotState::Active, Ordering::Acquire);
        self.claimed
    }
}

/// Draining end, owned by the writer core.
pub struct Drainer<'a, const N: usize> {
    buffer: &'a DoubleBuffer<N>,
    /// Lines of each buffer already written by an interrupted drain
    progress: [usize; SLOTS],
    drained: u32,
}

impl<const N: usize> Drainer<'_, N> {
    /// Buffers fully written so far.
    pub fn drained(&self) -> u32 {
        self.drained
    }

    /// Write buffer `index` to `sink` if it is ready.
    ///
    /// Returns `Ok(None)` when the buffer was not ready. On success the
    /// buffer is cleared, released to the producer, and the number of lines
    /// written is returned. On a sink error the buffer goes back to `Ready`
    /// and a later call resumes after the last line that was written.
    pub fn drain_if_ready<S: LineSink>(
        &mut self,
        index: usize,
        sink: &mut S,
    ) -> Result<Option<usize>, S::Error> {
        let Some(slot) = self.buffer.slots.get(index) else {
            return Ok(None);
        };
        if !slot.transition(SlotState::Ready, SlotState::Draining, Ordering::Acquire) {
            return Ok(None);
        }

        // SAFETY: the slot is in `Draining` and owned by this drainer.
        let lines = unsafe { &mut *slot.lines.get() };
        let written = &mut self.progress[index];

        match write_from(lines, written, sink) {
            Ok(()) => {
                let count = lines.len();
                lines.clear();
                *written = 0;
                self.drained += 1;
                slot.state.store(SlotState::Free as u8, Ordering::Release);
                Ok(Some(count))
            }
            Err(e) => {
                slot.state.store(SlotState::Ready as u8, Ordering::Release);
                Err(e)
            }
        }
    }
}

/// Write `lines` starting at `*written`, advancing it per line, then sync.
fn write_from<S: LineSink>(
    lines: &[Line],
    written: &mut usize,
    sink: &mut S,
) -> Result<(), S::Error> {
    let start = *written;
    for line in &lines[start..] {
        sink.write_line(line)?;
        *written += 1;
    }
    sink.sync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{Injected, RecordingSink};
    use core::fmt::Write;

    fn line(n: usize) -> Line {
        let mut line = Line::new();
        writeln!(line, "{}", n).unwrap();
        line
    }

    fn fill<const N: usize>(producer: &mut Producer<'_, N>, from: usize, count: usize) {
        for n in from..from + count {
            producer.append(line(n)).unwrap();
        }
    }

    #[test]
    fn test_split_only_once() {
        let buffer = DoubleBuffer::<4>::new();
        assert!(buffer.split().is_ok());
        assert!(matches!(buffer.split(), Err(BufferError::AlreadySplit)));
    }

    #[test]
    fn test_full_buffer_flips_exactly_once() {
        let buffer = DoubleBuffer::<BUFFER_LINES>::new();
        let (mut producer, _drainer) = buffer.split().unwrap();

        for n in 0..BUFFER_LINES - 1 {
            assert_eq!(
                producer.append(line(n)),
                Ok(Append::Stored { offset: n + 1 })
            );
        }
        assert_eq!(
            producer.append(line(BUFFER_LINES - 1)),
            Ok(Append::Filled { index: 0 })
        );

        assert_eq!(producer.fills(), 1);
        assert_eq!(producer.offset(), 0);
        assert_eq!(producer.active_index(), 1);
        assert_eq!(buffer.state(0), Some(SlotState::Ready));
        assert_eq!(buffer.state(1), Some(SlotState::Active));
    }

    #[test]
    fn test_drain_writes_lines_in_order_and_frees() {
        let buffer = DoubleBuffer::<3>::new();
        let (mut producer, mut drainer) = buffer.split().unwrap();
        let mut sink = RecordingSink::default();

        assert_eq!(drainer.drain_if_ready(0, &mut sink), Ok(None));
        fill(&mut producer, 0, 3);
        assert_eq!(drainer.drain_if_ready(1, &mut sink), Ok(None));
        assert_eq!(drainer.drain_if_ready(0, &mut sink), Ok(Some(3)));

        assert_eq!(sink.lines, ["0\n", "1\n", "2\n"]);
        assert_eq!(sink.syncs, 1);
        assert_eq!(buffer.state(0), Some(SlotState::Free));
        assert_eq!(drainer.drained(), 1);
        // Nothing left to drain
        assert_eq!(drainer.drain_if_ready(0, &mut sink), Ok(None));
    }

    #[test]
    fn test_overrun_drops_until_slot_is_released() {
        let buffer = DoubleBuffer::<2>::new();
        let (mut producer, mut drainer) = buffer.split().unwrap();
        let mut sink = RecordingSink::default();

        fill(&mut producer, 0, 4);
        assert_eq!(buffer.pending_drains(), 2);

        assert_eq!(
            producer.append(line(4)),
            Err(BufferError::Overrun { dropped: 1 })
        );
        assert_eq!(
            producer.append(line(5)),
            Err(BufferError::Overrun { dropped: 2 })
        );

        drainer.drain_if_ready(0, &mut sink).unwrap();
        assert_eq!(producer.append(line(6)), Ok(Append::Stored { offset: 1 }));
        assert_eq!(producer.active_index(), 0);
        assert_eq!(producer.dropped(), 2);

        drainer.drain_if_ready(1, &mut sink).unwrap();
        assert_eq!(sink.lines, ["0\n", "1\n", "2\n", "3\n"]);
    }

    #[test]
    fn test_failed_drain_restores_ready_and_resumes() {
        let buffer = DoubleBuffer::<4>::new();
        let (mut producer, mut drainer) = buffer.split().unwrap();
        let mut sink = RecordingSink {
            fail_at_line: Some(2),
            ..Default::default()
        };

        fill(&mut producer, 0, 4);
        assert_eq!(drainer.drain_if_ready(0, &mut sink), Err(Injected));
        assert_eq!(buffer.state(0), Some(SlotState::Ready));

        assert_eq!(drainer.drain_if_ready(0, &mut sink), Ok(Some(4)));
        // No line written twice, none lost
        assert_eq!(sink.lines, ["0\n", "1\n", "2\n", "3\n"]);
        assert_eq!(buffer.state(0), Some(SlotState::Free));
    }

    #[test]
    fn test_failed_sync_is_retried_without_rewriting() {
        let buffer = DoubleBuffer::<2>::new();
        let (mut producer, mut drainer) = buffer.split().unwrap();
        let mut sink = RecordingSink {
            fail_next_sync: true,
            ..Default::default()
        };

        fill(&mut producer, 0, 2);
        assert_eq!(drainer.drain_if_ready(0, &mut sink), Err(Injected));
        assert_eq!(drainer.drain_if_ready(0, &mut sink), Ok(Some(2)));
        assert_eq!(sink.lines, ["0\n", "1\n"]);
        assert_eq!(sink.syncs, 1);
    }

    #[test]
    fn test_flush_partial_writes_pending_lines_once() {
        let buffer = DoubleBuffer::<BUFFER_LINES>::new();
        let (mut producer, _drainer) = buffer.split().unwrap();
        let mut sink = RecordingSink::default();

        fill(&mut producer, 0, 123);
        assert_eq!(producer.flush_partial(&mut sink), Ok(123));
        assert_eq!(sink.lines.len(), 123);
        assert_eq!(sink.lines[122], "122\n");
        assert_eq!(sink.syncs, 1);

        assert!(producer.is_closed());
        assert_eq!(producer.append(line(0)), Err(BufferError::Closed));
        assert_eq!(producer.flush_partial(&mut sink), Ok(0));
        assert_eq!(sink.lines.len(), 123);
        assert_eq!(buffer.state(0), Some(SlotState::Free));
    }

    #[test]
    fn test_flush_partial_of_empty_buffer_skips_sync() {
        let buffer = DoubleBuffer::<2>::new();
        let (mut producer, _drainer) = buffer.split().unwrap();
        let mut sink = RecordingSink::default();

        fill(&mut producer, 0, 2);
        assert_eq!(producer.flush_partial(&mut sink), Ok(0));
        assert_eq!(sink.syncs, 0);
        // The filled buffer is still the drainer's
        assert_eq!(buffer.state(0), Some(SlotState::Ready));
    }

    #[test]
    fn test_failed_flush_partial_resumes_and_stays_open() {
        let buffer = DoubleBuffer::<8>::new();
        let (mut producer, _drainer) = buffer.split().unwrap();
        let mut sink = RecordingSink {
            fail_at_line: Some(1),
            ..Default::default()
        };

        fill(&mut producer, 0, 3);
        assert_eq!(producer.flush_partial(&mut sink), Err(Injected));
        assert!(!producer.is_closed());
        assert_eq!(buffer.state(0), Some(SlotState::Active));

        assert_eq!(producer.flush_partial(&mut sink), Ok(3));
        assert_eq!(sink.lines, ["0\n", "1\n", "2\n"]);
        assert_eq!(sink.syncs, 1);
        assert!(producer.is_closed());
        assert_eq!(buffer.state(0), Some(SlotState::Free));
    }

    #[test]
    fn test_failed_flush_sync_is_retried_without_rewriting() {
        let buffer = DoubleBuffer::<8>::new();
        let (mut producer, _drainer) = buffer.split().unwrap();
        let mut sink = RecordingSink {
            fail_next_sync: true,
            ..Default::default()
        };

        fill(&mut producer, 0, 2);
        assert_eq!(producer.flush_partial(&mut sink), Err(Injected));
        assert_eq!(producer.flush_partial(&mut sink), Ok(2));
        assert_eq!(sink.lines, ["0\n", "1\n"]);
        assert_eq!(sink.syncs, 1);
    }

    #[test]
    fn test_peer_pending_tracks_drains() {
        let buffer = DoubleBuffer::<2>::new();
        let (mut producer, mut drainer) = buffer.split().unwrap();
        let mut sink = RecordingSink::default();

        assert!(!producer.peer_pending());
        fill(&mut producer, 0, 3);
        assert!(producer.peer_pending());
        drainer.drain_if_ready(0, &mut sink).unwrap();
        assert!(!producer.peer_pending());
    }

    #[test]
    fn test_out_of_range_index_is_not_ready() {
        let buffer = DoubleBuffer::<2>::new();
        let (_producer, mut drainer) = buffer.split().unwrap();
        let mut sink = RecordingSink::default();
        assert_eq!(drainer.drain_if_ready(SLOTS, &mut sink), Ok(None));
        assert_eq!(buffer.state(SLOTS), None);
    }
}
