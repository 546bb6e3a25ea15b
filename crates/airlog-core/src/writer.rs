//! Storage writer
//!
//! Runs on the writer core. Each service pass drains whatever buffers are
//! ready, oldest first, into the log file.

use log::{debug, error};

use crate::buffer::{Drainer, SLOTS};
use crate::storage::LineSink;

/// What one [`StorageWriter::service`] pass drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub buffers: usize,
    pub lines: usize,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.buffers == 0
    }
}

pub struct StorageWriter<'a, const N: usize> {
    drainer: Drainer<'a, N>,
    /// Buffer expected to complete next; fills strictly alternate
    next: usize,
    lines_written: u64,
    failures: u32,
}

impl<'a, const N: usize> StorageWriter<'a, N> {
    pub fn new(drainer: Drainer<'a, N>) -> Self {
        Self {
            drainer,
            next: 0,
            lines_written: 0,
            failures: 0,
        }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub fn buffers_drained(&self) -> u32 {
        self.drainer.drained()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Drain every ready buffer, in the order they were filled.
    ///
    /// A failing drain leaves its buffer ready for the next pass and ends
    /// this one, so a later buffer is never written ahead of it.
    pub fn service<S: LineSink>(&mut self, sink: &mut S) -> Result<DrainReport, S::Error> {
        let mut report = DrainReport::default();

        for _ in 0..SLOTS {
            match self.drainer.drain_if_ready(self.next, sink) {
                Ok(Some(lines)) => {
                    debug!("Buffer {} drained ({} lines)", self.next, lines);
                    report.buffers += 1;
                    report.lines += lines;
                    self.lines_written += lines as u64;
                    self.next = (self.next + 1) % SLOTS;
                }
                Ok(None) => break,
                Err(e) => {
                    self.failures = self.failures.saturating_add(1);
                    // Rate-limited: a pulled card fails on every pass
                    if self.failures % 100 == 1 {
                        error!(
                            "Drain of buffer {} failed ({} failures so far): {:?}",
                            self.next, self.failures, e
                        );
                    } else {
                        debug!("Drain of buffer {} failed: {:?}", self.next, e);
                    }
                    return Err(e);
                }
            }
        }

        Ok(report)
    }
}
