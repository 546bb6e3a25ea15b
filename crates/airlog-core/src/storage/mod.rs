//! Log storage: volume abstraction, file naming and the open log file
//!
//! The pipeline only ever appends lines to one CSV file per collection run.
//! [`LogVolume`] is the narrow interface a filesystem backend has to offer
//! (an SD card through `embedded-sdmmc` on the device, a directory on the
//! host simulator); [`LogFile`] layers the CSV conventions on top of it.

pub mod sd_card;

use core::fmt::{Debug, Write};

use log::{info, warn};
use thiserror_no_std::Error;

use crate::config::{CSV_HEADER, MAX_LOG_NUMBER};

pub use sd_card::{SdCardVolume, SdVolumeError};

/// `log_NN.csv`
pub type LogName = heapless::String<12>;

/// Destination of formatted record lines.
pub trait LineSink {
    type Error: Debug;

    /// Append one line (already newline-terminated).
    fn write_line(&mut self, line: &str) -> Result<(), Self::Error>;

    /// Make everything written so far durable.
    fn sync(&mut self) -> Result<(), Self::Error>;
}

/// Minimal filesystem surface used by the logger.
///
/// At most one file is open at a time; `write` and `sync` act on it.
pub trait LogVolume {
    type Error: Debug;

    fn mount(&mut self) -> Result<(), Self::Error>;

    fn exists(&mut self, name: &str) -> Result<bool, Self::Error>;

    /// Open `name` for appending, creating it when missing. Returns the
    /// current file length in bytes.
    fn open_append(&mut self, name: &str) -> Result<u32, Self::Error>;

    fn write(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    fn sync(&mut self) -> Result<(), Self::Error>;

    /// Close the open file (if any) and release the volume.
    fn unmount(&mut self) -> Result<(), Self::Error>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError<E: Debug> {
    #[error("volume error: {0:?}")]
    Volume(E),
    #[error("log file is closed")]
    Closed,
}

/// [`StorageError`] without the backend detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Volume,
    Closed,
}

impl<E: Debug> StorageError<E> {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            Self::Volume(_) => StorageErrorKind::Volume,
            Self::Closed => StorageErrorKind::Closed,
        }
    }
}

/// Name of log file number `n`.
pub fn log_file_name(n: u8) -> LogName {
    let mut name = LogName::new();
    // "log_NN.csv" always fits in 12 bytes for n <= 255
    let _ = write!(name, "log_{:02}.csv", n);
    name
}

/// Find the first unused `log_NN.csv`, counting from 1.
///
/// When every name up to `log_99.csv` is taken, `log_99.csv` is returned
/// and will be appended to.
pub fn allocate_log_name<V: LogVolume>(volume: &mut V) -> Result<LogName, V::Error> {
    for n in 1..=MAX_LOG_NUMBER {
        let name = log_file_name(n);
        if !volume.exists(&name)? {
            return Ok(name);
        }
    }
    warn!(
        "All log file names are taken, appending to log_{:02}.csv",
        MAX_LOG_NUMBER
    );
    Ok(log_file_name(MAX_LOG_NUMBER))
}

/// The CSV file a collection run writes to.
pub struct LogFile<V: LogVolume> {
    volume: V,
    name: LogName,
    open: bool,
}

impl<V: LogVolume> LogFile<V> {
    /// Allocate a fresh name on a mounted volume, open it for appending and
    /// write the CSV header if the file is empty.
    pub fn create(mut volume: V) -> Result<Self, StorageError<V::Error>> {
        let name = allocate_log_name(&mut volume).map_err(StorageError::Volume)?;
        let length = volume.open_append(&name).map_err(StorageError::Volume)?;

        if length == 0 {
            volume
                .write(CSV_HEADER.as_bytes())
                .map_err(StorageError::Volume)?;
            volume.sync().map_err(StorageError::Volume)?;
        }

        info!("Logging to {} ({} bytes present)", name.as_str(), length);
        Ok(Self {
            volume,
            name,
            open: true,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn volume(&self) -> &V {
        &self.volume
    }

    /// Sync and unmount. Later writes fail with [`StorageError::Closed`].
    pub fn close(&mut self) -> Result<(), StorageError<V::Error>> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.volume.sync().map_err(StorageError::Volume)?;
        self.volume.unmount().map_err(StorageError::Volume)?;
        info!("{} closed, volume unmounted", self.name.as_str());
        Ok(())
    }
}

impl<V: LogVolume> LineSink for LogFile<V> {
    type Error = StorageError<V::Error>;

    fn write_line(&mut self, line: &str) -> Result<(), Self::Error> {
        if !self.open {
            return Err(StorageError::Closed);
        }
        self.volume
            .write(line.as_bytes())
            .map_err(StorageError::Volume)
    }

    fn sync(&mut self) -> Result<(), Self::Error> {
        if !self.open {
            return Err(StorageError::Closed);
        }
        self.volume.sync().map_err(StorageError::Volume)
    }
}
