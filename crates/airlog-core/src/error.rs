//! Umbrella error type of the logger
//!
//! Module errors convert into [`LoggerError`] so setup code and the control
//! loop can propagate any of them with `?`.

use thiserror_no_std::Error;

use crate::buffer::BufferError;
use crate::config::ConfigError;
use crate::lifecycle::LifecycleError;
use crate::record::RecordError;
use crate::sensors::{Co2Error, ImuError};
use crate::storage::{StorageError, StorageErrorKind};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerError {
    #[error("configuration: {0}")]
    Config(ConfigError),
    #[error("IMU: {0}")]
    Imu(ImuError),
    #[error("CO2 sensor: {0}")]
    Co2(Co2Error),
    #[error("record: {0}")]
    Record(RecordError),
    #[error("buffer: {0}")]
    Buffer(BufferError),
    #[error("lifecycle: {0}")]
    Lifecycle(LifecycleError),
    #[error("storage: {0:?}")]
    Storage(StorageErrorKind),
}

impl From<ConfigError> for LoggerError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ImuError> for LoggerError {
    fn from(e: ImuError) -> Self {
        Self::Imu(e)
    }
}

impl From<Co2Error> for LoggerError {
    fn from(e: Co2Error) -> Self {
        Self::Co2(e)
    }
}

impl From<RecordError> for LoggerError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}

impl From<BufferError> for LoggerError {
    fn from(e: BufferError) -> Self {
        Self::Buffer(e)
    }
}

impl From<LifecycleError> for LoggerError {
    fn from(e: LifecycleError) -> Self {
        Self::Lifecycle(e)
    }
}

impl<E: core::fmt::Debug> From<StorageError<E>> for LoggerError {
    fn from(e: StorageError<E>) -> Self {
        Self::Storage(e.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_log() -> Result<(), StorageError<u8>> {
        Err(StorageError::Volume(7))
    }

    fn setup() -> Result<(), LoggerError> {
        open_log()?;
        Ok(())
    }

    #[test]
    fn test_question_mark_converts_module_errors() {
        assert_eq!(setup(), Err(LoggerError::Storage(StorageErrorKind::Volume)));

        let e: LoggerError = BufferError::Closed.into();
        assert_eq!(e, LoggerError::Buffer(BufferError::Closed));
    }
}
