//! Firmware-level errors: board bring-up plus everything the core reports.

use airlog_core::LoggerError;
use airlog_core::buffer::BufferError;
use airlog_core::config::ConfigError;
use airlog_core::lifecycle::LifecycleError;
use thiserror_no_std::Error;

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("I2C configuration rejected: {0:?}")]
    I2cConfig(esp_hal::i2c::master::ConfigError),
    #[error("UART configuration rejected: {0:?}")]
    UartConfig(esp_hal::uart::ConfigError),
    #[error("SPI configuration rejected: {0:?}")]
    SpiConfig(esp_hal::spi::master::ConfigError),
    #[error("storage did not mount after {0} attempts")]
    MountGaveUp(u32),
    #[error("task could not be spawned")]
    Spawn(embassy_executor::SpawnError),
    #[error("{0}")]
    Logger(LoggerError),
}

impl From<esp_hal::i2c::master::ConfigError> for FirmwareError {
    fn from(e: esp_hal::i2c::master::ConfigError) -> Self {
        Self::I2cConfig(e)
    }
}

impl From<esp_hal::uart::ConfigError> for FirmwareError {
    fn from(e: esp_hal::uart::ConfigError) -> Self {
        Self::UartConfig(e)
    }
}

impl From<esp_hal::spi::master::ConfigError> for FirmwareError {
    fn from(e: esp_hal::spi::master::ConfigError) -> Self {
        Self::SpiConfig(e)
    }
}

impl From<embassy_executor::SpawnError> for FirmwareError {
    fn from(e: embassy_executor::SpawnError) -> Self {
        Self::Spawn(e)
    }
}

impl From<LoggerError> for FirmwareError {
    fn from(e: LoggerError) -> Self {
        Self::Logger(e)
    }
}

impl From<ConfigError> for FirmwareError {
    fn from(e: ConfigError) -> Self {
        Self::Logger(e.into())
    }
}

impl From<BufferError> for FirmwareError {
    fn from(e: BufferError) -> Self {
        Self::Logger(e.into())
    }
}

impl From<LifecycleError> for FirmwareError {
    fn from(e: LifecycleError) -> Self {
        Self::Logger(e.into())
    }
}
