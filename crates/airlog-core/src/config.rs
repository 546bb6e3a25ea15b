//! Logger configuration
//!
//! All timing and wiring parameters of the logger live here. The defaults
//! reproduce the deployed instrument: 100 Hz IMU, 20 Hz CO₂ polling, a CO₂
//! merge every 5th record and a 50 ms stop-button refractory window.

use embassy_time::Duration;
use thiserror_no_std::Error;

/// Number of formatted lines held by each of the two record buffers.
pub const BUFFER_LINES: usize = 500;

/// Maximum length in bytes of one formatted CSV line (newline included).
pub const LINE_LEN: usize = 128;

/// CSV header written at the top of every new log file.
pub const CSV_HEADER: &str = "Time(ms),Acc_x,Acc_y,Acc_z,Gyro_x,Gyro_y,Gyro_z,CO2\n";

/// Highest log file number handed out by the allocator (`log_99.csv`).
pub const MAX_LOG_NUMBER: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerConfig {
    /// IMU sampling period (hardware alarm cadence)
    pub sample_period: Duration,
    /// CO₂ polling period (repeating timer cadence)
    pub co2_poll_period: Duration,
    /// A CO₂ value is merged into every `co2_merge_cadence`-th record
    pub co2_merge_cadence: u32,
    /// Refractory window of the stop button
    pub debounce_window: Duration,
    /// Delay between two storage mount attempts
    pub mount_retry_interval: Duration,
    /// Give up mounting after this many attempts. `None` waits for media forever.
    pub mount_retry_limit: Option<u32>,
    /// Fallback poll interval of the storage writer when no signal arrives
    pub writer_poll_interval: Duration,
    /// How long stopping waits for the writer to empty filled buffers
    /// before they are given up
    pub stop_drain_timeout: Duration,
    /// Poll interval of the start input while waiting for start
    pub start_poll_interval: Duration,
    /// Countdown before bring-up so a console can attach
    pub console_delay: Duration,
    /// Settling time after each CO₂ init command
    pub co2_init_settle: Duration,
    /// CO₂ sensor UART baud rate
    pub co2_baud_rate: u32,
    /// ICM-20948 7-bit I2C address
    pub imu_address: u8,
    /// Identity checks performed before the IMU is declared unverified
    pub imu_identity_attempts: u8,
    /// I2C bus frequency in kHz
    pub i2c_frequency_khz: u32,
}

impl LoggerConfig {
    pub const DEFAULT: Self = Self {
        sample_period: Duration::from_millis(10),
        co2_poll_period: Duration::from_millis(50),
        co2_merge_cadence: 5,
        debounce_window: Duration::from_millis(50),
        mount_retry_interval: Duration::from_millis(50),
        mount_retry_limit: None,
        writer_poll_interval: Duration::from_millis(1),
        stop_drain_timeout: Duration::from_secs(2),
        start_poll_interval: Duration::from_millis(1),
        console_delay: Duration::from_secs(5),
        co2_init_settle: Duration::from_millis(500),
        co2_baud_rate: 9600,
        imu_address: 0x69,
        imu_identity_attempts: 3,
        i2c_frequency_khz: 400,
    };

    pub const fn with_sample_period(mut self, period: Duration) -> Self {
        self.sample_period = period;
        self
    }

    pub const fn with_co2_merge_cadence(mut self, cadence: u32) -> Self {
        self.co2_merge_cadence = cadence;
        self
    }

    pub const fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub const fn with_mount_retry_limit(mut self, limit: Option<u32>) -> Self {
        self.mount_retry_limit = limit;
        self
    }

    pub const fn with_stop_drain_timeout(mut self, timeout: Duration) -> Self {
        self.stop_drain_timeout = timeout;
        self
    }

    pub const fn with_co2_init_settle(mut self, settle: Duration) -> Self {
        self.co2_init_settle = settle;
        self
    }

    /// CO₂ settling time in whole milliseconds, saturating at `u32::MAX`.
    pub fn co2_init_settle_ms(&self) -> u32 {
        u32::try_from(self.co2_init_settle.as_millis()).unwrap_or(u32::MAX)
    }

    pub const fn with_console_delay(mut self, delay: Duration) -> Self {
        self.console_delay = delay;
        self
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_period.as_micros() == 0 {
            return Err(ConfigError::ZeroPeriod("sample_period"));
        }
        if self.co2_poll_period.as_micros() == 0 {
            return Err(ConfigError::ZeroPeriod("co2_poll_period"));
        }
        if self.co2_merge_cadence == 0 {
            return Err(ConfigError::ZeroCadence);
        }
        if self.mount_retry_limit == Some(0) {
            return Err(ConfigError::ZeroRetryLimit);
        }
        Ok(())
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    ZeroPeriod(&'static str),
    #[error("CO2 merge cadence must be non-zero")]
    ZeroCadence,
    #[error("mount retry limit must allow at least one attempt")]
    ZeroRetryLimit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(LoggerConfig::default().validate(), Ok(()));
        assert_eq!(LoggerConfig::DEFAULT.sample_period.as_micros(), 10_000);
    }

    #[test]
    fn test_rejects_zero_values() {
        let cfg = LoggerConfig::DEFAULT.with_co2_merge_cadence(0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroCadence));

        let cfg = LoggerConfig::DEFAULT.with_sample_period(Duration::from_ticks(0));
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroPeriod("sample_period")));

        let cfg = LoggerConfig::DEFAULT.with_mount_retry_limit(Some(0));
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroRetryLimit));
    }

    #[test]
    fn test_co2_settle_ms_saturates() {
        assert_eq!(LoggerConfig::DEFAULT.co2_init_settle_ms(), 500);

        let cfg = LoggerConfig::DEFAULT.with_co2_init_settle(Duration::from_secs(5_000_000));
        assert_eq!(cfg.co2_init_settle_ms(), u32::MAX);
    }
}
