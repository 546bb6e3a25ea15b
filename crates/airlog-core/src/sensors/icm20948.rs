//! ICM-20948 inertial sensor over I2C
//!
//! Only the subset the logger needs: identity check, reset/wake, ±2 g and
//! ±250 °/s ranges, and a 12-byte burst read of the accelerometer and
//! gyroscope output registers.
//!
//! The device has four register banks selected through `REG_BANK_SEL`;
//! sensor data lives in bank 0, range configuration in bank 2.

use embedded_hal::i2c::ErrorKind;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{Error as _, I2c};
use log::{error, info, warn};
use thiserror_no_std::Error;

use super::ImuSample;

pub mod registers {
    /// Expected content of `WHO_AM_I`
    pub const WHO_AM_I_VALUE: u8 = 0xEA;

    /// Bank selection register, present in every bank
    pub const REG_BANK_SEL: u8 = 0x7F;

    // Bank 0
    pub const WHO_AM_I: u8 = 0x00;
    pub const LP_CONFIG: u8 = 0x05;
    pub const PWR_MGMT_1: u8 = 0x06;
    pub const PWR_MGMT_2: u8 = 0x07;
    pub const ACCEL_XOUT_H: u8 = 0x2D;

    // Bank 2
    pub const GYRO_CONFIG_1: u8 = 0x01;
    pub const ACCEL_CONFIG: u8 = 0x14;

    pub const PWR_MGMT_1_DEVICE_RESET: u8 = 0x80;
    pub const PWR_MGMT_1_CLKSEL_AUTO: u8 = 0x01;
    pub const PWR_MGMT_2_ENABLE_ALL: u8 = 0x00;
    pub const LP_CONFIG_DUTY_CYCLE_OFF: u8 = 0x00;
    /// ±250 °/s, DLPF bypassed
    pub const GYRO_CONFIG_1_250DPS: u8 = 0x00;
    /// ±2 g, DLPF bypassed
    pub const ACCEL_CONFIG_2G: u8 = 0x00;
}

use registers::*;

/// Settling time after a device reset
const RESET_SETTLE_MS: u32 = 50;

/// Pause between two identity checks
const IDENTITY_RETRY_MS: u32 = 10;

/// Length of the accel + gyro burst
const BURST_LEN: usize = 12;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImuError {
    #[error("I2C transaction failed: {0:?}")]
    Bus(ErrorKind),
}

/// Outcome of [`Icm20948::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImuStatus {
    /// Identity confirmed and ranges configured
    Verified,
    /// `WHO_AM_I` never matched; the device was left unconfigured and every
    /// sample read from it is suspect
    Unverified { who_am_i: u8 },
}

impl ImuStatus {
    pub const fn is_verified(self) -> bool {
        matches!(self, Self::Verified)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bank {
    Bank0 = 0,
    Bank2 = 2,
}

pub struct Icm20948<I> {
    i2c: I,
    address: u8,
    bank: Option<Bank>,
}

impl<I: I2c> Icm20948<I> {
    pub const fn new(i2c: I, address: u8) -> Self {
        Self {
            i2c,
            address,
            bank: None,
        }
    }

    /// Release the bus.
    pub fn release(self) -> I {
        self.i2c
    }

    /// Check identity, reset and configure the device.
    ///
    /// The identity register is read up to `attempts` times. When it never
    /// matches, the mismatch is logged and the device is left untouched;
    /// the caller gets [`ImuStatus::Unverified`] and decides how to carry
    /// on. Bus failures are returned as errors.
    pub async fn init<D: DelayNs>(
        &mut self,
        delay: &mut D,
        attempts: u8,
    ) -> Result<ImuStatus, ImuError> {
        let attempts = attempts.max(1);
        let mut who_am_i = 0;

        for attempt in 1..=attempts {
            self.select_bank(Bank::Bank0).await?;
            who_am_i = self.read_register(WHO_AM_I).await?;
            if who_am_i == WHO_AM_I_VALUE {
                break;
            }
            warn!(
                "ICM-20948 identity check {}/{} read {:#04x}",
                attempt, attempts, who_am_i
            );
            delay.delay_ms(IDENTITY_RETRY_MS).await;
        }

        if who_am_i != WHO_AM_I_VALUE {
            error!(
                "ICM-20948 not detected (WHO_AM_I = {:#04x}, expected {:#04x})",
                who_am_i, WHO_AM_I_VALUE
            );
            return Ok(ImuStatus::Unverified { who_am_i });
        }
        info!("ICM-20948 detected, WHO_AM_I = {:#04x}", who_am_i);

        self.write_register(PWR_MGMT_1, PWR_MGMT_1_DEVICE_RESET)
            .await?;
        delay.delay_ms(RESET_SETTLE_MS).await;
        // Reset returns the device to bank 0
        self.bank = Some(Bank::Bank0);

        self.write_register(PWR_MGMT_1, PWR_MGMT_1_CLKSEL_AUTO)
            .await?;
        self.write_register(PWR_MGMT_2, PWR_MGMT_2_ENABLE_ALL)
            .await?;
        self.write_register(LP_CONFIG, LP_CONFIG_DUTY_CYCLE_OFF)
            .await?;

        self.select_bank(Bank::Bank2).await?;
        self.write_register(ACCEL_CONFIG, ACCEL_CONFIG_2G).await?;
        self.write_register(GYRO_CONFIG_1, GYRO_CONFIG_1_250DPS)
            .await?;
        self.select_bank(Bank::Bank0).await?;

        info!("ICM-20948 configured (±2 g, ±250 dps)");
        Ok(ImuStatus::Verified)
    }

    /// Burst-read one accel + gyro sample.
    pub async fn read_sample(&mut self) -> Result<ImuSample, ImuError> {
        self.select_bank(Bank::Bank0).await?;
        let mut raw = [0u8; BURST_LEN];
        self.read_bytes(ACCEL_XOUT_H, &mut raw).await?;
        Ok(ImuSample::from_be_bytes(&raw))
    }

    pub async fn write_register(&mut self, reg: u8, value: u8) -> Result<(), ImuError> {
        self.i2c
            .write(self.address, &[reg, value])
            .await
            .map_err(|e| ImuError::Bus(e.kind()))
    }

    pub async fn read_register(&mut self, reg: u8) -> Result<u8, ImuError> {
        let mut value = [0u8; 1];
        self.read_bytes(reg, &mut value).await?;
        Ok(value[0])
    }

    pub async fn read_bytes(&mut self, reg: u8, buffer: &mut [u8]) -> Result<(), ImuError> {
        self.i2c
            .write_read(self.address, &[reg], buffer)
            .await
            .map_err(|e| ImuError::Bus(e.kind()))
    }

    async fn select_bank(&mut self, bank: Bank) -> Result<(), ImuError> {
        if self.bank == Some(bank) {
            return Ok(());
        }
        self.write_register(REG_BANK_SEL, (bank as u8) << 4).await?;
        self.bank = Some(bank);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal_async::i2c::{ErrorType, Operation};
    use std::vec::Vec;

    /// Register-file model of the device: four banks, an auto-incrementing
    /// register pointer and a log of every register write.
    struct MockIcm {
        banks: [[u8; 128]; 4],
        bank: usize,
        writes: Vec<(usize, u8, u8)>,
        fail: bool,
    }

    impl MockIcm {
        fn new(who_am_i: u8) -> Self {
            let mut banks = [[0u8; 128]; 4];
            banks[0][WHO_AM_I as usize] = who_am_i;
            Self {
                banks,
                bank: 0,
                writes: Vec::new(),
                fail: false,
            }
        }
    }

    impl ErrorType for MockIcm {
        type Error = ErrorKind;
    }

    impl I2c for MockIcm {
        async fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if self.fail || address != 0x69 {
                return Err(ErrorKind::Other);
            }
            let mut pointer = 0usize;
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(bytes) => {
                        pointer = bytes[0] as usize;
                        for &value in &bytes[1..] {
                            if pointer == REG_BANK_SEL as usize {
                                self.bank = (value >> 4) as usize;
                            } else {
                                self.banks[self.bank][pointer] = value;
                            }
                            self.writes.push((self.bank, pointer as u8, value));
                            pointer += 1;
                        }
                    }
                    Operation::Read(buffer) => {
                        for byte in buffer.iter_mut() {
                            *byte = self.banks[self.bank][pointer];
                            pointer += 1;
                        }
                    }
                }
            }
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    #[test]
    fn test_init_configures_ranges_in_bank_2() {
        let mut imu = Icm20948::new(MockIcm::new(WHO_AM_I_VALUE), 0x69);
        let status = block_on(imu.init(&mut NoDelay, 3)).unwrap();
        assert_eq!(status, ImuStatus::Verified);

        let bus = imu.release();
        let config_writes: Vec<_> = bus
            .writes
            .iter()
            .filter(|(_, reg, _)| *reg != REG_BANK_SEL)
            .copied()
            .collect();
        assert_eq!(
            config_writes,
            [
                (0usize, PWR_MGMT_1, PWR_MGMT_1_DEVICE_RESET),
                (0, PWR_MGMT_1, PWR_MGMT_1_CLKSEL_AUTO),
                (0, PWR_MGMT_2, PWR_MGMT_2_ENABLE_ALL),
                (0, LP_CONFIG, LP_CONFIG_DUTY_CYCLE_OFF),
                (2, ACCEL_CONFIG, ACCEL_CONFIG_2G),
                (2, GYRO_CONFIG_1, GYRO_CONFIG_1_250DPS),
            ]
        );
        // Left in bank 0 for sampling
        assert_eq!(bus.bank, 0);
    }

    #[test]
    fn test_identity_mismatch_leaves_device_unconfigured() {
        let mut imu = Icm20948::new(MockIcm::new(0x71), 0x69);
        let status = block_on(imu.init(&mut NoDelay, 3)).unwrap();
        assert_eq!(status, ImuStatus::Unverified { who_am_i: 0x71 });
        assert!(!status.is_verified());

        let bus = imu.release();
        assert!(bus.writes.iter().all(|(_, reg, _)| *reg == REG_BANK_SEL));
    }

    #[test]
    fn test_bus_failure_is_reported() {
        let mut bus = MockIcm::new(WHO_AM_I_VALUE);
        bus.fail = true;
        let mut imu = Icm20948::new(bus, 0x69);
        assert_eq!(
            block_on(imu.init(&mut NoDelay, 1)),
            Err(ImuError::Bus(ErrorKind::Other))
        );
    }

    #[test]
    fn test_read_sample_decodes_burst() {
        let mut bus = MockIcm::new(WHO_AM_I_VALUE);
        let burst = [0x20, 0x00, 0x00, 0x00, 0xE0, 0x00, 0x01, 0x06, 0x00, 0x00, 0xFE, 0xFA];
        bus.banks[0][ACCEL_XOUT_H as usize..ACCEL_XOUT_H as usize + 12].copy_from_slice(&burst);

        let mut imu = Icm20948::new(bus, 0x69);
        let sample = block_on(imu.read_sample()).unwrap();
        assert_eq!(sample.accel, [0.5, 0.0, -0.5]);
        assert_eq!(sample.gyro, [2.0, 0.0, -2.0]);
    }
}
