//! Sensor drivers and the sample types they produce
//!
//! Both drivers are generic over the `embedded-hal-async` / `embedded-io-async`
//! traits so they run unchanged against the ESP32-S3 peripherals and the
//! mock buses used in tests.

pub mod co2;
pub mod icm20948;

pub use co2::{Co2Error, Co2Sensor, parse_ppm};
pub use icm20948::{Icm20948, ImuError, ImuStatus};

/// Accelerometer sensitivity at ±2 g full scale (LSB per g)
pub const ACCEL_LSB_PER_G: f32 = 16384.0;

/// Gyroscope sensitivity at ±250 °/s full scale (LSB per °/s)
pub const GYRO_LSB_PER_DPS: f32 = 131.0;

/// One inertial sample in physical units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuSample {
    /// Acceleration in g
    pub accel: [f32; 3],
    /// Angular rate in °/s
    pub gyro: [f32; 3],
}

impl ImuSample {
    /// Decode the 12-byte burst starting at `ACCEL_XOUT_H`: six big-endian
    /// signed words in the order ax, ay, az, gx, gy, gz.
    pub fn from_be_bytes(raw: &[u8; 12]) -> Self {
        let word = |i: usize| i16::from_be_bytes([raw[2 * i], raw[2 * i + 1]]) as f32;
        Self {
            accel: [
                word(0) / ACCEL_LSB_PER_G,
                word(1) / ACCEL_LSB_PER_G,
                word(2) / ACCEL_LSB_PER_G,
            ],
            gyro: [
                word(3) / GYRO_LSB_PER_DPS,
                word(4) / GYRO_LSB_PER_DPS,
                word(5) / GYRO_LSB_PER_DPS,
            ],
        }
    }
}

/// An IMU sample stamped with the alarm target it was taken for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StampedSample {
    pub target_us: u64,
    pub sample: ImuSample,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_decoding_and_scaling() {
        let raw = [
            0x40, 0x00, // ax = 16384 -> 1 g
            0xC0, 0x00, // ay = -16384 -> -1 g
            0x00, 0x00, // az = 0
            0x00, 0x83, // gx = 131 -> 1 dps
            0xFF, 0x7D, // gy = -131 -> -1 dps
            0x7F, 0xFF, // gz = 32767
        ];
        let sample = ImuSample::from_be_bytes(&raw);
        assert_eq!(sample.accel, [1.0, -1.0, 0.0]);
        assert_eq!(sample.gyro[0], 1.0);
        assert_eq!(sample.gyro[1], -1.0);
        assert!((sample.gyro[2] - 250.129_77).abs() < 1e-3);
    }
}
