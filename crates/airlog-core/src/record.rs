//! Sample records and the CSV line format
//!
//! One record per sampler tick:
//!
//! ```text
//! Time(ms),Acc_x,Acc_y,Acc_z,Gyro_x,Gyro_y,Gyro_z,CO2
//! 1250,0.012,-0.998,0.031,0.153,-1.069,0.458,0
//! 1260,0.011,-0.997,0.030,0.229,-1.145,0.382,417
//! ```
//!
//! Floats carry three decimals. A CO₂ field of `0` means no reading was
//! merged into that record.

use core::fmt::Write;
use core::str::FromStr;

use thiserror_no_std::Error;

use crate::co2_cache::Co2Cache;
use crate::config::LINE_LEN;
use crate::sensors::ImuSample;

/// One formatted CSV line, newline included.
pub type Line = heapless::String<LINE_LEN>;

const FIELD_COUNT: usize = 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    #[error("formatted record exceeds {LINE_LEN} bytes")]
    LineTooLong,
    #[error("expected {FIELD_COUNT} fields, found {0}")]
    FieldCount(usize),
    #[error("field {0} is not a valid number")]
    InvalidField(usize),
}

/// One logical measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRecord {
    /// Milliseconds since collection start, taken from the alarm target
    pub elapsed_ms: u64,
    /// Acceleration in g (x, y, z)
    pub accel: [f32; 3],
    /// Angular rate in °/s (x, y, z)
    pub gyro: [f32; 3],
    /// CO₂ concentration in ppm, when one was merged into this record
    pub co2_ppm: Option<u32>,
}

impl SampleRecord {
    pub fn new(elapsed_ms: u64, sample: &ImuSample, co2_ppm: Option<u32>) -> Self {
        Self {
            elapsed_ms,
            accel: sample.accel,
            gyro: sample.gyro,
            co2_ppm,
        }
    }

    /// Render the record as one CSV line.
    pub fn to_line(&self) -> Result<Line, RecordError> {
        let mut line = Line::new();
        let [ax, ay, az] = self.accel;
        let [gx, gy, gz] = self.gyro;
        writeln!(
            line,
            "{},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3},{}",
            self.elapsed_ms,
            ax,
            ay,
            az,
            gx,
            gy,
            gz,
            self.co2_ppm.unwrap_or(0)
        )
        .map_err(|_| RecordError::LineTooLong)?;
        Ok(line)
    }

    /// Parse a CSV line produced by [`SampleRecord::to_line`].
    pub fn parse_line(line: &str) -> Result<Self, RecordError> {
        let line = line.trim_end_matches(['\r', '\n']);

        let mut fields: heapless::Vec<&str, FIELD_COUNT> = heapless::Vec::new();
        for field in line.split(',') {
            fields
                .push(field.trim())
                .map_err(|_| RecordError::FieldCount(line.split(',').count()))?;
        }
        if fields.len() != FIELD_COUNT {
            return Err(RecordError::FieldCount(fields.len()));
        }

        let elapsed_ms = parse_field::<u64>(&fields, 0)?;
        let mut axes = [0f32; 6];
        for (i, axis) in axes.iter_mut().enumerate() {
            *axis = parse_field::<f32>(&fields, i + 1)?;
        }
        let co2 = parse_field::<u32>(&fields, 7)?;

        Ok(Self {
            elapsed_ms,
            accel: [axes[0], axes[1], axes[2]],
            gyro: [axes[3], axes[4], axes[5]],
            co2_ppm: (co2 != 0).then_some(co2),
        })
    }
}

fn parse_field<T: FromStr>(fields: &[&str], index: usize) -> Result<T, RecordError> {
    fields[index]
        .parse::<T>()
        .map_err(|_| RecordError::InvalidField(index))
}

/// Output of one formatting step.
#[derive(Debug, Clone)]
pub struct Formatted {
    pub line: Line,
    pub record: SampleRecord,
    /// Running sample number this record was formatted as (starts at 1)
    pub sequence: u64,
    /// Whether a cached CO₂ value was consumed into this record
    pub co2_merged: bool,
}

/// Merges IMU samples with the cached CO₂ value on a fixed cadence.
///
/// The running counter is incremented before the cadence check, so with a
/// cadence of 5 the 5th, 10th, 15th... records are merge candidates. Only a
/// candidate record takes (and clears) the cache; any other record carries
/// a CO₂ field of zero. There is never a wait for a fresh reading.
#[derive(Debug, Clone)]
pub struct RecordFormatter {
    counter: u64,
    cadence: u64,
}

impl RecordFormatter {
    pub const fn new(cadence: u32) -> Self {
        Self {
            counter: 0,
            cadence: if cadence == 0 { 1 } else { cadence as u64 },
        }
    }

    pub const fn count(&self) -> u64 {
        self.counter
    }

    pub fn format(
        &mut self,
        sample: &ImuSample,
        elapsed_ms: u64,
        co2: &Co2Cache,
    ) -> Result<Formatted, RecordError> {
        self.counter += 1;

        let co2_ppm = if self.counter % self.cadence == 0 {
            co2.take()
        } else {
            None
        };

        let record = SampleRecord::new(elapsed_ms, sample, co2_ppm);
        let line = record.to_line()?;

        Ok(Formatted {
            line,
            record,
            sequence: self.counter,
            co2_merged: co2_ppm.is_some(),
        })
    }
}
