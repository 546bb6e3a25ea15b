//! Hardware-independent core library for airlog
//!
//! This crate contains the acquisition-and-logging pipeline of the airlog
//! data logger: the drift-free sample clock, the CO₂ cache and protocol,
//! the stop-button debouncer, the cross-core double buffer, record
//! formatting, the collection lifecycle, the storage writer and the
//! signals that tie the tasks together. Sensor drivers are generic over
//! `embedded-hal-async` / `embedded-io-async`.
//!
//! It is `#![no_std]` so it compiles on both the ESP32-S3 target and
//! desktop hosts (for the simulator and tests).

#![no_std]

#[cfg(test)]
extern crate std;

pub mod buffer;
pub mod co2_cache;
pub mod config;
pub mod debounce;
pub mod error;
pub mod indicators;
pub mod lifecycle;
pub mod pipeline;
pub mod record;
pub mod scheduler;
pub mod sensors;
pub mod signals;
pub mod storage;
pub mod writer;

pub use error::LoggerError;
