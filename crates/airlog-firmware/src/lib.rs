//! ESP32-S3 firmware modules for airlog
//!
//! This crate contains the code that only compiles for the device: board
//! wiring, the uptime-based FAT time source and the embassy tasks that run
//! the `airlog_core` pipeline on both cores.

#![no_std]

pub mod board;
pub mod error;
pub mod tasks;
pub mod time_source;
