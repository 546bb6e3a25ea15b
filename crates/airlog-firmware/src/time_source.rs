//! FAT timestamps without a real-time clock
//!
//! The logger has no RTC, so file times are uptime on top of a fixed epoch.
//! They only need to order the files of one session.

use embassy_time::Instant;
use embedded_sdmmc::{TimeSource, Timestamp};

const EPOCH_YEAR: u16 = 2026;
const SECS_PER_DAY: u64 = 86_400;

pub struct UptimeTimeSource;

impl TimeSource for UptimeTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        let uptime = Instant::now().as_secs();
        let days = uptime / SECS_PER_DAY;
        let secs = uptime % SECS_PER_DAY;

        // Every month has at least 28 days
        let month = 1 + ((days / 28) % 12) as u8;
        let day = 1 + (days % 28) as u8;

        Timestamp {
            year_since_1970: (EPOCH_YEAR - 1970) as u8,
            zero_indexed_month: month - 1,
            zero_indexed_day: day - 1,
            hours: (secs / 3600) as u8,
            minutes: ((secs % 3600) / 60) as u8,
            seconds: (secs % 60) as u8,
        }
    }
}
