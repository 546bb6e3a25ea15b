//! CO₂ sensor over an ASCII serial protocol
//!
//! Commands are short ASCII lines terminated by `\r\n`:
//!
//! | Command | Meaning                        | When          |
//! |---------|--------------------------------|---------------|
//! | `K 2`   | polling mode (no streaming)    | once at init  |
//! | `.`     | report the ppm multiplier      | once at init  |
//! | `z`     | report the current reading     | every poll    |
//!
//! Replies look like ` z 00412\r\n`: the command letter, the value, then
//! a line ending. Only the decimal digits of the value are kept.
//! A poll never waits for its reply. Whatever bytes are already buffered are
//! collected, and a reading is taken only once its line ending has arrived;
//! a reply split across polls is completed by a later one.

use embedded_hal_async::delay::DelayNs;
use embedded_io::{Error as _, ErrorKind, ReadReady};
use embedded_io_async::{Read, Write};
use log::{debug, info};
use thiserror_no_std::Error;

pub const CMD_POLLING_MODE: &[u8] = b"K 2\r\n";
pub const CMD_MULTIPLIER: &[u8] = b".\r\n";
pub const CMD_READ_CO2: &[u8] = b"z\r\n";

/// Largest chunk consumed by one read
pub const POLL_REPLY_LEN: usize = 10;

/// Bytes kept while a reply waits for its line ending
const PENDING_CAPACITY: usize = 32;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Co2Error {
    #[error("UART write failed: {0:?}")]
    Write(ErrorKind),
    #[error("UART read failed: {0:?}")]
    Read(ErrorKind),
}

/// Extract the decimal digits of a reply and parse them as ppm.
///
/// Non-digit bytes are skipped. Returns `None` when the reply holds no
/// digit or the value does not fit below `u32::MAX`.
pub fn parse_ppm(reply: &[u8]) -> Option<u32> {
    let mut value: Option<u32> = None;
    for digit in reply.iter().filter(|b| b.is_ascii_digit()) {
        let next = value
            .unwrap_or(0)
            .checked_mul(10)?
            .checked_add(u32::from(digit - b'0'))?;
        value = Some(next);
    }
    value.filter(|&ppm| ppm != u32::MAX)
}

pub struct Co2Sensor<U> {
    uart: U,
    /// Received bytes not yet terminated by `\n`
    pending: heapless::Vec<u8, PENDING_CAPACITY>,
}

impl<U> Co2Sensor<U>
where
    U: Read + Write + ReadReady,
{
    pub const fn new(uart: U) -> Self {
        Self {
            uart,
            pending: heapless::Vec::new(),
        }
    }

    pub fn release(self) -> U {
        self.uart
    }

    /// Put the sensor in polling mode and query its multiplier.
    ///
    /// Each command is followed by `settle_ms` of silence; its reply is used
    /// only if it arrived complete in that time. Returns the multiplier when
    /// the sensor reported one.
    pub async fn init<D: DelayNs>(
        &mut self,
        delay: &mut D,
        settle_ms: u32,
    ) -> Result<Option<u32>, Co2Error> {
        info!("Initializing CO2 sensor");

        self.send(CMD_POLLING_MODE).await?;
        delay.delay_ms(settle_ms).await;
        self.collect().await?;
        if let Some(mode) = self.take_reply(b'K') {
            debug!("CO2 mode reply: {}", mode);
        }

        self.send(CMD_MULTIPLIER).await?;
        delay.delay_ms(settle_ms).await;
        self.collect().await?;
        let multiplier = self.take_reply(b'.');

        match multiplier {
            Some(m) => info!("CO2 sensor ready, multiplier {}", m),
            None => info!("CO2 sensor ready, no multiplier reported"),
        }
        Ok(multiplier)
    }

    /// Request a reading and consume whatever reply is already buffered.
    ///
    /// `Ok(None)` means no complete reading was available this tick.
    pub async fn poll(&mut self) -> Result<Option<u32>, Co2Error> {
        self.send(CMD_READ_CO2).await?;
        self.collect().await?;
        Ok(self.take_reply(b'z'))
    }

    async fn send(&mut self, command: &[u8]) -> Result<(), Co2Error> {
        self.uart
            .write_all(command)
            .await
            .map_err(|e| Co2Error::Write(e.kind()))?;
        self.uart
            .flush()
            .await
            .map_err(|e| Co2Error::Write(e.kind()))
    }

    /// Append at most one bounded read of already buffered bytes.
    async fn collect(&mut self) -> Result<(), Co2Error> {
        if self.pending.is_full() {
            debug!("Dropping {} CO2 bytes without line ending", self.pending.len());
            self.pending.clear();
        }
        let room = (PENDING_CAPACITY - self.pending.len()).min(POLL_REPLY_LEN);

        let ready = self
            .uart
            .read_ready()
            .map_err(|e| Co2Error::Read(e.kind()))?;
        if !ready {
            return Ok(());
        }
        let mut chunk = [0u8; POLL_REPLY_LEN];
        let n = self
            .uart
            .read(&mut chunk[..room])
            .await
            .map_err(|e| Co2Error::Read(e.kind()))?;
        // `room` never exceeds the free capacity
        let _ = self.pending.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// Consume every complete line and return the value of the newest one
    /// tagged with `tag` (either case). Other lines are discarded.
    fn take_reply(&mut self, tag: u8) -> Option<u32> {
        let mut latest = None;
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line = &self.pending[..end];
            if line.iter().any(|b| b.eq_ignore_ascii_case(&tag)) {
                if let Some(value) = parse_ppm(line) {
                    latest = Some(value);
                }
            } else {
                debug!("Ignoring CO2 line without '{}'", char::from(tag));
            }
            let rest = self.pending.len() - (end + 1);
            self.pending.copy_within(end + 1.., 0);
            self.pending.truncate(rest);
        }
        latest
    }
}
