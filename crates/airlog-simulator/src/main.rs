//! Host simulator for the airlog data logger.
//!
//! Runs the `airlog_core` pipeline on two threads, one per ESP32-S3 core:
//! the main thread samples a synthetic IMU on the drift-free clock and
//! merges a synthetic CO₂ reading, a writer thread drains full buffers into
//! a directory that stands in for the SD card. Time is virtual unless
//! `--realtime` is given, so a long run finishes in well under a second.
//!
//! ```bash
//! RUST_LOG=info airlog-simulator --seconds 30 --output sd
//! ```

mod volume;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use airlog_core::LoggerError;
use airlog_core::buffer::DoubleBuffer;
use airlog_core::co2_cache::Co2Cache;
use airlog_core::config::{BUFFER_LINES, LoggerConfig};
use airlog_core::debounce::Debouncer;
use airlog_core::lifecycle::{CollectionState, Lifecycle, StateCell};
use airlog_core::pipeline::{Collector, DrainDeadline, DrainWait, Recorded};
use airlog_core::record::SampleRecord;
use airlog_core::scheduler::SampleClock;
use airlog_core::sensors::{ImuSample, StampedSample};
use airlog_core::storage::{LineSink, LogFile, LogVolume};
use airlog_core::writer::StorageWriter;
use anyhow::{Result, anyhow, bail};
use clap::Parser;
use log::{debug, error, info, warn};

use crate::volume::DirVolume;

static BUFFERS: DoubleBuffer<BUFFER_LINES> = DoubleBuffer::new();
static STATE: StateCell = StateCell::new();
static CO2_CACHE: Co2Cache = Co2Cache::new();
static COLLECTION_DONE: AtomicBool = AtomicBool::new(false);

/// Contact bounce after the simulated stop press, relative to the press
const STOP_BOUNCE_US: [u64; 4] = [0, 4_000, 12_000, 35_000];

#[derive(Parser)]
#[command(name = "airlog-simulator")]
#[command(about = "Run the airlog pipeline against synthetic sensors", long_about = None)]
struct Cli {
    /// Seconds of collection before the stop button is pressed
    #[arg(long, default_value_t = 10)]
    seconds: u64,

    /// Directory used as the SD card root
    #[arg(long, default_value = "sd")]
    output: PathBuf,

    /// Mount attempts that fail before the card shows up
    #[arg(long, default_value_t = 3)]
    absent_mounts: u32,

    /// Pace sampling at wall-clock speed
    #[arg(long)]
    realtime: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = LoggerConfig::DEFAULT;
    config.validate().map_err(core_error)?;

    let path = run(&cli, &config)?;
    summarize(&path, &config)
}

/// One collection run from bring-up to the final flush. Returns the path of
/// the log file that was written.
fn run(cli: &Cli, config: &LoggerConfig) -> Result<PathBuf> {
    let mut lifecycle = Lifecycle::new(&STATE, config.mount_retry_limit);
    lifecycle.peripherals_ready().map_err(core_error)?;

    let mut volume = DirVolume::new(&cli.output, cli.absent_mounts);
    loop {
        let mounted = match volume.mount() {
            Ok(()) => true,
            Err(e) => {
                debug!("Mount failed: {}", e);
                false
            }
        };
        match lifecycle.mount_attempt(mounted).map_err(core_error)? {
            CollectionState::WaitingForStart => break,
            CollectionState::Faulted => bail!(
                "no card after {} mount attempts",
                lifecycle.mount_attempts()
            ),
            _ => thread::sleep(to_std(config.mount_retry_interval)),
        }
    }

    let root = volume.root().to_path_buf();
    let file = LogFile::create(volume).map_err(|e| anyhow!("cannot create log file: {e}"))?;
    let path = root.join(file.name());
    info!("Logging to {}", path.display());
    let log = Mutex::new(file);

    // The start input is asserted as soon as the simulator asks for it
    let started_at_us = 0;
    lifecycle.start_observed(started_at_us).map_err(core_error)?;

    let (producer, drainer) = BUFFERS.split().map_err(core_error)?;
    let mut collector = Collector::new(producer, config.co2_merge_cadence, started_at_us);

    thread::scope(|s| {
        s.spawn(|| writer_thread(StorageWriter::new(drainer), &log, config));

        sample_until_stopped(&mut collector, cli, config);
        let stopped = stop(&mut lifecycle, &mut collector, &log, config);
        // The writer exits only after this is set, even when stopping failed
        COLLECTION_DONE.store(true, Ordering::Release);
        stopped
    })?;

    lifecycle.flushed().map_err(core_error)?;
    info!(
        "Collection stopped: {} samples, {} dropped, {} buffers filled",
        collector.recorded(),
        collector.dropped(),
        collector.fills()
    );
    Ok(path)
}

/// Stop sequence: wait for the writer to catch up, then flush the partial
/// buffer and close the file.
fn stop<V: LogVolume>(
    lifecycle: &mut Lifecycle<'_>,
    collector: &mut Collector<'_, BUFFER_LINES>,
    log: &Mutex<LogFile<V>>,
    config: &LoggerConfig,
) -> Result<()> {
    lifecycle.stop_requested().map_err(core_error)?;

    let wall_start = std::time::Instant::now();
    let deadline = DrainDeadline::new(0, config.stop_drain_timeout);
    while deadline.check(collector, elapsed_us(wall_start)) == DrainWait::Pending {
        thread::sleep(to_std(config.writer_poll_interval));
    }

    let mut file = log.lock().map_err(|_| anyhow!("log file lock poisoned"))?;
    if let Err(e) = collector.finish(&mut *file) {
        error!("Final flush failed: {}", e);
    }
    file.close().map_err(|e| anyhow!("closing the log file failed: {e}"))
}

/// Sampler, CO₂ poller and stop button, interleaved on virtual time.
fn sample_until_stopped(
    collector: &mut Collector<'_, BUFFER_LINES>,
    cli: &Cli,
    config: &LoggerConfig,
) {
    let mut clock = SampleClock::new(collector.started_at_us(), config.sample_period);
    let co2_period_us = config.co2_poll_period.as_micros();
    let mut next_co2_us = collector.started_at_us() + co2_period_us;
    let press_at_us = collector.started_at_us() + cli.seconds * 1_000_000;
    let mut bounces = STOP_BOUNCE_US.iter().map(|offset| press_at_us + offset).peekable();
    let mut debouncer = Debouncer::new(config.debounce_window);
    let wall_start = std::time::Instant::now();

    while STATE.is_collecting() {
        let target_us = clock.advance();

        while next_co2_us <= target_us {
            CO2_CACHE.store(synthetic_co2(next_co2_us));
            next_co2_us += co2_period_us;
        }

        while let Some(edge_us) = bounces.next_if(|&edge| edge <= target_us) {
            if debouncer.on_edge(edge_us) {
                info!("Stop pressed at {} ms", edge_us / 1000);
                return;
            }
            debug!("Bounce at {} us ignored", edge_us);
        }

        if cli.realtime {
            let due = std::time::Duration::from_micros(target_us);
            if let Some(wait) = due.checked_sub(wall_start.elapsed()) {
                thread::sleep(wait);
            }
        }

        let stamped = StampedSample {
            target_us,
            sample: synthetic_imu(target_us),
        };
        match collector.record(&stamped, &CO2_CACHE) {
            Ok(Recorded::Filled { index, .. }) => debug!("Buffer {} ready", index),
            Ok(_) => {}
            Err(e) => error!("Sample at {} us not recorded: {}", target_us, e),
        }
    }
}

fn writer_thread<S: LineSink>(
    mut writer: StorageWriter<'_, BUFFER_LINES>,
    log: &Mutex<S>,
    config: &LoggerConfig,
) {
    loop {
        // Read before servicing so the last buffer is never missed
        let done = COLLECTION_DONE.load(Ordering::Acquire);
        let report = match log.lock() {
            Ok(mut sink) => writer.service(&mut *sink),
            Err(_) => {
                error!("Log file lock poisoned, writer exiting");
                return;
            }
        };
        match report {
            Ok(report) if !report.is_empty() => {
                debug!("Drained {} buffers, {} lines", report.buffers, report.lines);
                continue;
            }
            Ok(_) => {}
            Err(e) => warn!("Drain failed, retrying: {:?}", e),
        }
        if done {
            break;
        }
        thread::sleep(to_std(config.writer_poll_interval));
    }
    info!(
        "Writer finished: {} lines in {} buffers, {} failed drains",
        writer.lines_written(),
        writer.buffers_drained(),
        writer.failures()
    );
}

/// Read the log back and check what a reviewer of the file would check.
fn summarize(path: &Path, config: &LoggerConfig) -> Result<()> {
    let contents = fs::read_to_string(path)?;
    let mut lines = contents.lines();
    let header = lines.next().unwrap_or_default();

    let mut rows = 0u64;
    let mut co2_rows = 0u64;
    let mut gaps = 0u64;
    let mut last_ms: Option<u64> = None;
    let period_ms = config.sample_period.as_millis();

    for (n, line) in lines.enumerate() {
        let record =
            SampleRecord::parse_line(line).map_err(|e| anyhow!("line {}: {e}", n + 2))?;
        if let Some(last) = last_ms {
            if record.elapsed_ms <= last {
                bail!("line {}: time went backwards", n + 2);
            }
            if record.elapsed_ms - last != period_ms {
                gaps += 1;
            }
        }
        last_ms = Some(record.elapsed_ms);
        rows += 1;
        co2_rows += u64::from(record.co2_ppm.is_some());
    }

    info!(
        "{}: header {:?}, {} rows, {} with CO2, {} gaps, last at {} ms",
        path.display(),
        header,
        rows,
        co2_rows,
        gaps,
        last_ms.unwrap_or(0)
    );
    Ok(())
}

/// Upright board with a slow sway and a little rotation.
fn synthetic_imu(target_us: u64) -> ImuSample {
    let t = target_us as f32 / 1_000_000.0;
    ImuSample {
        accel: [0.05 * (t * 0.7).sin(), 0.05 * (t * 0.5).cos(), 1.0],
        gyro: [2.0 * (t * 0.3).sin(), 0.0, 1.5 * (t * 0.9).cos()],
    }
}

/// CO₂ between roughly 380 and 520 ppm over a two-minute cycle.
fn synthetic_co2(at_us: u64) -> u32 {
    let t = at_us as f64 / 1_000_000.0;
    (450.0 + 70.0 * (t / 19.0).sin()) as u32
}

fn core_error(e: impl Into<LoggerError>) -> anyhow::Error {
    anyhow!("{}", e.into())
}

fn elapsed_us(since: std::time::Instant) -> u64 {
    u64::try_from(since.elapsed().as_micros()).unwrap_or(u64::MAX)
}

fn to_std(duration: embassy_time::Duration) -> std::time::Duration {
    std::time::Duration::from_micros(duration.as_micros())
}
