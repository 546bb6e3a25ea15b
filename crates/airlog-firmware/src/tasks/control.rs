//! Control loop
//!
//! Drives the lifecycle from bring-up to the final flush: sensor init,
//! storage mount with retry, log file creation, start input, collection
//! and the stop sequence. Runs on the thread-mode executor of core 0.

use airlog_core::LoggerError;
use airlog_core::buffer::Producer;
use airlog_core::co2_cache::Co2Cache;
use airlog_core::config::{BUFFER_LINES, LoggerConfig};
use airlog_core::debounce::Debouncer;
use airlog_core::lifecycle::{CollectionState, Lifecycle, StateCell};
use airlog_core::pipeline::{Collector, DrainDeadline, DrainWait, Recorded};
use airlog_core::scheduler::SampleClock;
use airlog_core::signals::PipelineSignals;
use airlog_core::sensors::StampedSample;
use airlog_core::storage::{LogFile, LogVolume};
use embassy_executor::{SendSpawner, Spawner};
use embassy_futures::select::{Either, select};
use embassy_time::{Delay, Instant, Timer};
use log::{debug, error, info, warn};

use super::{co2_poller, imu_sampler, stop_button};
use crate::board::{Board, Leds, SharedLog};
use crate::error::FirmwareError;

/// Statics shared with the other tasks.
#[derive(Clone, Copy)]
pub struct Shared {
    pub state: &'static StateCell,
    pub signals: &'static PipelineSignals,
    pub co2_cache: &'static Co2Cache,
    pub log_file: &'static SharedLog,
}

pub struct Spawners {
    /// Thread-mode executor of core 0
    pub thread: Spawner,
    /// High-priority interrupt executor of core 0
    pub interrupt: SendSpawner,
}

pub async fn run(
    board: Board,
    producer: Producer<'static, BUFFER_LINES>,
    shared: Shared,
    spawners: Spawners,
    config: LoggerConfig,
) -> Result<(), FirmwareError> {
    let Board {
        mut imu,
        mut co2,
        mut volume,
        mut leds,
        start,
        stop,
    } = board;
    let mut lifecycle = Lifecycle::new(shared.state, config.mount_retry_limit);

    // Sensors
    let settle_ms = config.co2_init_settle_ms();
    let imu_status = match imu.init(&mut Delay, config.imu_identity_attempts).await {
        Ok(status) => status,
        Err(e) => {
            error!("IMU initialization failed: {}", e);
            return Err(fail(&mut lifecycle, &mut leds, e.into()));
        }
    };
    if !imu_status.is_verified() {
        warn!("Continuing with an unverified IMU, samples are suspect");
    }
    if let Err(e) = co2.init(&mut Delay, settle_ms).await {
        warn!("CO2 sensor initialization failed, CO2 column will stay empty: {}", e);
    }

    spawners.interrupt.spawn(stop_button(
        stop,
        Debouncer::new(config.debounce_window),
        shared.state,
        shared.signals,
    )?);
    lifecycle.peripherals_ready()?;

    // Storage
    loop {
        let mounted = match volume.mount() {
            Ok(()) => true,
            Err(e) => {
                debug!("Mount failed: {:?}", e);
                false
            }
        };
        leds.toggle_storage();
        match lifecycle.mount_attempt(mounted)? {
            CollectionState::WaitingForStart => break,
            CollectionState::Faulted => {
                leds.show_fault();
                return Err(FirmwareError::MountGaveUp(lifecycle.mount_attempts()));
            }
            _ => Timer::after(config.mount_retry_interval).await,
        }
    }

    let file = match LogFile::create(volume) {
        Ok(file) => file,
        Err(e) => {
            error!("Cannot open log file: {}", e);
            return Err(fail(&mut lifecycle, &mut leds, e.into()));
        }
    };
    *shared.log_file.lock().await = Some(file);

    // Start
    leds.all_on();
    info!("Waiting for start input");
    while start.is_high() {
        Timer::after(config.start_poll_interval).await;
    }
    leds.all_off();

    let started_at_us = Instant::now().as_micros();
    lifecycle.start_observed(started_at_us)?;
    let mut collector = Collector::new(producer, config.co2_merge_cadence, started_at_us);

    spawners.interrupt.spawn(imu_sampler(
        imu,
        SampleClock::new(started_at_us, config.sample_period),
        shared.state,
        shared.signals,
    )?);
    spawners.thread.spawn(co2_poller(
        co2,
        shared.co2_cache,
        shared.state,
        config.co2_poll_period,
    )?);
    info!("Collection started");

    // Collect
    loop {
        match select(shared.signals.samples.receive(), shared.signals.stop.wait()).await {
            Either::First(sample) => record(&mut collector, &mut leds, &shared, &sample),
            Either::Second(()) => break,
        }
    }

    // Stop
    lifecycle.stop_requested()?;
    while let Ok(sample) = shared.signals.samples.try_receive() {
        record(&mut collector, &mut leds, &shared, &sample);
    }
    let deadline = DrainDeadline::new(Instant::now().as_micros(), config.stop_drain_timeout);
    while deadline.check(&collector, Instant::now().as_micros()) == DrainWait::Pending {
        select(
            shared.signals.buffer_drained.wait(),
            Timer::after(config.writer_poll_interval),
        )
        .await;
    }

    {
        let mut guard = shared.log_file.lock().await;
        if let Some(file) = guard.as_mut() {
            if let Err(e) = collector.finish(file) {
                error!("Final flush failed: {}", e);
            }
            if let Err(e) = file.close() {
                error!("Closing the log file failed: {}", e);
            }
        }
    }

    lifecycle.flushed()?;
    leds.all_off();
    info!(
        "Collection stopped: {} samples, {} dropped, {} lost in queue",
        collector.recorded(),
        collector.dropped(),
        shared.signals.sample_overflows()
    );
    Ok(())
}

fn record(
    collector: &mut Collector<'static, BUFFER_LINES>,
    leds: &mut Leds,
    shared: &Shared,
    sample: &StampedSample,
) {
    match collector.record(sample, shared.co2_cache) {
        Ok(outcome) => {
            leds.on_recorded(&outcome);
            if let Recorded::Filled { index, .. } = outcome {
                shared.signals.buffer_ready.signal(index);
            }
        }
        Err(e) => error!("Sample at {} us not recorded: {}", sample.target_us, e),
    }
}

/// Fatal setup failure: fault the lifecycle and show it.
fn fail(lifecycle: &mut Lifecycle<'_>, leds: &mut Leds, e: LoggerError) -> FirmwareError {
    if lifecycle.fault().is_err() {
        warn!("Fault raised in terminal state {:?}", lifecycle.state());
    }
    leds.show_fault();
    e.into()
}
