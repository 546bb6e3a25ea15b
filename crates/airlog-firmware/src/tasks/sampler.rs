use airlog_core::lifecycle::StateCell;
use airlog_core::scheduler::SampleClock;
use airlog_core::sensors::StampedSample;
use airlog_core::signals::PipelineSignals;
use embassy_time::{Instant, Timer};
use log::{info, warn};

use crate::board::Imu;

/// Periodic IMU sampler.
///
/// Sleeps until the next absolute target, reads one burst and stamps it
/// with that target. Runs until collection ends.
#[embassy_executor::task]
pub async fn imu_sampler(
    mut imu: Imu,
    mut clock: SampleClock,
    state: &'static StateCell,
    signals: &'static PipelineSignals,
) {
    info!(
        "Sampler running, period {} us, first target {} us",
        clock.period_us(),
        clock.next_target()
    );
    let mut read_failures: u32 = 0;

    while state.is_collecting() {
        Timer::at(Instant::from_micros(clock.next_target())).await;
        let target_us = clock.advance();
        if !state.is_collecting() {
            break;
        }

        match imu.read_sample().await {
            Ok(sample) => {
                signals.offer_sample(StampedSample { target_us, sample });
            }
            Err(e) => {
                read_failures += 1;
                if read_failures % 100 == 1 {
                    warn!("IMU read failed ({} so far): {}", read_failures, e);
                }
            }
        }
    }

    info!(
        "Sampler stopped after {} ticks, {} read failures",
        clock.ticks(),
        read_failures
    );
}
