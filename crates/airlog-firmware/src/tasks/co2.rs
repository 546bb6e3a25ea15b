use airlog_core::co2_cache::Co2Cache;
use airlog_core::lifecycle::StateCell;
use embassy_time::{Duration, Ticker};
use log::{debug, info, warn};

use crate::board::Co2;

/// CO₂ poller, independent of the IMU alarm.
///
/// Each tick sends a read command and caches the newest reply whose line
/// ending has already arrived; ticks without one are skipped.
#[embassy_executor::task]
pub async fn co2_poller(
    mut sensor: Co2,
    cache: &'static Co2Cache,
    state: &'static StateCell,
    period: Duration,
) {
    let mut ticker = Ticker::every(period);
    let mut readings: u32 = 0;

    loop {
        ticker.next().await;
        if !state.is_collecting() {
            break;
        }

        match sensor.poll().await {
            Ok(Some(ppm)) => {
                readings += 1;
                debug!("CO2 {} ppm", ppm);
                cache.store(ppm);
            }
            Ok(None) => {}
            Err(e) => warn!("CO2 poll failed: {}", e),
        }
    }

    info!("CO2 poller stopped after {} readings", readings);
}
