use airlog_core::debounce::Debouncer;
use airlog_core::lifecycle::StateCell;
use airlog_core::signals::PipelineSignals;
use embassy_time::Instant;
use esp_hal::gpio::Input;
use log::{debug, info};

/// Stop button: falling edges through the debouncer.
///
/// The first accepted press while collecting raises the stop signal and
/// ends the task. Presses outside collection are ignored.
#[embassy_executor::task]
pub async fn stop_button(
    mut button: Input<'static>,
    mut debouncer: Debouncer,
    state: &'static StateCell,
    signals: &'static PipelineSignals,
) {
    loop {
        button.wait_for_falling_edge().await;
        let now_us = Instant::now().as_micros();

        if !debouncer.on_edge(now_us) {
            continue;
        }
        if state.is_collecting() {
            info!("Stop button pressed");
            signals.stop.signal(());
            return;
        }
        debug!("Stop button ignored in state {:?}", state.load());
    }
}
