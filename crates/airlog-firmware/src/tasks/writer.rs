use airlog_core::config::BUFFER_LINES;
use airlog_core::signals::PipelineSignals;
use airlog_core::writer::StorageWriter;
use embassy_futures::select::select;
use embassy_time::{Duration, Timer};
use log::info;

use crate::board::SharedLog;

/// Storage writer on the second core.
///
/// Woken by a ready buffer, with a fallback poll in case a wake-up is
/// missed. Runs forever; once the producer is closed nothing is ever ready
/// again and the task just idles.
#[embassy_executor::task]
pub async fn storage_writer(
    mut writer: StorageWriter<'static, BUFFER_LINES>,
    log_file: &'static SharedLog,
    signals: &'static PipelineSignals,
    poll_interval: Duration,
) {
    info!("Storage writer running");

    loop {
        select(signals.buffer_ready.wait(), Timer::after(poll_interval)).await;

        let mut guard = log_file.lock().await;
        let Some(file) = guard.as_mut() else {
            continue;
        };
        // Failures are logged by the writer and retried on the next pass
        if let Ok(report) = writer.service(file) {
            if !report.is_empty() {
                signals.buffer_drained.signal(());
            }
        }
    }
}
