#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use airlog_core::buffer::DoubleBuffer;
use airlog_core::co2_cache::Co2Cache;
use airlog_core::config::{BUFFER_LINES, LoggerConfig};
use airlog_core::lifecycle::StateCell;
use airlog_core::signals::PipelineSignals;
use airlog_core::writer::StorageWriter;
use airlog_firmware::board::{Board, BoardPeripherals, SharedLog};
use airlog_firmware::error::FirmwareError;
use airlog_firmware::tasks::control::{self, Shared, Spawners};
use airlog_firmware::tasks::storage_writer;
use embassy_executor::Spawner;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::interrupt::Priority;
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::peripherals::Peripherals;
use esp_hal::system::Stack;
use esp_hal::timer::timg::TimerGroup;
use esp_rtos::embassy::{Executor, InterruptExecutor};
use log::{error, info};
use static_cell::StaticCell;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

const CONFIG: LoggerConfig = LoggerConfig::DEFAULT;

/// Stack of the writer core; draining only needs the SD driver's frames
const WRITER_CORE_STACK: usize = 8 * 1024;

static BUFFERS: DoubleBuffer<BUFFER_LINES> = DoubleBuffer::new();
static STATE: StateCell = StateCell::new();
static SIGNALS: PipelineSignals = PipelineSignals::new();
static CO2_CACHE: Co2Cache = Co2Cache::new();
static LOG_FILE: SharedLog = Mutex::new(None);

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    match run(spawner, peripherals).await {
        Ok(()) => info!("Logger finished, safe to power off"),
        Err(e) => error!("Logger halted: {}", e),
    }

    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}

async fn run(spawner: Spawner, peripherals: Peripherals) -> Result<(), FirmwareError> {
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);
    info!("Embassy initialized");

    // Leave time to attach a console before anything interesting is logged
    for remaining in (1..=CONFIG.console_delay.as_secs()).rev() {
        info!("Starting in {}...", remaining);
        Timer::after(Duration::from_secs(1)).await;
    }

    CONFIG.validate()?;
    let (producer, drainer) = BUFFERS.split()?;
    let sw_ints = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);

    // Core 1 runs nothing but the storage writer
    static WRITER_STACK: StaticCell<Stack<WRITER_CORE_STACK>> = StaticCell::new();
    let writer = StorageWriter::new(drainer);
    esp_rtos::start_second_core(
        peripherals.CPU_CTRL,
        sw_ints.software_interrupt0,
        sw_ints.software_interrupt1,
        WRITER_STACK.init(Stack::new()),
        move || {
            static EXECUTOR: StaticCell<Executor> = StaticCell::new();
            let executor = EXECUTOR.init(Executor::new());
            executor.run(|spawner| {
                match storage_writer(writer, &LOG_FILE, &SIGNALS, CONFIG.writer_poll_interval) {
                    Ok(token) => spawner.spawn(token),
                    Err(e) => error!("Storage writer not spawned: {:?}", e),
                }
            });
        },
    );

    // Sampler and stop button preempt everything else on core 0
    static HIGH_PRIO_EXECUTOR: StaticCell<InterruptExecutor<2>> = StaticCell::new();
    let high_prio = HIGH_PRIO_EXECUTOR.init(InterruptExecutor::new(sw_ints.software_interrupt2));
    let high_prio_spawner = high_prio.start(Priority::Priority3);

    let board = Board::init(
        BoardPeripherals {
            i2c0: peripherals.I2C0,
            sda: peripherals.GPIO12,
            scl: peripherals.GPIO11,
            uart1: peripherals.UART1,
            co2_tx: peripherals.GPIO17,
            co2_rx: peripherals.GPIO18,
            spi3: peripherals.SPI3,
            sd_sck: peripherals.GPIO39,
            sd_mosi: peripherals.GPIO40,
            sd_miso: peripherals.GPIO41,
            sd_cs: peripherals.GPIO42,
            led_storage: peripherals.GPIO4,
            led_imu: peripherals.GPIO5,
            led_co2: peripherals.GPIO6,
            start: peripherals.GPIO7,
            stop: peripherals.GPIO15,
        },
        &CONFIG,
    )?;

    control::run(
        board,
        producer,
        Shared {
            state: &STATE,
            signals: &SIGNALS,
            co2_cache: &CO2_CACHE,
            log_file: &LOG_FILE,
        },
        Spawners {
            thread: spawner,
            interrupt: high_prio_spawner,
        },
        CONFIG,
    )
    .await
}
