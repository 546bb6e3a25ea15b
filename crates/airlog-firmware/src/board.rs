//! Board wiring and peripheral bring-up
//!
//! | Function        | Peripheral | Pins                            |
//! |-----------------|------------|---------------------------------|
//! | ICM-20948       | I2C0       | SDA GPIO12, SCL GPIO11        |
//! | CO₂ sensor      | UART1      | TX GPIO17, RX GPIO18          |
//! | SD card         | SPI3       | SCK 39, MOSI 40, MISO 41, CS 42 |
//! | Storage LED     | GPIO       | GPIO4                         |
//! | IMU LED         | GPIO       | GPIO5                         |
//! | CO₂ LED         | GPIO       | GPIO6                         |
//! | Start input     | GPIO       | GPIO7 (pull-up, active low)   |
//! | Stop button     | GPIO       | GPIO15 (pull-up, falling edge) |

use airlog_core::config::LoggerConfig;
use airlog_core::indicators::Indicators;
use airlog_core::sensors::{Co2Sensor, Icm20948};
use airlog_core::storage::{LogFile, SdCardVolume};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use esp_hal::delay::Delay;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::i2c::master::Config as I2cConfig;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::uart::{Config as UartConfig, Uart};
use esp_hal::{Async, Blocking};
use log::info;

use crate::error::FirmwareError;
use crate::time_source::UptimeTimeSource;

/// SPI clock while the card is identified; cards must accept 400 kHz
const SD_INIT_FREQUENCY_KHZ: u32 = 400;

pub type ImuBus = esp_hal::i2c::master::I2c<'static, Async>;
pub type Imu = Icm20948<ImuBus>;
pub type Co2Uart = Uart<'static, Async>;
pub type Co2 = Co2Sensor<Co2Uart>;
pub type SdSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, NoDelay>;
pub type SdVolume = SdCardVolume<SdSpi, Delay, UptimeTimeSource>;
pub type SdLogFile = LogFile<SdVolume>;
pub type Leds = Indicators<Output<'static>, Output<'static>, Output<'static>>;

/// The open log file, shared by the writer core and the control loop.
pub type SharedLog = AsyncMutex<CriticalSectionRawMutex, Option<SdLogFile>>;

/// Everything the control loop drives.
pub struct Board {
    pub imu: Imu,
    pub co2: Co2,
    pub volume: SdVolume,
    pub leds: Leds,
    pub start: Input<'static>,
    pub stop: Input<'static>,
}

/// Pins and peripherals consumed by [`Board::init`].
pub struct BoardPeripherals {
    pub i2c0: esp_hal::peripherals::I2C0<'static>,
    pub sda: esp_hal::peripherals::GPIO12<'static>,
    pub scl: esp_hal::peripherals::GPIO11<'static>,
    pub uart1: esp_hal::peripherals::UART1<'static>,
    pub co2_tx: esp_hal::peripherals::GPIO17<'static>,
    pub co2_rx: esp_hal::peripherals::GPIO18<'static>,
    pub spi3: esp_hal::peripherals::SPI3<'static>,
    pub sd_sck: esp_hal::peripherals::GPIO39<'static>,
    pub sd_mosi: esp_hal::peripherals::GPIO40<'static>,
    pub sd_miso: esp_hal::peripherals::GPIO41<'static>,
    pub sd_cs: esp_hal::peripherals::GPIO42<'static>,
    pub led_storage: esp_hal::peripherals::GPIO4<'static>,
    pub led_imu: esp_hal::peripherals::GPIO5<'static>,
    pub led_co2: esp_hal::peripherals::GPIO6<'static>,
    pub start: esp_hal::peripherals::GPIO7<'static>,
    pub stop: esp_hal::peripherals::GPIO15<'static>,
}

impl Board {
    /// Configure every peripheral. Sensors are created but not initialized.
    pub fn init(p: BoardPeripherals, config: &LoggerConfig) -> Result<Self, FirmwareError> {
        let leds = Indicators::new(
            Output::new(p.led_storage, Level::Low, OutputConfig::default()),
            Output::new(p.led_imu, Level::Low, OutputConfig::default()),
            Output::new(p.led_co2, Level::Low, OutputConfig::default()),
        );

        let start = Input::new(p.start, InputConfig::default().with_pull(Pull::Up));
        let stop = Input::new(p.stop, InputConfig::default().with_pull(Pull::Up));

        let i2c = esp_hal::i2c::master::I2c::new(
            p.i2c0,
            I2cConfig::default().with_frequency(Rate::from_khz(config.i2c_frequency_khz)),
        )?
        .with_sda(p.sda)
        .with_scl(p.scl)
        .into_async();
        let imu = Icm20948::new(i2c, config.imu_address);

        let uart = Uart::new(
            p.uart1,
            UartConfig::default().with_baudrate(config.co2_baud_rate),
        )?
        .with_tx(p.co2_tx)
        .with_rx(p.co2_rx)
        .into_async();
        let co2 = Co2Sensor::new(uart);

        let spi = Spi::new(
            p.spi3,
            SpiConfig::default().with_frequency(Rate::from_khz(SD_INIT_FREQUENCY_KHZ)),
        )?
        .with_sck(p.sd_sck)
        .with_mosi(p.sd_mosi)
        .with_miso(p.sd_miso);
        let cs = Output::new(p.sd_cs, Level::High, OutputConfig::default());
        // Setting an esp-hal output cannot fail
        let sd_spi = match ExclusiveDevice::new_no_delay(spi, cs) {
            Ok(device) => device,
            Err(never) => match never {},
        };
        let sd_card = embedded_sdmmc::SdCard::new(sd_spi, Delay::new());
        let volume = SdCardVolume::new(sd_card, UptimeTimeSource);

        info!("Board peripherals configured");
        Ok(Self {
            imu,
            co2,
            volume,
            leds,
            start,
            stop,
        })
    }
}
