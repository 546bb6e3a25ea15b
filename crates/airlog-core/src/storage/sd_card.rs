use embedded_sdmmc::{
    Mode, RawDirectory, RawFile, RawVolume, SdCard, SdCardError, TimeSource, VolumeIdx,
    VolumeManager,
};
use log::{debug, warn};
use thiserror_no_std::Error;

use super::LogVolume;

#[derive(Error, Debug)]
pub enum SdVolumeError {
    #[error("volume is not mounted")]
    NotMounted,
    #[error("no file is open")]
    NoOpenFile,
    #[error("filesystem error: {0:?}")]
    Fs(embedded_sdmmc::Error<SdCardError>),
}

impl From<embedded_sdmmc::Error<SdCardError>> for SdVolumeError {
    fn from(e: embedded_sdmmc::Error<SdCardError>) -> Self {
        Self::Fs(e)
    }
}

struct Mounted {
    volume: RawVolume,
    root: RawDirectory,
    file: Option<RawFile>,
}

/// FAT volume on an SPI SD card.
///
/// The card is blocking, like every other `embedded-sdmmc` user. Only the
/// writer core touches it once collection runs, so blocking there does not
/// delay sampling.
pub struct SdCardVolume<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
    mounted: Option<Mounted>,
}

impl<S, D, T> SdCardVolume<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    pub fn new(sd_card: SdCard<S, D>, ts: T) -> Self {
        Self {
            volume_mgr: VolumeManager::new(sd_card, ts),
            mounted: None,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    fn mounted(&mut self) -> Result<&mut Mounted, SdVolumeError> {
        self.mounted.as_mut().ok_or(SdVolumeError::NotMounted)
    }

    fn open_file(&mut self) -> Result<RawFile, SdVolumeError> {
        self.mounted()?.file.ok_or(SdVolumeError::NoOpenFile)
    }
}

impl<S, D, T> LogVolume for SdCardVolume<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    type Error = SdVolumeError;

    fn mount(&mut self) -> Result<(), SdVolumeError> {
        if self.mounted.is_some() {
            return Ok(());
        }

        let volume = self.volume_mgr.open_raw_volume(VolumeIdx(0))?;
        let root = match self.volume_mgr.open_root_dir(volume) {
            Ok(root) => root,
            Err(e) => {
                let _ = self.volume_mgr.close_volume(volume);
                return Err(e.into());
            }
        };

        debug!("SD volume 0 mounted");
        self.mounted = Some(Mounted {
            volume,
            root,
            file: None,
        });
        Ok(())
    }

    fn exists(&mut self, name: &str) -> Result<bool, SdVolumeError> {
        let root = self.mounted()?.root;
        match self.volume_mgr.find_directory_entry(root, name) {
            Ok(_) => Ok(true),
            Err(embedded_sdmmc::Error::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn open_append(&mut self, name: &str) -> Result<u32, SdVolumeError> {
        let mounted = self.mounted.as_mut().ok_or(SdVolumeError::NotMounted)?;
        if let Some(previous) = mounted.file.take() {
            self.volume_mgr.close_file(previous)?;
        }

        let file = self.volume_mgr.open_file_in_dir(
            mounted.root,
            name,
            Mode::ReadWriteCreateOrAppend,
        )?;
        mounted.file = Some(file);
        Ok(self.volume_mgr.file_length(file)?)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SdVolumeError> {
        let file = self.open_file()?;
        self.volume_mgr.write(file, bytes)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), SdVolumeError> {
        let file = self.open_file()?;
        if self.volume_mgr.flush_file(file).is_err() {
            // A second attempt usually clears a transient SPI error
            warn!("SD flush failed, retrying");
            self.volume_mgr.flush_file(file)?;
        }
        Ok(())
    }

    fn unmount(&mut self) -> Result<(), SdVolumeError> {
        let Some(mounted) = self.mounted.take() else {
            return Ok(());
        };

        if let Some(file) = mounted.file {
            self.volume_mgr.close_file(file)?;
        }
        self.volume_mgr.close_dir(mounted.root)?;
        self.volume_mgr.close_volume(mounted.volume)?;
        debug!("SD volume 0 unmounted");
        Ok(())
    }
}
