//! A host directory standing in for the SD card.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use airlog_core::storage::LogVolume;
use log::debug;

pub struct DirVolume {
    root: PathBuf,
    mounted: bool,
    file: Option<File>,
    /// Mount attempts that still fail, simulating a card inserted late
    absent_mounts: u32,
}

impl DirVolume {
    pub fn new(root: impl Into<PathBuf>, absent_mounts: u32) -> Self {
        Self {
            root: root.into(),
            mounted: false,
            file: None,
            absent_mounts,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> io::Result<PathBuf> {
        if !self.mounted {
            return Err(io::Error::other("volume not mounted"));
        }
        Ok(self.root.join(name))
    }

    fn open_file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("no open file"))
    }
}

impl LogVolume for DirVolume {
    type Error = io::Error;

    fn mount(&mut self) -> io::Result<()> {
        if self.absent_mounts > 0 {
            self.absent_mounts -= 1;
            return Err(io::Error::new(io::ErrorKind::NotFound, "card not detected"));
        }
        fs::create_dir_all(&self.root)?;
        self.mounted = true;
        debug!("Mounted {}", self.root.display());
        Ok(())
    }

    fn exists(&mut self, name: &str) -> io::Result<bool> {
        self.path(name)?.try_exists()
    }

    fn open_append(&mut self, name: &str) -> io::Result<u32> {
        let path = self.path(name)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let length = u32::try_from(file.metadata()?.len()).unwrap_or(u32::MAX);
        self.file = Some(file);
        Ok(length)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.open_file()?.write_all(bytes)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.open_file()?.sync_data()
    }

    fn unmount(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        self.mounted = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlog_core::config::CSV_HEADER;
    use airlog_core::storage::{LineSink, LogFile};

    #[test]
    fn test_absent_card_fails_then_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = DirVolume::new(dir.path(), 2);
        assert!(volume.mount().is_err());
        assert!(volume.mount().is_err());
        volume.mount().unwrap();
    }

    #[test]
    fn test_unmounted_volume_rejects_access() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = DirVolume::new(dir.path(), 0);
        assert!(volume.exists("log_01.csv").is_err());
        assert!(volume.write(b"x").is_err());
    }

    #[test]
    fn test_log_file_lands_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("log_01.csv"), "old\n").unwrap();

        let mut volume = DirVolume::new(dir.path(), 0);
        volume.mount().unwrap();
        let mut file = LogFile::create(volume).unwrap();
        assert_eq!(file.name(), "log_02.csv");
        file.write_line("10,0.000,0.000,1.000,0.000,0.000,0.000,0\n").unwrap();
        file.close().unwrap();

        let written = fs::read_to_string(dir.path().join("log_02.csv")).unwrap();
        let mut lines = written.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER.trim_end()));
        assert!(lines.next().unwrap().starts_with("10,"));
        assert_eq!(lines.next(), None);
    }
}
