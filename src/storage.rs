//! Read-only file access on the SD card
//!
//! Only the root directory of the first FAT volume is used, and names must be
//! 8.3 short names.

use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use embedded_sdmmc::{Mode, SdCard, TimeSource, Timestamp, VolumeIdx, VolumeManager};
use thiserror::Error;

/// File access failures
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("file not found")]
    NotFound,
    #[error("failed to open file")]
    OpenFailed,
    #[error("file is empty")]
    Empty,
    #[error("short read")]
    ShortRead,
}

/// Mounted medium holding the configuration file
pub trait Storage {
    /// Whether the medium is present and its filesystem mounts
    fn is_ready(&mut self) -> bool;

    /// Read a whole file. The file is closed again on every path.
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, StorageError>;
}

/// Fixed timestamp source; the card is never written
pub struct DummyTimesource;

impl TimeSource for DummyTimesource {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 56, // 2026
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// [`Storage`] on an SPI SD card
pub struct SdStorage<SPI: SpiDevice, DELAY: DelayNs> {
    volume_mgr: VolumeManager<SdCard<SPI, DELAY>, DummyTimesource>,
}

impl<SPI, DELAY> SdStorage<SPI, DELAY>
where
    SPI: SpiDevice,
    DELAY: DelayNs,
{
    pub fn new(spi: SPI, delay: DELAY) -> Self {
        let sd_card = SdCard::new(spi, delay);
        match sd_card.num_bytes() {
            Ok(size) => log::info!("SD card size: {} MB", size / 1024 / 1024),
            Err(e) => log::warn!("SD card not responding: {:?}", e),
        }
        Self {
            volume_mgr: VolumeManager::new(sd_card, DummyTimesource),
        }
    }
}

impl<SPI, DELAY> Storage for SdStorage<SPI, DELAY>
where
    SPI: SpiDevice,
    DELAY: DelayNs,
{
    fn is_ready(&mut self) -> bool {
        self.volume_mgr.open_volume(VolumeIdx(0)).is_ok()
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, StorageError> {
        let name = path.trim_start_matches('/');

        let mut volume = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|_| StorageError::OpenFailed)?;
        let mut root_dir = volume
            .open_root_dir()
            .map_err(|_| StorageError::OpenFailed)?;

        let mut file = match root_dir.open_file_in_dir(name, Mode::ReadOnly) {
            Ok(file) => file,
            Err(embedded_sdmmc::Error::NotFound) => return Err(StorageError::NotFound),
            Err(e) => {
                log::warn!("open {} failed: {:?}", name, e);
                return Err(StorageError::OpenFailed);
            }
        };

        let size = file.length() as usize;
        if size == 0 {
            return Err(StorageError::Empty);
        }

        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| StorageError::ShortRead)?;
        data.resize(size, 0);

        let mut total_read = 0;
        while total_read < size {
            match file.read(&mut data[total_read..]) {
                Ok(0) => break,
                Ok(n) => total_read += n,
                Err(_) => return Err(StorageError::ShortRead),
            }
        }
        if total_read != size {
            return Err(StorageError::ShortRead);
        }

        log::debug!("Read {} bytes from {}", total_read, name);
        // File, directory and volume close as they drop
        Ok(data)
    }
}
