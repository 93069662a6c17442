//! Settings store on the last internal flash sector
//!
//! Sector 11 (128 KiB at `0x080E_0000`) holds the settings records at its
//! start. Flash can only be erased a whole sector at a time, so every write
//! rewrites the record area from a RAM copy.

use defmt::{debug, warn};
use embassy_stm32::flash::{Blocking, Flash};
use hal_abstractions::{SettingsStore, StoreError};

/// Sector 11, relative to the flash base
const SECTOR_OFFSET: u32 = 0x000E_0000;
const SECTOR_SIZE: u32 = 128 * 1024;

/// Bytes in use by the settings records
const RECORD_AREA: usize = 32;

pub struct FlashStore {
    flash: Flash<'static, Blocking>,
}

impl FlashStore {
    pub fn new(flash: Flash<'static, Blocking>) -> Self {
        Self { flash }
    }

    fn check(offset: u32, len: usize) -> Result<core::ops::Range<usize>, StoreError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(StoreError::OutOfRange)?;
        if end > RECORD_AREA {
            return Err(StoreError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl SettingsStore for FlashStore {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), StoreError> {
        Self::check(offset, buf.len())?;
        self.flash
            .blocking_read(SECTOR_OFFSET + offset, buf)
            .map_err(|_| StoreError::Hardware)
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), StoreError> {
        let range = Self::check(offset, data.len())?;

        let mut area = [0u8; RECORD_AREA];
        self.flash
            .blocking_read(SECTOR_OFFSET, &mut area)
            .map_err(|_| StoreError::Hardware)?;
        if area[range.clone()] == *data {
            return Ok(());
        }
        area[range].copy_from_slice(data);

        debug!("Rewriting settings sector");
        self.flash
            .blocking_erase(SECTOR_OFFSET, SECTOR_OFFSET + SECTOR_SIZE)
            .map_err(|_| StoreError::Hardware)?;
        self.flash
            .blocking_write(SECTOR_OFFSET, &area)
            .map_err(|_| StoreError::Hardware)?;

        let mut check = [0u8; RECORD_AREA];
        self.flash
            .blocking_read(SECTOR_OFFSET, &mut check)
            .map_err(|_| StoreError::Hardware)?;
        if check != area {
            warn!("Settings sector verify failed");
            return Err(StoreError::Verify);
        }
        Ok(())
    }
}
