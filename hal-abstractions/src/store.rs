//! Persistent settings storage
//!
//! A small offset-addressed byte store. Boards back it with internal flash or
//! an EEPROM; [`MemoryStore`] keeps everything in RAM.

/// Settings store operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Offset/length falls outside the store
    OutOfRange,
    /// Underlying medium reported an error
    Hardware,
    /// Data read back differs from what was written
    Verify,
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "Offset out of range"),
            Self::Hardware => write!(f, "Storage hardware error"),
            Self::Verify => write!(f, "Read-back verification failed"),
        }
    }
}

impl core::error::Error for StoreError {}

/// Offset/range read-write byte store
pub trait SettingsStore {
    /// Fill `buf` with the bytes stored at `offset`.
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), StoreError>;

    /// Persist `data` at `offset`.
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), StoreError>;
}

impl<T: SettingsStore + ?Sized> SettingsStore for &mut T {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), StoreError> {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), StoreError> {
        (**self).write(offset, data)
    }
}

/// RAM-backed store, erased to `0xFF` like a fresh flash page
#[derive(Debug, Clone)]
pub struct MemoryStore<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> MemoryStore<N> {
    /// Create an erased store.
    pub const fn new() -> Self {
        Self { bytes: [0xFF; N] }
    }

    /// Raw view of the stored bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn range(offset: u32, len: usize) -> Result<core::ops::Range<usize>, StoreError> {
        let start = usize::try_from(offset).map_err(|_| StoreError::OutOfRange)?;
        let end = start.checked_add(len).ok_or(StoreError::OutOfRange)?;
        if end > N {
            return Err(StoreError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl<const N: usize> Default for MemoryStore<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SettingsStore for MemoryStore<N> {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), StoreError> {
        let range = Self::range(offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), StoreError> {
        let range = Self::range(offset, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_store_reads_erased() {
        let mut store = MemoryStore::<16>::new();
        let mut buf = [0u8; 4];
        store.read(4, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 4]);
    }

    #[test]
    fn test_write_then_read() {
        let mut store = MemoryStore::<16>::new();
        store.write(2, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        store.read(2, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let mut store = MemoryStore::<8>::new();
        assert_eq!(store.write(6, &[0; 4]), Err(StoreError::OutOfRange));
        let mut buf = [0u8; 1];
        assert_eq!(store.read(8, &mut buf), Err(StoreError::OutOfRange));
    }
}
