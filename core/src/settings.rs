//! Persisted node settings
//!
//! Each setting is its own record in the [`SettingsStore`], followed by a
//! `0xAA` marker byte. A record without the marker has never been written
//! (or was torn) and is replaced by its default on load.
//!
//! | Record             | Offset | Value              |
//! |--------------------|--------|--------------------|
//! | send interval      | `0x00` | `u32` LE, ms       |
//! | GNSS format        | `0x08` | `u8`, 0..=3        |
//! | sea-level pressure | `0x0C` | `f32` LE, hPa      |

use hal_abstractions::{SettingsStore, StoreError};

/// Marker written after every valid record
pub const VALID_MARKER: u8 = 0xAA;

pub const SEND_INTERVAL_OFFSET: u32 = 0x00;
pub const GNSS_FORMAT_OFFSET: u32 = 0x08;
pub const SEA_LEVEL_OFFSET: u32 = 0x0C;

/// Standard atmosphere at sea level
pub const DEFAULT_SEA_LEVEL_HPA: f32 = 1013.25;

/// Location payload format used by the GNSS module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GnssFormat {
    #[default]
    Lpp4Digit = 0,
    Lpp6Digit = 1,
    HeliumMapper = 2,
    FieldTester = 3,
}

impl GnssFormat {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Lpp4Digit),
            1 => Some(Self::Lpp6Digit),
            2 => Some(Self::HeliumMapper),
            3 => Some(Self::FieldTester),
            _ => None,
        }
    }

    pub const fn description(&self) -> &'static str {
        match self {
            Self::Lpp4Digit => "4 digit Cayenne LPP",
            Self::Lpp6Digit => "6 digit extended Cayenne LPP",
            Self::HeliumMapper => "Helium Mapper data format",
            Self::FieldTester => "Field Tester data format",
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    /// Periodic read interval in milliseconds, 0 = off
    pub send_interval_ms: u32,
    pub gnss_format: GnssFormat,
    /// Reference pressure for altitude calculations
    pub sea_level_hpa: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            send_interval_ms: 0,
            gnss_format: GnssFormat::Lpp4Digit,
            sea_level_hpa: DEFAULT_SEA_LEVEL_HPA,
        }
    }
}

impl Settings {
    /// Load every record, writing defaults back for the ones that are missing.
    pub fn load<S: SettingsStore>(store: &mut S) -> Result<Self, StoreError> {
        let defaults = Self::default();

        let send_interval_ms = match read_record::<_, 4>(store, SEND_INTERVAL_OFFSET)? {
            Some(raw) => u32::from_le_bytes(raw),
            None => {
                warn!("No send interval stored, using default");
                write_record(store, SEND_INTERVAL_OFFSET, &defaults.send_interval_ms.to_le_bytes())?;
                defaults.send_interval_ms
            }
        };

        let gnss_format = match read_record::<_, 1>(store, GNSS_FORMAT_OFFSET)? {
            Some([raw]) => GnssFormat::from_u8(raw).unwrap_or_else(|| {
                warn!("Invalid GNSS format {=u8}, using default", raw);
                defaults.gnss_format
            }),
            None => {
                warn!("No GNSS format stored, using default");
                write_record(store, GNSS_FORMAT_OFFSET, &[defaults.gnss_format as u8])?;
                defaults.gnss_format
            }
        };

        let sea_level_hpa = match read_record::<_, 4>(store, SEA_LEVEL_OFFSET)? {
            Some(raw) => f32::from_le_bytes(raw),
            None => {
                write_record(store, SEA_LEVEL_OFFSET, &defaults.sea_level_hpa.to_le_bytes())?;
                defaults.sea_level_hpa
            }
        };

        Ok(Self {
            send_interval_ms,
            gnss_format,
            sea_level_hpa,
        })
    }

    /// Persist every record.
    pub fn save<S: SettingsStore>(&self, store: &mut S) -> Result<(), StoreError> {
        self.save_send_interval(store)?;
        self.save_gnss_format(store)?;
        write_record(store, SEA_LEVEL_OFFSET, &self.sea_level_hpa.to_le_bytes())
    }

    pub fn save_send_interval<S: SettingsStore>(&self, store: &mut S) -> Result<(), StoreError> {
        write_record(store, SEND_INTERVAL_OFFSET, &self.send_interval_ms.to_le_bytes())
    }

    pub fn save_gnss_format<S: SettingsStore>(&self, store: &mut S) -> Result<(), StoreError> {
        write_record(store, GNSS_FORMAT_OFFSET, &[self.gnss_format as u8])
    }
}

fn read_record<S: SettingsStore, const L: usize>(
    store: &mut S,
    offset: u32,
) -> Result<Option<[u8; L]>, StoreError> {
    let mut value = [0u8; L];
    let mut marker = [0u8];
    store.read(offset, &mut value)?;
    store.read(offset + L as u32, &mut marker)?;
    Ok((marker[0] == VALID_MARKER).then_some(value))
}

fn write_record<S: SettingsStore>(store: &mut S, offset: u32, value: &[u8]) -> Result<(), StoreError> {
    store.write(offset, value)?;
    store.write(offset + value.len() as u32, &[VALID_MARKER])
}
