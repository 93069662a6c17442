//! Outbound payload accumulator
//!
//! Drivers append typed readings through [`Payload`]; the board decides what
//! to do with the bytes. [`LppPayload`] encodes Cayenne LPP records:
//!
//! ```text
//! ┌─────────┬──────┬──────────────────┐
//! │ channel │ type │ value (BE, 1..4) │
//! └─────────┴──────┴──────────────────┘
//! ```

use heapless::Vec;

use crate::error::DriverError;

/// Payload channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Channel(pub u8);

impl Channel {
    pub const HUMIDITY: Self = Self(2);
    pub const TEMPERATURE: Self = Self(3);
    pub const PRESSURE: Self = Self(4);
    pub const LIGHT: Self = Self(5);
    pub const ENV_HUMIDITY: Self = Self(6);
    pub const ENV_TEMPERATURE: Self = Self(7);
    pub const ENV_PRESSURE: Self = Self(8);
    pub const ENV_GAS: Self = Self(9);
    pub const VOC: Self = Self(16);
    pub const DISTANCE: Self = Self(23);
}

/// The accumulator has no room for another record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PayloadFull;

impl core::fmt::Display for PayloadFull {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Payload full")
    }
}

impl core::error::Error for PayloadFull {}

impl From<PayloadFull> for DriverError {
    fn from(_: PayloadFull) -> Self {
        DriverError::PayloadFull
    }
}

/// One typed add per measurement kind
///
/// [`Payload::len`] and [`Payload::truncate`] let the dispatcher drop the
/// records of a module whose read failed part-way.
pub trait Payload {
    /// Size in the payload's own unit (bytes, records).
    fn len(&self) -> usize;
    /// Drop everything past `len`.
    fn truncate(&mut self, len: usize);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add_temperature(&mut self, channel: Channel, celsius: f32) -> Result<(), PayloadFull>;
    fn add_humidity(&mut self, channel: Channel, percent: f32) -> Result<(), PayloadFull>;
    fn add_pressure(&mut self, channel: Channel, hpa: f32) -> Result<(), PayloadFull>;
    fn add_analog(&mut self, channel: Channel, value: f32) -> Result<(), PayloadFull>;
    fn add_luminosity(&mut self, channel: Channel, lux: f32) -> Result<(), PayloadFull>;
    fn add_distance(&mut self, channel: Channel, millimeters: u32) -> Result<(), PayloadFull>;
    fn add_voc_index(&mut self, channel: Channel, index: u16) -> Result<(), PayloadFull>;
}

/// LPP data type identifiers
mod lpp {
    pub const ANALOG: u8 = 0x02;
    pub const LUMINOSITY: u8 = 0x65;
    pub const TEMPERATURE: u8 = 0x67;
    pub const HUMIDITY: u8 = 0x68;
    pub const PRESSURE: u8 = 0x73;
    pub const DISTANCE: u8 = 0x82;
    pub const VOC_INDEX: u8 = 0x8A;
}

/// Cayenne LPP encoder over a fixed buffer of `N` bytes
#[derive(Debug, Clone, Default)]
pub struct LppPayload<const N: usize> {
    buf: Vec<u8, N>,
}

impl<const N: usize> LppPayload<N> {
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn record(&mut self, channel: Channel, kind: u8, value: &[u8]) -> Result<(), PayloadFull> {
        if self.buf.len() + 2 + value.len() > N {
            return Err(PayloadFull);
        }
        // Length checked above
        self.buf.push(channel.0).map_err(|_| PayloadFull)?;
        self.buf.push(kind).map_err(|_| PayloadFull)?;
        self.buf.extend_from_slice(value).map_err(|_| PayloadFull)
    }
}

/// Scale and round to the nearest integer, saturating at the type bounds.
fn scaled(value: f32, scale: f32) -> f32 {
    let v = value * scale;
    if v >= 0.0 {
        v + 0.5
    } else {
        v - 0.5
    }
}

impl<const N: usize> Payload for LppPayload<N> {
    fn len(&self) -> usize {
        self.buf.len()
    }

    fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    fn add_temperature(&mut self, channel: Channel, celsius: f32) -> Result<(), PayloadFull> {
        let raw = scaled(celsius, 10.0) as i16;
        self.record(channel, lpp::TEMPERATURE, &raw.to_be_bytes())
    }

    fn add_humidity(&mut self, channel: Channel, percent: f32) -> Result<(), PayloadFull> {
        let raw = scaled(percent, 2.0) as u8;
        self.record(channel, lpp::HUMIDITY, &[raw])
    }

    fn add_pressure(&mut self, channel: Channel, hpa: f32) -> Result<(), PayloadFull> {
        let raw = scaled(hpa, 10.0) as u16;
        self.record(channel, lpp::PRESSURE, &raw.to_be_bytes())
    }

    fn add_analog(&mut self, channel: Channel, value: f32) -> Result<(), PayloadFull> {
        let raw = scaled(value, 100.0) as i16;
        self.record(channel, lpp::ANALOG, &raw.to_be_bytes())
    }

    fn add_luminosity(&mut self, channel: Channel, lux: f32) -> Result<(), PayloadFull> {
        let raw = scaled(lux, 1.0) as u16;
        self.record(channel, lpp::LUMINOSITY, &raw.to_be_bytes())
    }

    fn add_distance(&mut self, channel: Channel, millimeters: u32) -> Result<(), PayloadFull> {
        self.record(channel, lpp::DISTANCE, &millimeters.to_be_bytes())
    }

    fn add_voc_index(&mut self, channel: Channel, index: u16) -> Result<(), PayloadFull> {
        self.record(channel, lpp::VOC_INDEX, &index.to_be_bytes())
    }
}
