//! Bus segments and per-module bus access
//!
//! The node owns one I2C bus per physical segment and one delay provider.
//! Drivers never hold the bus; every call gets a short-lived [`Port`] bound
//! to the slot's segment and address.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, I2c};
use heapless::Vec;

use crate::error::DriverError;

/// Maximum number of independent bus segments
pub const MAX_SEGMENTS: usize = 2;

/// Physical bus instance an address applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusSegment(pub u8);

impl BusSegment {
    /// First (and on most boards only) segment
    pub const PRIMARY: Self = Self(0);
}

/// All bus segments of a board plus the shared delay provider
pub struct Buses<I, D> {
    segments: Vec<I, MAX_SEGMENTS>,
    delay: D,
}

impl<I: I2c, D: DelayNs> Buses<I, D> {
    /// Create an empty set; segments are numbered in the order they're added.
    pub fn new(delay: D) -> Self {
        Self {
            segments: Vec::new(),
            delay,
        }
    }

    /// Board with a single bus on [`BusSegment::PRIMARY`].
    pub fn single(i2c: I, delay: D) -> Self {
        let mut buses = Self::new(delay);
        // Capacity is at least one, first push can't fail.
        let _ = buses.segments.push(i2c);
        buses
    }

    /// Register another bus; hands it back if every segment is taken.
    pub fn add(&mut self, i2c: I) -> Result<BusSegment, I> {
        let id = BusSegment(self.segments.len() as u8);
        self.segments.push(i2c)?;
        Ok(id)
    }

    /// Segments in numbering order.
    pub fn segments(&self) -> impl Iterator<Item = BusSegment> {
        (0..self.segments.len() as u8).map(BusSegment)
    }

    /// Number of registered segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// `true` when no bus has been registered.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Bus and delay of one segment.
    pub fn split(&mut self, segment: BusSegment) -> Option<(&mut I, &mut D)> {
        let i2c = self.segments.get_mut(usize::from(segment.0))?;
        Some((i2c, &mut self.delay))
    }

    /// Bind a port to `address` on `segment`.
    pub fn port(&mut self, segment: BusSegment, address: u8) -> Option<Port<'_, I, D>> {
        let (i2c, delay) = self.split(segment)?;
        Some(Port {
            i2c,
            delay,
            address,
        })
    }

    /// The shared delay provider.
    pub fn delay(&mut self) -> &mut D {
        &mut self.delay
    }

    /// Give the buses back.
    pub fn release(self) -> (Vec<I, MAX_SEGMENTS>, D) {
        (self.segments, self.delay)
    }
}

/// One module's view of the bus: fixed address, borrowed bus and delay
pub struct Port<'a, I, D> {
    i2c: &'a mut I,
    delay: &'a mut D,
    address: u8,
}

impl<'a, I: I2c, D: DelayNs> Port<'a, I, D> {
    /// Bind a port directly, outside of [`Buses`].
    pub fn new(i2c: &'a mut I, delay: &'a mut D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
        }
    }

    /// 7-bit address this port talks to.
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        self.i2c
            .write(self.address, bytes)
            .map_err(|e| DriverError::Bus(e.kind()))
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), DriverError> {
        self.i2c
            .read(self.address, buf)
            .map_err(|e| DriverError::Bus(e.kind()))
    }

    pub fn write_read(&mut self, bytes: &[u8], buf: &mut [u8]) -> Result<(), DriverError> {
        self.i2c
            .write_read(self.address, bytes, buf)
            .map_err(|e| DriverError::Bus(e.kind()))
    }

    /// Read one 8-bit register.
    pub fn read_register(&mut self, reg: u8) -> Result<u8, DriverError> {
        let mut value = [0u8];
        self.write_read(&[reg], &mut value)?;
        Ok(value[0])
    }

    /// Write one 8-bit register.
    pub fn write_register(&mut self, reg: u8, value: u8) -> Result<(), DriverError> {
        self.write(&[reg, value])
    }

    /// Read-modify-write: keep the bits in `keep`, then OR in `set`.
    pub fn modify_register(&mut self, reg: u8, keep: u8, set: u8) -> Result<(), DriverError> {
        let value = self.read_register(reg)?;
        self.write_register(reg, (value & keep) | set)
    }

    pub fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    pub fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}
