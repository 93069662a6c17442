//! Driver contract
//!
//! Every supported module is a value implementing [`Module`]. The dispatcher
//! only ever talks to drivers through this trait, and finds them through a
//! [`DriverTable`] keyed by [`ModuleKind`].

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::bus::Port;
use crate::catalog::ModuleKind;
use crate::error::DriverError;
use crate::payload::Payload;
use crate::settings::Settings;

/// What a driver needs to know at init time beyond its bus port
#[derive(Debug, Clone, Copy)]
pub struct InitContext<'a> {
    /// Settings loaded from the persistent store (calibration, formats)
    pub settings: &'a Settings,
}

/// Result of a measurement trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Trigger {
    /// Data can be read right away
    Ready,
    /// Data is valid after waiting this long
    Settle {
        /// Wait time in milliseconds
        ms: u32,
    },
}

/// Capability interface of one module driver
///
/// Implementors handle their own retries (if any) and report failures as
/// [`DriverError`] rather than panicking; the dispatcher decides whether a
/// failure rejects the slot (init) or just skips a reading (read).
pub trait Module<I: I2c, D: DelayNs> {
    /// Probe the device past the bare bus ACK and configure it.
    ///
    /// Returning an error rejects the slot. Drivers must check a signature
    /// (ID register, self-test) so a different chip at the same address
    /// self-rejects.
    fn init(&mut self, port: &mut Port<'_, I, D>, cx: &InitContext<'_>) -> Result<(), DriverError>;

    /// Kick off a measurement for two-phase devices.
    fn start(&mut self, _port: &mut Port<'_, I, D>) -> Result<Trigger, DriverError> {
        Ok(Trigger::Ready)
    }

    /// Read the current values and append them to `payload`.
    fn read(&mut self, port: &mut Port<'_, I, D>, payload: &mut dyn Payload) -> Result<(), DriverError>;

    /// Take a background sample between read cycles.
    ///
    /// Called about once a second for every active module. Only modules
    /// that integrate over time do anything here.
    fn sample(&mut self, _port: &mut Port<'_, I, D>) -> Result<(), DriverError> {
        Ok(())
    }

    /// Clear a latched interrupt after the dispatch loop handled its event.
    fn acknowledge(&mut self, _port: &mut Port<'_, I, D>) -> Result<(), DriverError> {
        Ok(())
    }

    /// Drop cached state and power the device down.
    ///
    /// Called when init fails, when a started measurement is cancelled, when
    /// a rescan finds the module gone and on shutdown. Must not fail; the
    /// device may no longer be on the bus.
    fn release(&mut self, _port: &mut Port<'_, I, D>) {}
}

/// Maps a catalog module kind to its driver
pub trait DriverTable<I: I2c, D: DelayNs> {
    /// Driver for `kind`, or `None` when the board doesn't support it.
    fn driver(&mut self, kind: ModuleKind) -> Option<&mut dyn Module<I, D>>;
}
