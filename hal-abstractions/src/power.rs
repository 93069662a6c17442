//! Pre-probe power sequencing
//!
//! Some modules sit behind an enable/shutdown pin and only answer on the bus
//! once that pin is asserted. The bus prober calls into a [`ProbePower`]
//! around every single-address transaction so the sequencing is scoped to
//! the one address that needs it.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::StatefulOutputPin;

/// Hook invoked by the bus prober around each probed address.
pub trait ProbePower {
    /// Called right before the probe transaction to `address` on `segment`.
    fn before_probe<D: DelayNs>(&mut self, segment: u8, address: u8, delay: &mut D);

    /// Called right after the probe transaction, whatever its outcome.
    fn after_probe(&mut self, segment: u8, address: u8);
}

/// No sequencing on any address.
impl ProbePower for () {
    fn before_probe<D: DelayNs>(&mut self, _segment: u8, _address: u8, _delay: &mut D) {}

    fn after_probe(&mut self, _segment: u8, _address: u8) {}
}

/// Drives an enable pin high for one address and restores it afterwards
///
/// The pin level that was present before the probe is put back in
/// [`ProbePower::after_probe`], so adjacent addresses see the bus exactly
/// as it was.
#[derive(Debug)]
pub struct PowerEnable<P> {
    pin: P,
    segment: u8,
    address: u8,
    settle_ms: u32,
    saved_high: Option<bool>,
}

impl<P: StatefulOutputPin> PowerEnable<P> {
    /// Sequence `pin` for `address` on `segment`, waiting `settle_ms` after enabling.
    pub const fn new(pin: P, segment: u8, address: u8, settle_ms: u32) -> Self {
        Self {
            pin,
            segment,
            address,
            settle_ms,
            saved_high: None,
        }
    }

    /// Give the pin back, e.g. to hand it to the module's driver.
    pub fn release(self) -> P {
        self.pin
    }

    fn matches(&self, segment: u8, address: u8) -> bool {
        self.segment == segment && self.address == address
    }
}

impl<P: StatefulOutputPin> ProbePower for PowerEnable<P> {
    fn before_probe<D: DelayNs>(&mut self, segment: u8, address: u8, delay: &mut D) {
        if !self.matches(segment, address) {
            return;
        }
        // A pin that can't report its level is treated as low.
        self.saved_high = Some(self.pin.is_set_high().unwrap_or(false));
        if self.pin.set_high().is_ok() {
            delay.delay_ms(self.settle_ms);
        }
    }

    fn after_probe(&mut self, segment: u8, address: u8) {
        if !self.matches(segment, address) {
            return;
        }
        match self.saved_high.take() {
            Some(true) => {
                let _ = self.pin.set_high();
            }
            Some(false) => {
                let _ = self.pin.set_low();
            }
            None => {}
        }
    }
}
