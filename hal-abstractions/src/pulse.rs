//! Pulse-width measurement on a digital input
//!
//! Busy-waits on the pin against a free-running microsecond counter, the
//! way an echo-ranging sensor is usually read.

use embedded_hal::digital::InputPin;

/// Free-running microsecond counter, wrapping at `u32::MAX`
pub trait MicrosClock {
    fn now_us(&mut self) -> u32;
}

/// Width in microseconds of the next high pulse on `pin`.
///
/// A pulse already in progress when called is skipped. `Ok(None)` if no
/// complete pulse fits in `timeout_us`, counted from the call.
pub fn pulse_high_us<P, C>(pin: &mut P, clock: &mut C, timeout_us: u32) -> Result<Option<u32>, P::Error>
where
    P: InputPin,
    C: MicrosClock,
{
    let start = clock.now_us();
    let expired = |clock: &mut C| clock.now_us().wrapping_sub(start) > timeout_us;

    while pin.is_high()? {
        if expired(clock) {
            return Ok(None);
        }
    }
    while pin.is_low()? {
        if expired(clock) {
            return Ok(None);
        }
    }
    let rise = clock.now_us();
    while pin.is_high()? {
        if expired(clock) {
            return Ok(None);
        }
    }
    Ok(Some(clock.now_us().wrapping_sub(rise)))
}
