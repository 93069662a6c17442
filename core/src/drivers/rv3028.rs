//! RAK12002: Micro Crystal RV-3028-C7 real-time clock
//!
//! Keeps the clock in 24 h mode. A read cycle only refreshes the cached
//! time and adds nothing to the payload; `AT+RTC=?` goes to the chip through
//! [`LiveClock`].

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::bus::Port;
use crate::error::DriverError;
use crate::module::{InitContext, Module};
use crate::payload::Payload;
use crate::time::{from_bcd, to_bcd, Clock, DateTime};

pub const ADDRESS: u8 = 0x52;

const SECONDS: u8 = 0x00;
const STATUS: u8 = 0x0E;
const CONTROL_2: u8 = 0x10;
const ID: u8 = 0x28;

/// Hardware ID in the upper nibble of `ID`
const HID_MASK: u8 = 0xF0;
const HID_RV3028: u8 = 0x30;

const CTRL2_12_24: u8 = 0x02;
const STATUS_PORF: u8 = 0x01;

/// Years are stored as 0..=99 from 2000
const BASE_YEAR: u16 = 2000;

#[derive(Debug, Default)]
pub struct Rv3028 {
    last: Option<DateTime>,
}

impl Rv3028 {
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Time from the last read of the chip.
    pub fn last(&self) -> Option<DateTime> {
        self.last
    }

    /// Set date and time.
    ///
    /// Only years 2000..=2099 fit the year register.
    pub fn set<I: I2c, D: DelayNs>(&mut self, port: &mut Port<'_, I, D>, time: &DateTime) -> Result<(), DriverError> {
        let year = time
            .year
            .checked_sub(BASE_YEAR)
            .filter(|y| *y < 100)
            .ok_or(DriverError::InvalidData)? as u8;
        port.write(&[
            SECONDS,
            to_bcd(time.second),
            to_bcd(time.minute),
            to_bcd(time.hour),
            time.weekday(),
            to_bcd(time.day),
            to_bcd(time.month),
            to_bcd(year),
        ])?;
        info!("RTC set to {=u16}-{=u8}-{=u8}", time.year, time.month, time.day);
        self.last = Some(*time);
        Ok(())
    }

    /// Read the clock and cache the result.
    pub fn read_time<I: I2c, D: DelayNs>(&mut self, port: &mut Port<'_, I, D>) -> Result<DateTime, DriverError> {
        let mut raw = [0u8; 7];
        port.write_read(&[SECONDS], &mut raw)?;
        let now = DateTime::new(
            BASE_YEAR + u16::from(from_bcd(raw[6])),
            from_bcd(raw[5] & 0x1F),
            from_bcd(raw[4] & 0x3F),
            from_bcd(raw[2] & 0x3F),
            from_bcd(raw[1] & 0x7F),
            from_bcd(raw[0] & 0x7F),
        )
        .map_err(|_| DriverError::InvalidData)?;
        self.last = Some(now);
        Ok(now)
    }
}

/// [`Clock`] reading the RV-3028 on every call
///
/// Without a port (no active RTC) every read is `Unsupported`.
pub struct LiveClock<'a, 'p, I, D> {
    rtc: &'a mut Rv3028,
    port: Option<Port<'p, I, D>>,
}

impl<'a, 'p, I, D> LiveClock<'a, 'p, I, D> {
    pub fn new(rtc: &'a mut Rv3028, port: Option<Port<'p, I, D>>) -> Self {
        Self { rtc, port }
    }
}

impl<I: I2c, D: DelayNs> Clock for LiveClock<'_, '_, I, D> {
    fn now(&mut self) -> Result<DateTime, DriverError> {
        let port = self.port.as_mut().ok_or(DriverError::Unsupported)?;
        self.rtc.read_time(port)
    }
}

impl<I: I2c, D: DelayNs> Module<I, D> for Rv3028 {
    fn init(&mut self, port: &mut Port<'_, I, D>, _cx: &InitContext<'_>) -> Result<(), DriverError> {
        let id = port.read_register(ID)?;
        if id & HID_MASK != HID_RV3028 {
            return Err(DriverError::Signature {
                expected: HID_RV3028.into(),
                found: (id & HID_MASK).into(),
            });
        }
        port.modify_register(CONTROL_2, !CTRL2_12_24, 0)?;

        if port.read_register(STATUS)? & STATUS_PORF != 0 {
            warn!("RTC lost power, time needs to be set");
            port.modify_register(STATUS, !STATUS_PORF, 0)?;
        }
        Ok(())
    }

    fn read(&mut self, port: &mut Port<'_, I, D>, _payload: &mut dyn Payload) -> Result<(), DriverError> {
        let now = self.read_time(port)?;
        debug!(
            "RTC {=u16}.{=u8}.{=u8} {=u8}:{=u8}:{=u8}",
            now.year, now.month, now.day, now.hour, now.minute, now.second
        );
        Ok(())
    }

    fn release(&mut self, _port: &mut Port<'_, I, D>) {
        // Battery backed, keeps running
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::testing::{FakeBus, NoDelay, RecordingPayload};

    fn clock() -> FakeBus {
        let mut bus = FakeBus::new();
        let dev = bus.attach(ADDRESS);
        dev.regs[ID as usize] = 0x31;
        dev.regs[CONTROL_2 as usize] = CTRL2_12_24 | 0x04;
        dev.regs[STATUS as usize] = STATUS_PORF;
        bus
    }

    #[test]
    fn test_init_forces_24h_and_clears_power_on_flag() {
        let mut bus = clock();
        let settings = Settings::default();
        let mut delay = NoDelay;
        {
            let mut port = Port::new(&mut bus, &mut delay, ADDRESS);
            Rv3028::new()
                .init(&mut port, &InitContext { settings: &settings })
                .unwrap();
        }
        let regs = &bus.device(ADDRESS).unwrap().regs;
        assert_eq!(regs[CONTROL_2 as usize], 0x04);
        assert_eq!(regs[STATUS as usize], 0);
    }

    #[test]
    fn test_other_chip_is_rejected() {
        let mut bus = clock();
        bus.device(ADDRESS).unwrap().regs[ID as usize] = 0x10;
        let settings = Settings::default();
        let mut delay = NoDelay;
        let mut port = Port::new(&mut bus, &mut delay, ADDRESS);
        assert!(matches!(
            Rv3028::new().init(&mut port, &InitContext { settings: &settings }),
            Err(DriverError::Signature { .. })
        ));
    }

    #[test]
    fn test_set_then_read_back() {
        let mut bus = clock();
        let mut delay = NoDelay;
        let mut port = Port::new(&mut bus, &mut delay, ADDRESS);
        let mut rtc = Rv3028::new();
        let time = DateTime::new(2024, 2, 29, 13, 45, 0).unwrap();
        rtc.set(&mut port, &time).unwrap();

        let mut payload = RecordingPayload::new();
        let mut rtc = Rv3028::new();
        rtc.read(&mut port, &mut payload).unwrap();
        assert_eq!(rtc.last(), Some(time));
        assert!(payload.records.is_empty());

        drop(port);
        let regs = &bus.device(ADDRESS).unwrap().regs;
        // BCD, Thursday
        assert_eq!(&regs[0..7], &[0x00, 0x45, 0x13, 4, 0x29, 0x02, 0x24]);
    }

    #[test]
    fn test_live_clock_reads_the_chip() {
        let mut bus = clock();
        bus.device(ADDRESS).unwrap().regs[0..7].copy_from_slice(&[0x07, 0x05, 0x09, 6, 0x01, 0x06, 0x24]);
        let mut delay = NoDelay;
        let mut rtc = Rv3028::new();
        let port = Port::new(&mut bus, &mut delay, ADDRESS);
        let now = LiveClock::new(&mut rtc, Some(port)).now().unwrap();
        assert_eq!(now, DateTime::new(2024, 6, 1, 9, 5, 7).unwrap());
        assert_eq!(rtc.last(), Some(now));

        let mut absent = LiveClock::<FakeBus, NoDelay>::new(&mut rtc, None);
        assert_eq!(absent.now(), Err(DriverError::Unsupported));
    }

    #[test]
    fn test_year_out_of_register_range() {
        let mut bus = clock();
        let mut delay = NoDelay;
        let mut port = Port::new(&mut bus, &mut delay, ADDRESS);
        let time = DateTime::new(2100, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(Rv3028::new().set(&mut port, &time), Err(DriverError::InvalidData));
    }

    #[test]
    fn test_garbage_time_is_invalid() {
        let mut bus = clock();
        // Month 0
        bus.device(ADDRESS).unwrap().regs[0..7].copy_from_slice(&[0, 0, 0, 0, 0x01, 0x00, 0x24]);
        let mut delay = NoDelay;
        let mut port = Port::new(&mut bus, &mut delay, ADDRESS);
        let mut payload = RecordingPayload::new();
        assert_eq!(
            Rv3028::new().read(&mut port, &mut payload),
            Err(DriverError::InvalidData)
        );
    }
}
