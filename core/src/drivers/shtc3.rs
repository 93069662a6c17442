//! RAK1901: Sensirion SHTC3 temperature & humidity sensor

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::bus::Port;
use crate::error::DriverError;
use crate::module::{InitContext, Module};
use crate::payload::{Channel, Payload};

pub const ADDRESS: u8 = 0x70;

const CMD_WAKEUP: u16 = 0x3517;
const CMD_SLEEP: u16 = 0xB098;
const CMD_SOFT_RESET: u16 = 0x805D;
const CMD_READ_ID: u16 = 0xEFC8;
/// Normal mode, clock stretching off, temperature first
const CMD_MEASURE: u16 = 0x7866;

/// ID register bits that identify an SHTC3
const ID_MASK: u16 = 0x083F;
const ID_SHTC3: u16 = 0x0807;

const WAKEUP_US: u32 = 240;
const MEASURE_MS: u32 = 13;

/// CRC-8, polynomial 0x31, init 0xFF
pub(crate) fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFFu8;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x31 } else { crc << 1 };
        }
    }
    crc
}

/// Check a `[msb, lsb, crc]` word.
pub(crate) fn checked_word(raw: &[u8]) -> Result<u16, DriverError> {
    match raw {
        [msb, lsb, crc] if crc8(&[*msb, *lsb]) == *crc => Ok(u16::from_be_bytes([*msb, *lsb])),
        _ => Err(DriverError::Crc),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    pub celsius: f32,
    pub humidity: f32,
}

#[derive(Debug, Default)]
pub struct Shtc3 {
    last: Option<Measurement>,
}

impl Shtc3 {
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Last successful measurement.
    pub fn last(&self) -> Option<Measurement> {
        self.last
    }

    fn command<I: I2c, D: DelayNs>(port: &mut Port<'_, I, D>, cmd: u16) -> Result<(), DriverError> {
        port.write(&cmd.to_be_bytes())
    }

    fn wake<I: I2c, D: DelayNs>(port: &mut Port<'_, I, D>) -> Result<(), DriverError> {
        Self::command(port, CMD_WAKEUP)?;
        port.delay_us(WAKEUP_US);
        Ok(())
    }

    fn measure<I: I2c, D: DelayNs>(port: &mut Port<'_, I, D>) -> Result<Measurement, DriverError> {
        Self::wake(port)?;
        Self::command(port, CMD_MEASURE)?;
        port.delay_ms(MEASURE_MS);
        let mut raw = [0u8; 6];
        port.read(&mut raw)?;
        // Put it back to sleep whatever the data looks like
        let sleep = Self::command(port, CMD_SLEEP);

        let t = checked_word(&raw[0..3])?;
        let rh = checked_word(&raw[3..6])?;
        sleep?;
        Ok(Measurement {
            celsius: -45.0 + 175.0 * f32::from(t) / 65536.0,
            humidity: 100.0 * f32::from(rh) / 65536.0,
        })
    }
}

impl<I: I2c, D: DelayNs> Module<I, D> for Shtc3 {
    fn init(&mut self, port: &mut Port<'_, I, D>, _cx: &InitContext<'_>) -> Result<(), DriverError> {
        Self::wake(port)?;
        Self::command(port, CMD_SOFT_RESET)?;
        port.delay_us(WAKEUP_US);

        Self::command(port, CMD_READ_ID)?;
        let mut raw = [0u8; 3];
        port.read(&mut raw)?;
        let id = checked_word(&raw)?;
        if id & ID_MASK != ID_SHTC3 {
            return Err(DriverError::Signature {
                expected: ID_SHTC3,
                found: id & ID_MASK,
            });
        }
        Self::command(port, CMD_SLEEP)
    }

    fn read(&mut self, port: &mut Port<'_, I, D>, payload: &mut dyn Payload) -> Result<(), DriverError> {
        let m = Self::measure(port)?;
        debug!("SHTC3 T: {=f32} H: {=f32}", m.celsius, m.humidity);
        self.last = Some(m);
        payload.add_humidity(Channel::HUMIDITY, m.humidity)?;
        payload.add_temperature(Channel::TEMPERATURE, m.celsius)?;
        Ok(())
    }

    fn release(&mut self, port: &mut Port<'_, I, D>) {
        self.last = None;
        let _ = Self::command(port, CMD_SLEEP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::testing::{FakeBus, NoDelay, Recorded, RecordingPayload};

    fn word(value: u16) -> [u8; 3] {
        let [msb, lsb] = value.to_be_bytes();
        [msb, lsb, crc8(&[msb, lsb])]
    }

    #[test]
    fn test_crc8_reference_value() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn test_init_checks_id() {
        let mut bus = FakeBus::new();
        bus.attach(ADDRESS).respond(&word(0x0887));
        let mut delay = NoDelay;
        let mut port = Port::new(&mut bus, &mut delay, ADDRESS);
        let settings = Settings::default();
        let mut sensor = Shtc3::new();
        assert!(sensor.init(&mut port, &InitContext { settings: &settings }).is_ok());
    }

    #[test]
    fn test_init_rejects_other_chip() {
        let mut bus = FakeBus::new();
        bus.attach(ADDRESS).respond(&word(0x0001));
        let mut delay = NoDelay;
        let mut port = Port::new(&mut bus, &mut delay, ADDRESS);
        let settings = Settings::default();
        let mut sensor = Shtc3::new();
        assert!(matches!(
            sensor.init(&mut port, &InitContext { settings: &settings }),
            Err(DriverError::Signature { .. })
        ));
    }

    #[test]
    fn test_read_converts_and_reports() {
        let mut bus = FakeBus::new();
        let mut raw = [0u8; 6];
        // 0x6666 -> 25.0 C, 0x8000 -> 50 %
        raw[..3].copy_from_slice(&word(0x6666));
        raw[3..].copy_from_slice(&word(0x8000));
        bus.attach(ADDRESS).respond(&raw);
        let mut delay = NoDelay;
        let mut port = Port::new(&mut bus, &mut delay, ADDRESS);
        let mut payload = RecordingPayload::new();
        let mut sensor = Shtc3::new();
        sensor.read(&mut port, &mut payload).unwrap();

        assert_eq!(payload.channels(), [2, 3]);
        let Recorded::Temperature(t) = payload.records[1].1 else {
            panic!("expected temperature");
        };
        assert!((t - 25.0).abs() < 0.01);
        assert_eq!(payload.records[0].1, Recorded::Humidity(50.0));
        assert!(sensor.last().is_some());
    }

    #[test]
    fn test_corrupt_measurement_is_crc_error() {
        let mut bus = FakeBus::new();
        bus.attach(ADDRESS).respond(&[0x66, 0x66, 0x00, 0x80, 0x00, 0x00]);
        let mut delay = NoDelay;
        let mut port = Port::new(&mut bus, &mut delay, ADDRESS);
        let mut payload = RecordingPayload::new();
        let mut sensor = Shtc3::new();
        assert_eq!(sensor.read(&mut port, &mut payload), Err(DriverError::Crc));
        assert!(payload.records.is_empty());
    }
}
