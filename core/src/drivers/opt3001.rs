//! RAK1903: TI OPT3001 ambient light sensor

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::bus::Port;
use crate::error::DriverError;
use crate::module::{InitContext, Module};
use crate::payload::{Channel, Payload};

pub const ADDRESS: u8 = 0x44;

const RESULT: u8 = 0x00;
const CONFIG: u8 = 0x01;
const MANUFACTURER_ID: u8 = 0x7E;
const DEVICE_ID: u8 = 0x7F;

const TI: u16 = 0x5449;
const OPT3001: u16 = 0x3001;

/// Automatic full-scale, 800 ms conversions, continuous, latched
const CONFIG_CONTINUOUS: u16 = 0xCC10;
/// M[1:0] = 00
const CONFIG_SHUTDOWN: u16 = 0xC810;

/// Result register: 4-bit exponent, 12-bit mantissa, 0.01 lux LSB at E=0
fn raw_to_lux(raw: u16) -> f32 {
    let exponent = raw >> 12;
    let mantissa = raw & 0x0FFF;
    0.01 * f32::from(1u16 << exponent) * f32::from(mantissa)
}

fn read_word<I: I2c, D: DelayNs>(port: &mut Port<'_, I, D>, reg: u8) -> Result<u16, DriverError> {
    let mut raw = [0u8; 2];
    port.write_read(&[reg], &mut raw)?;
    Ok(u16::from_be_bytes(raw))
}

fn write_word<I: I2c, D: DelayNs>(port: &mut Port<'_, I, D>, reg: u8, value: u16) -> Result<(), DriverError> {
    let [msb, lsb] = value.to_be_bytes();
    port.write(&[reg, msb, lsb])
}

#[derive(Debug, Default)]
pub struct Opt3001;

impl<I: I2c, D: DelayNs> Module<I, D> for Opt3001 {
    fn init(&mut self, port: &mut Port<'_, I, D>, _cx: &InitContext<'_>) -> Result<(), DriverError> {
        let manufacturer = read_word(port, MANUFACTURER_ID)?;
        if manufacturer != TI {
            return Err(DriverError::Signature {
                expected: TI,
                found: manufacturer,
            });
        }
        let device = read_word(port, DEVICE_ID)?;
        if device != OPT3001 {
            return Err(DriverError::Signature {
                expected: OPT3001,
                found: device,
            });
        }
        write_word(port, CONFIG, CONFIG_CONTINUOUS)
    }

    fn read(&mut self, port: &mut Port<'_, I, D>, payload: &mut dyn Payload) -> Result<(), DriverError> {
        let lux = raw_to_lux(read_word(port, RESULT)?);
        debug!("OPT3001 L: {=f32} lux", lux);
        payload.add_luminosity(Channel::LIGHT, lux)?;
        Ok(())
    }

    fn release(&mut self, port: &mut Port<'_, I, D>) {
        let _ = write_word(port, CONFIG, CONFIG_SHUTDOWN);
    }
}
