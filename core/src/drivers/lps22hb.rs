//! RAK1902: ST LPS22HB barometric pressure sensor
//!
//! Runs in one-shot mode: [`Module::start`] triggers a conversion, `read`
//! collects it after the settle time.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::bus::Port;
use crate::error::DriverError;
use crate::module::{InitContext, Module, Trigger};
use crate::payload::{Channel, Payload};

pub const ADDRESS: u8 = 0x5C;

const WHO_AM_I: u8 = 0x0F;
const CTRL_REG1: u8 = 0x10;
const CTRL_REG2: u8 = 0x11;
const STATUS: u8 = 0x27;
const PRESS_OUT_XL: u8 = 0x28;

const CHIP_ID: u8 = 0xB1;
/// ODR = one-shot, block data update
const CTRL1_ONE_SHOT_BDU: u8 = 0x02;
const CTRL2_IF_ADD_INC: u8 = 0x10;
const CTRL2_ONE_SHOT: u8 = 0x01;
const STATUS_P_DA: u8 = 0x01;

const CONVERSION_MS: u32 = 50;

/// 24-bit two's complement, LSB = 1/4096 hPa
fn raw_to_hpa(raw: [u8; 3]) -> f32 {
    let value = i32::from_le_bytes([raw[0], raw[1], raw[2], 0]) << 8 >> 8;
    value as f32 / 4096.0
}

#[derive(Debug, Default)]
pub struct Lps22hb {
    last_hpa: Option<f32>,
    sea_level_hpa: f32,
}

impl Lps22hb {
    pub const fn new() -> Self {
        Self {
            last_hpa: None,
            sea_level_hpa: 0.0,
        }
    }

    pub fn last_hpa(&self) -> Option<f32> {
        self.last_hpa
    }
}

impl<I: I2c, D: DelayNs> Module<I, D> for Lps22hb {
    fn init(&mut self, port: &mut Port<'_, I, D>, cx: &InitContext<'_>) -> Result<(), DriverError> {
        self.sea_level_hpa = cx.settings.sea_level_hpa;
        let id = port.read_register(WHO_AM_I)?;
        if id != CHIP_ID {
            return Err(DriverError::Signature {
                expected: CHIP_ID.into(),
                found: id.into(),
            });
        }
        port.write_register(CTRL_REG1, CTRL1_ONE_SHOT_BDU)
    }

    fn start(&mut self, port: &mut Port<'_, I, D>) -> Result<Trigger, DriverError> {
        port.write_register(CTRL_REG2, CTRL2_IF_ADD_INC | CTRL2_ONE_SHOT)?;
        Ok(Trigger::Settle { ms: CONVERSION_MS })
    }

    fn read(&mut self, port: &mut Port<'_, I, D>, payload: &mut dyn Payload) -> Result<(), DriverError> {
        if port.read_register(STATUS)? & STATUS_P_DA == 0 {
            return Err(DriverError::NotReady);
        }
        let mut raw = [0u8; 3];
        port.write_read(&[PRESS_OUT_XL], &mut raw)?;
        let hpa = raw_to_hpa(raw);
        if !(260.0..=1260.0).contains(&hpa) {
            return Err(DriverError::InvalidData);
        }
        debug!("LPS22HB P: {=f32} hPa, MSL: {=f32} hPa", hpa, self.sea_level_hpa);
        self.last_hpa = Some(hpa);
        payload.add_pressure(Channel::PRESSURE, hpa)?;
        Ok(())
    }

    fn release(&mut self, port: &mut Port<'_, I, D>) {
        self.last_hpa = None;
        // Power-down mode
        let _ = port.write_register(CTRL_REG1, 0x00);
    }
}
