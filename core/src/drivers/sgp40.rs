//! RAK12047: Sensirion SGP40 VOC sensor
//!
//! The raw signal only means something after the gas index algorithm has
//! watched it for a while, so the sensor is sampled once a second through
//! [`Module::sample`]. The first [`DISCARDED_SAMPLES`] indices are thrown
//! away; after that each new index is averaged with the previous one and
//! the result is what a read cycle reports.
//!
//! Measurements are compensated with the RAK1901's last humidity and
//! temperature when one is active.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use super::shtc3::{checked_word, crc8, Measurement};
use super::voc_index::VocIndex;
use crate::bus::Port;
use crate::error::DriverError;
use crate::module::{InitContext, Module, Trigger};
use crate::payload::{Channel, Payload};

pub const ADDRESS: u8 = 0x59;

const CMD_GET_SERIAL: u16 = 0x3682;
const CMD_SELF_TEST: u16 = 0x280E;
const CMD_MEASURE_RAW: u16 = 0x260F;
const CMD_HEATER_OFF: u16 = 0x3615;

const SELF_TEST_PASSED: u16 = 0xD400;

const SERIAL_MS: u32 = 1;
const SELF_TEST_MS: u32 = 320;
const MEASURE_MS: u32 = 30;

/// Compensation words for 50 %RH, 25 °C
const DEFAULT_RH: u16 = 0x8000;
const DEFAULT_T: u16 = 0x6666;

pub const DISCARDED_SAMPLES: u16 = 100;

/// Humidity and temperature as the sensor's compensation ticks
fn compensation(ambient: Option<Measurement>) -> (u16, u16) {
    ambient.map_or((DEFAULT_RH, DEFAULT_T), |m| {
        let rh = m.humidity.clamp(0.0, 100.0) * 65535.0 / 100.0;
        let t = (m.celsius.clamp(-45.0, 130.0) + 45.0) * 65535.0 / 175.0;
        (rh as u16, t as u16)
    })
}

#[derive(Debug, Default)]
pub struct Sgp40 {
    algorithm: VocIndex,
    ambient: Option<Measurement>,
    /// Indices computed so far, stops counting once past the discard window
    samples: u16,
    index: Option<u16>,
    serial: Option<u64>,
}

impl Sgp40 {
    pub const fn new() -> Self {
        Self {
            algorithm: VocIndex::new(),
            ambient: None,
            samples: 0,
            index: None,
            serial: None,
        }
    }

    /// Humidity and temperature used for the next measurements.
    pub fn set_ambient(&mut self, ambient: Option<Measurement>) {
        self.ambient = ambient;
    }

    /// Averaged VOC index, `None` while still inside the discard window.
    pub fn index(&self) -> Option<u16> {
        self.index
    }

    /// 48-bit serial number read at init.
    pub fn serial(&self) -> Option<u64> {
        self.serial
    }

    fn command<I: I2c, D: DelayNs>(port: &mut Port<'_, I, D>, cmd: u16) -> Result<(), DriverError> {
        port.write(&cmd.to_be_bytes())
    }

    fn read_serial<I: I2c, D: DelayNs>(port: &mut Port<'_, I, D>) -> Result<u64, DriverError> {
        Self::command(port, CMD_GET_SERIAL)?;
        port.delay_ms(SERIAL_MS);
        let mut raw = [0u8; 9];
        port.read(&mut raw)?;
        raw.chunks(3).try_fold(0u64, |serial, word| {
            Ok((serial << 16) | u64::from(checked_word(word)?))
        })
    }

    fn trigger<I: I2c, D: DelayNs>(&self, port: &mut Port<'_, I, D>) -> Result<(), DriverError> {
        let [cmd_msb, cmd_lsb] = CMD_MEASURE_RAW.to_be_bytes();
        let (rh, t) = compensation(self.ambient);
        let [rh_msb, rh_lsb] = rh.to_be_bytes();
        let [t_msb, t_lsb] = t.to_be_bytes();
        port.write(&[
            cmd_msb,
            cmd_lsb,
            rh_msb,
            rh_lsb,
            crc8(&[rh_msb, rh_lsb]),
            t_msb,
            t_lsb,
            crc8(&[t_msb, t_lsb]),
        ])
    }

    /// Collect a triggered measurement and run it through the algorithm.
    fn fetch<I: I2c, D: DelayNs>(&mut self, port: &mut Port<'_, I, D>) -> Result<(), DriverError> {
        let mut raw = [0u8; 3];
        port.read(&mut raw)?;
        let sraw = checked_word(&raw)?;
        let index = self.algorithm.process(sraw);
        trace!("SGP40 raw {=u16} index {=u16}", sraw, index);

        if self.samples < DISCARDED_SAMPLES {
            self.samples += 1;
            return Ok(());
        }
        self.index = Some(match self.index {
            Some(previous) => ((u32::from(previous) + u32::from(index)) / 2) as u16,
            None => index,
        });
        Ok(())
    }
}

impl<I: I2c, D: DelayNs> Module<I, D> for Sgp40 {
    fn init(&mut self, port: &mut Port<'_, I, D>, _cx: &InitContext<'_>) -> Result<(), DriverError> {
        *self = Self {
            ambient: self.ambient,
            ..Self::new()
        };
        let serial = Self::read_serial(port)?;

        Self::command(port, CMD_SELF_TEST)?;
        port.delay_ms(SELF_TEST_MS);
        let mut raw = [0u8; 3];
        port.read(&mut raw)?;
        let result = checked_word(&raw)?;
        if result != SELF_TEST_PASSED {
            return Err(DriverError::Signature {
                expected: SELF_TEST_PASSED,
                found: result,
            });
        }
        info!("SGP40 serial {=u64:012x}", serial);
        self.serial = Some(serial);
        Ok(())
    }

    /// A read cycle's measurement counts as one more sample.
    fn start(&mut self, port: &mut Port<'_, I, D>) -> Result<Trigger, DriverError> {
        self.trigger(port)?;
        Ok(Trigger::Settle { ms: MEASURE_MS })
    }

    fn read(&mut self, port: &mut Port<'_, I, D>, payload: &mut dyn Payload) -> Result<(), DriverError> {
        self.fetch(port)?;
        match self.index {
            Some(index) => {
                debug!("SGP40 VOC index {=u16}", index);
                payload.add_voc_index(Channel::VOC, index)?;
            }
            None => debug!(
                "SGP40 learning, {=u16} sample(s) to go",
                DISCARDED_SAMPLES + 1 - self.samples
            ),
        }
        Ok(())
    }

    fn sample(&mut self, port: &mut Port<'_, I, D>) -> Result<(), DriverError> {
        self.trigger(port)?;
        port.delay_ms(MEASURE_MS);
        self.fetch(port)
    }

    fn release(&mut self, port: &mut Port<'_, I, D>) {
        let _ = Self::command(port, CMD_HEATER_OFF);
    }
}
