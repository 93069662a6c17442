//! RAK1906: Bosch BME680 environment sensor
//!
//! Temperature, humidity, pressure and gas resistance from one forced-mode
//! measurement. [`Module::start`] triggers it (heater included) and `read`
//! collects and compensates the result using the factory calibration read
//! at init time. Compensation follows the floating point formulas of the
//! Bosch reference driver.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::bus::Port;
use crate::error::DriverError;
use crate::module::{InitContext, Module, Trigger};
use crate::payload::{Channel, Payload};

pub const ADDRESS: u8 = 0x76;

mod reg {
    pub const RES_HEAT_VAL: u8 = 0x00;
    pub const RES_HEAT_RANGE: u8 = 0x02;
    pub const RANGE_SW_ERR: u8 = 0x04;
    pub const MEAS_STATUS_0: u8 = 0x1D;
    pub const PRESS_MSB: u8 = 0x1F;
    pub const RES_HEAT_0: u8 = 0x5A;
    pub const GAS_WAIT_0: u8 = 0x64;
    pub const CTRL_GAS_1: u8 = 0x71;
    pub const CTRL_HUM: u8 = 0x72;
    pub const CTRL_MEAS: u8 = 0x74;
    pub const CONFIG: u8 = 0x75;
    pub const COEFF_1: u8 = 0x89;
    pub const CHIP_ID: u8 = 0xD0;
    pub const RESET: u8 = 0xE0;
    pub const COEFF_2: u8 = 0xE1;
}

const CHIP_ID: u8 = 0x61;
const SOFT_RESET: u8 = 0xB6;

const COEFF_1_LEN: usize = 25;
const COEFF_2_LEN: usize = 16;

/// Humidity oversampling x2
const CTRL_HUM_OSRS_2X: u8 = 0b010;
/// Temperature x8, pressure x4, forced mode
const CTRL_MEAS_FORCED: u8 = (0b100 << 5) | (0b011 << 2) | 0b01;
/// IIR filter coefficient 3
const CONFIG_FILTER_3: u8 = 0b010 << 2;
/// run_gas, heater set-point 0
const CTRL_GAS_RUN: u8 = 0x10;

const STATUS_NEW_DATA: u8 = 0x80;
const GAS_VALID: u8 = 0x20;
const HEAT_STAB: u8 = 0x10;

const HEATER_TARGET_C: f32 = 320.0;
const HEATER_AMBIENT_C: f32 = 25.0;
const HEATER_DURATION_MS: u16 = 150;

/// TPH conversion at the configured oversampling plus the heater phase
const MEASUREMENT_MS: u32 = 100 + HEATER_DURATION_MS as u32;

const GAS_RANGE_K1: [f32; 16] = [
    0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, -0.8, 0.0, 0.0, -0.2, -0.5, 0.0, -1.0, 0.0, 0.0,
];
const GAS_RANGE_K2: [f32; 16] = [
    0.0, 0.0, 0.0, 0.0, 0.1, 0.7, 0.0, -0.8, -0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
];

/// Factory calibration
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Calibration {
    t1: f32,
    t2: f32,
    t3: f32,
    p1: f32,
    p2: f32,
    p3: f32,
    p4: f32,
    p5: f32,
    p6: f32,
    p7: f32,
    p8: f32,
    p9: f32,
    p10: f32,
    h1: f32,
    h2: f32,
    h3: f32,
    h4: f32,
    h5: f32,
    h6: f32,
    h7: f32,
    gh1: f32,
    gh2: f32,
    gh3: f32,
    res_heat_range: u8,
    res_heat_val: i8,
    range_sw_err: i8,
}

impl Calibration {
    /// Parse both coefficient blocks, laid out back to back.
    fn parse(c: &[u8; COEFF_1_LEN + COEFF_2_LEN], res_heat_val: u8, res_heat_range: u8, range_sw_err: u8) -> Self {
        let u16_at = |i: usize| f32::from(u16::from_le_bytes([c[i], c[i + 1]]));
        let i16_at = |i: usize| f32::from(i16::from_le_bytes([c[i], c[i + 1]]));
        let i8_at = |i: usize| f32::from(c[i] as i8);
        Self {
            t1: u16_at(33),
            t2: i16_at(1),
            t3: i8_at(3),
            p1: u16_at(5),
            p2: i16_at(7),
            p3: i8_at(9),
            p4: i16_at(11),
            p5: i16_at(13),
            p6: i8_at(16),
            p7: i8_at(15),
            p8: i16_at(19),
            p9: i16_at(21),
            p10: f32::from(c[23]),
            h1: f32::from((u16::from(c[27]) << 4) | u16::from(c[26] & 0x0F)),
            h2: f32::from((u16::from(c[25]) << 4) | u16::from(c[26] >> 4)),
            h3: i8_at(28),
            h4: i8_at(29),
            h5: i8_at(30),
            h6: f32::from(c[31]),
            h7: i8_at(32),
            gh1: i8_at(37),
            gh2: i16_at(35),
            gh3: i8_at(38),
            res_heat_range: (res_heat_range & 0x30) >> 4,
            res_heat_val: res_heat_val as i8,
            range_sw_err: (range_sw_err as i8) >> 4,
        }
    }

    /// Returns (°C, t_fine).
    fn temperature(&self, adc: u32) -> (f32, f32) {
        let adc = adc as f32;
        let var1 = (adc / 16384.0 - self.t1 / 1024.0) * self.t2;
        let d = adc / 131072.0 - self.t1 / 8192.0;
        let var2 = d * d * (self.t3 * 16.0);
        let t_fine = var1 + var2;
        (t_fine / 5120.0, t_fine)
    }

    /// Pressure in Pa.
    fn pressure(&self, adc: u32, t_fine: f32) -> f32 {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * (self.p6 / 131072.0);
        var2 += var1 * self.p5 * 2.0;
        var2 = var2 / 4.0 + self.p4 * 65536.0;
        var1 = (self.p3 * var1 * var1 / 16384.0 + self.p2 * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * self.p1;
        if var1 == 0.0 {
            return 0.0;
        }
        let mut p = 1048576.0 - adc as f32;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = self.p9 * p * p / 2147483648.0;
        let var2 = p * (self.p8 / 32768.0);
        let q = p / 256.0;
        let var3 = q * q * q * (self.p10 / 131072.0);
        p + (var1 + var2 + var3 + self.p7 * 128.0) / 16.0
    }

    /// Relative humidity in %, clamped to 0..=100.
    fn humidity(&self, adc: u16, t_fine: f32) -> f32 {
        let t = t_fine / 5120.0;
        let var1 = f32::from(adc) - (self.h1 * 16.0 + self.h3 / 2.0 * t);
        let var2 = var1
            * (self.h2 / 262144.0
                * (1.0 + self.h4 / 16384.0 * t + self.h5 / 1048576.0 * t * t));
        let var3 = self.h6 / 16384.0;
        let var4 = self.h7 / 2097152.0;
        (var2 + (var3 + var4 * t) * var2 * var2).clamp(0.0, 100.0)
    }

    /// Gas resistance in Ω.
    fn gas_resistance(&self, adc: u16, range: u8) -> f32 {
        let range = usize::from(range & 0x0F);
        let var1 = 1340.0 + 5.0 * f32::from(self.range_sw_err);
        let var2 = var1 * (1.0 + GAS_RANGE_K1[range] / 100.0);
        let var3 = 1.0 + GAS_RANGE_K2[range] / 100.0;
        1.0 / (var3 * 0.000000125 * (1u32 << range) as f32 * ((f32::from(adc) - 512.0) / var2 + 1.0))
    }

    /// Heater resistance code for `target` °C at `ambient` °C.
    fn heater_resistance(&self, target: f32, ambient: f32) -> u8 {
        let var1 = self.gh1 / 16.0 + 49.0;
        let var2 = self.gh2 / 32768.0 * 0.0005 + 0.00235;
        let var3 = self.gh3 / 1024.0;
        let var4 = var1 * (1.0 + var2 * target);
        let var5 = var4 + var3 * ambient;
        let range = f32::from(self.res_heat_range);
        let res = 3.4
            * (var5 * (4.0 / (4.0 + range)) * (1.0 / (1.0 + f32::from(self.res_heat_val) * 0.002))
                - 25.0);
        res.clamp(0.0, 255.0) as u8
    }
}

/// Heater duration code: 6-bit value with a 2-bit x4 multiplier.
fn gas_wait(mut ms: u16) -> u8 {
    if ms >= 0x0FC0 {
        return 0xFF;
    }
    let mut factor = 0u8;
    while ms > 0x3F {
        ms /= 4;
        factor += 1;
    }
    ms as u8 + factor * 64
}

/// One compensated reading
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    pub celsius: f32,
    pub humidity: f32,
    pub hpa: f32,
    /// `None` when the heater didn't stabilise
    pub gas_kohm: Option<f32>,
}

#[derive(Debug, Default)]
pub struct Bme680 {
    calibration: Option<Calibration>,
    last: Option<Measurement>,
}

impl Bme680 {
    pub const fn new() -> Self {
        Self {
            calibration: None,
            last: None,
        }
    }

    pub fn last(&self) -> Option<Measurement> {
        self.last
    }

    fn read_calibration<I: I2c, D: DelayNs>(port: &mut Port<'_, I, D>) -> Result<Calibration, DriverError> {
        let mut coeff = [0u8; COEFF_1_LEN + COEFF_2_LEN];
        port.write_read(&[reg::COEFF_1], &mut coeff[..COEFF_1_LEN])?;
        port.write_read(&[reg::COEFF_2], &mut coeff[COEFF_1_LEN..])?;
        let res_heat_val = port.read_register(reg::RES_HEAT_VAL)?;
        let res_heat_range = port.read_register(reg::RES_HEAT_RANGE)?;
        let range_sw_err = port.read_register(reg::RANGE_SW_ERR)?;
        Ok(Calibration::parse(&coeff, res_heat_val, res_heat_range, range_sw_err))
    }
}

impl<I: I2c, D: DelayNs> Module<I, D> for Bme680 {
    fn init(&mut self, port: &mut Port<'_, I, D>, _cx: &InitContext<'_>) -> Result<(), DriverError> {
        let id = port.read_register(reg::CHIP_ID)?;
        if id != CHIP_ID {
            return Err(DriverError::Signature {
                expected: CHIP_ID.into(),
                found: id.into(),
            });
        }
        port.write_register(reg::RESET, SOFT_RESET)?;
        port.delay_ms(10);

        let calibration = Self::read_calibration(port)?;

        port.write_register(reg::CTRL_HUM, CTRL_HUM_OSRS_2X)?;
        port.write_register(reg::CONFIG, CONFIG_FILTER_3)?;
        port.write_register(
            reg::RES_HEAT_0,
            calibration.heater_resistance(HEATER_TARGET_C, HEATER_AMBIENT_C),
        )?;
        port.write_register(reg::GAS_WAIT_0, gas_wait(HEATER_DURATION_MS))?;
        port.write_register(reg::CTRL_GAS_1, CTRL_GAS_RUN)?;

        self.calibration = Some(calibration);
        Ok(())
    }

    fn start(&mut self, port: &mut Port<'_, I, D>) -> Result<Trigger, DriverError> {
        port.write_register(reg::CTRL_MEAS, CTRL_MEAS_FORCED)?;
        Ok(Trigger::Settle { ms: MEASUREMENT_MS })
    }

    fn read(&mut self, port: &mut Port<'_, I, D>, payload: &mut dyn Payload) -> Result<(), DriverError> {
        let calibration = self.calibration.ok_or(DriverError::NotReady)?;
        if port.read_register(reg::MEAS_STATUS_0)? & STATUS_NEW_DATA == 0 {
            return Err(DriverError::NotReady);
        }

        // 0x1F..=0x2B
        let mut d = [0u8; 13];
        port.write_read(&[reg::PRESS_MSB], &mut d)?;
        let adc20 = |b: &[u8]| (u32::from(b[0]) << 12) | (u32::from(b[1]) << 4) | (u32::from(b[2]) >> 4);
        let press_adc = adc20(&d[0..3]);
        let temp_adc = adc20(&d[3..6]);
        let hum_adc = u16::from_be_bytes([d[6], d[7]]);
        let gas_adc = (u16::from(d[11]) << 2) | u16::from(d[12] >> 6);
        let gas_flags = d[12];

        let (celsius, t_fine) = calibration.temperature(temp_adc);
        let m = Measurement {
            celsius,
            humidity: calibration.humidity(hum_adc, t_fine),
            hpa: calibration.pressure(press_adc, t_fine) / 100.0,
            gas_kohm: (gas_flags & (GAS_VALID | HEAT_STAB) == GAS_VALID | HEAT_STAB)
                .then(|| calibration.gas_resistance(gas_adc, gas_flags & 0x0F) / 1000.0),
        };
        debug!(
            "BME680 T: {=f32} H: {=f32} P: {=f32}",
            m.celsius, m.humidity, m.hpa
        );
        self.last = Some(m);

        payload.add_humidity(Channel::ENV_HUMIDITY, m.humidity)?;
        payload.add_temperature(Channel::ENV_TEMPERATURE, m.celsius)?;
        payload.add_pressure(Channel::ENV_PRESSURE, m.hpa)?;
        match m.gas_kohm {
            Some(kohm) => payload.add_analog(Channel::ENV_GAS, kohm)?,
            None => warn!("BME680 gas reading not valid"),
        }
        Ok(())
    }

    fn release(&mut self, port: &mut Port<'_, I, D>) {
        self.calibration = None;
        self.last = None;
        // Sleep mode
        let _ = port.write_register(reg::CTRL_MEAS, 0x00);
    }
}
