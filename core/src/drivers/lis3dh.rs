//! RAK1904: ST LIS3DH accelerometer, used as a motion trigger
//!
//! Interrupt generator 1 latches on high-g events on any axis and drives
//! INT1. The latch is cleared by reading `INT1_SRC`, which is what
//! [`Module::acknowledge`] does once the control loop has handled the event.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::bus::Port;
use crate::error::DriverError;
use crate::module::{InitContext, Module};
use crate::payload::Payload;
use crate::settings::GnssFormat;

pub const ADDRESS: u8 = 0x18;

const CTRL_REG0: u8 = 0x1E;
const WHO_AM_I: u8 = 0x0F;
const CTRL_REG1: u8 = 0x20;
const CTRL_REG2: u8 = 0x21;
const CTRL_REG3: u8 = 0x22;
const CTRL_REG4: u8 = 0x23;
const CTRL_REG5: u8 = 0x24;
const CTRL_REG6: u8 = 0x25;
const OUT_X_L: u8 = 0x28;
const INT1_CFG: u8 = 0x30;
const INT1_SRC: u8 = 0x31;
const INT1_THS: u8 = 0x32;
const INT1_DURATION: u8 = 0x33;

/// Sub-address auto-increment
const AUTO_INCREMENT: u8 = 0x80;

const CHIP_ID: u8 = 0x33;

/// 10 Hz, X/Y/Z enabled
const CTRL1_10HZ_XYZ: u8 = 0x27;
const CTRL1_LOW_POWER: u8 = 0x08;
/// +-4 g
const CTRL4_FS_4G: u8 = 0x10;
/// High event on Z, Y and X
const INT1_CFG_HIGH_XYZ: u8 = 0x2A;
/// IA1 and IA2 routed to INT1
const CTRL3_I1_IA1_IA2: u8 = 0x60;
const CTRL2_HP_IA1: u8 = 0x01;
const CTRL5_LIR_INT1: u8 = 0x08;
/// SDO pull-up disconnected
const CTRL0_SDO_PU_DISC: u8 = 0x90;

/// 1/8 of full scale
const THRESHOLD_DEFAULT: u8 = 0x10;
/// Lower threshold for mapping, where every movement counts
const THRESHOLD_MAPPER: u8 = 0x03;

/// One ODR period
const DURATION_ONE_SAMPLE: u8 = 0x01;

const SETTLE_MS: u32 = 100;

/// Acceleration in g, low-power 8-bit output at +-4 g
fn raw_to_g(lo: u8, hi: u8) -> f32 {
    f32::from(i16::from_le_bytes([lo, hi]) >> 8) * 0.032
}

#[derive(Debug)]
pub struct Lis3dh {
    threshold: u8,
}

impl Default for Lis3dh {
    fn default() -> Self {
        Self::new()
    }
}

impl Lis3dh {
    pub const fn new() -> Self {
        Self {
            threshold: THRESHOLD_DEFAULT,
        }
    }

    /// Interrupt threshold for the given GNSS payload format.
    pub const fn threshold_for(format: GnssFormat) -> u8 {
        match format {
            GnssFormat::HeliumMapper => THRESHOLD_MAPPER,
            _ => THRESHOLD_DEFAULT,
        }
    }

    /// Threshold in use since the last `init()`.
    pub fn threshold(&self) -> u8 {
        self.threshold
    }
}

impl<I: I2c, D: DelayNs> Module<I, D> for Lis3dh {
    fn init(&mut self, port: &mut Port<'_, I, D>, cx: &InitContext<'_>) -> Result<(), DriverError> {
        let id = port.read_register(WHO_AM_I)?;
        if id != CHIP_ID {
            return Err(DriverError::Signature {
                expected: CHIP_ID.into(),
                found: id.into(),
            });
        }

        self.threshold = Self::threshold_for(cx.settings.gnss_format);

        port.write_register(CTRL_REG1, CTRL1_10HZ_XYZ)?;
        port.write_register(CTRL_REG4, CTRL4_FS_4G)?;
        port.write_register(INT1_CFG, INT1_CFG_HIGH_XYZ)?;
        port.write_register(INT1_THS, self.threshold)?;
        port.write_register(INT1_DURATION, DURATION_ONE_SAMPLE)?;
        port.modify_register(CTRL_REG5, 0xF3, CTRL5_LIR_INT1)?;
        port.write_register(CTRL_REG3, CTRL3_I1_IA1_IA2)?;
        port.write_register(CTRL_REG6, 0x00)?;
        port.write_register(CTRL_REG2, CTRL2_HP_IA1)?;
        port.modify_register(CTRL_REG1, 0xFF, CTRL1_LOW_POWER)?;
        port.delay_ms(SETTLE_MS);
        port.modify_register(CTRL_REG0, 0xFF, CTRL0_SDO_PU_DISC)?;
        port.delay_ms(SETTLE_MS);

        // Start with a clear latch
        port.read_register(INT1_SRC)?;
        Ok(())
    }

    fn read(&mut self, port: &mut Port<'_, I, D>, _payload: &mut dyn Payload) -> Result<(), DriverError> {
        let mut raw = [0u8; 6];
        port.write_read(&[OUT_X_L | AUTO_INCREMENT], &mut raw)?;
        let (x, y, z) = (
            raw_to_g(raw[0], raw[1]),
            raw_to_g(raw[2], raw[3]),
            raw_to_g(raw[4], raw[5]),
        );
        debug!("LIS3DH x: {=f32} y: {=f32} z: {=f32} g", x, y, z);
        Ok(())
    }

    fn acknowledge(&mut self, port: &mut Port<'_, I, D>) -> Result<(), DriverError> {
        let source = port.read_register(INT1_SRC)?;
        trace!("LIS3DH INT1_SRC {=u8:#x}", source);
        Ok(())
    }

    fn release(&mut self, port: &mut Port<'_, I, D>) {
        // Power-down: ODR = 0
        let _ = port.write_register(CTRL_REG1, 0x00);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::testing::{FakeBus, NoDelay, RecordingPayload};

    fn accelerometer() -> FakeBus {
        let mut bus = FakeBus::new();
        let dev = bus.attach(ADDRESS);
        dev.regs[WHO_AM_I as usize] = CHIP_ID;
        dev.regs[CTRL_REG5 as usize] = 0b1100_0100;
        bus
    }

    fn init_with(bus: &mut FakeBus, settings: &Settings) -> Lis3dh {
        let mut delay = NoDelay;
        let mut port = Port::new(bus, &mut delay, ADDRESS);
        let mut sensor = Lis3dh::new();
        sensor.init(&mut port, &InitContext { settings }).unwrap();
        sensor
    }

    #[test]
    fn test_latched_interrupt_configuration() {
        let mut bus = accelerometer();
        init_with(&mut bus, &Settings::default());
        let regs = &bus.device(ADDRESS).unwrap().regs;
        assert_eq!(regs[INT1_CFG as usize], 0x2A);
        assert_eq!(regs[INT1_THS as usize], THRESHOLD_DEFAULT);
        assert_eq!(regs[INT1_DURATION as usize], 0x01);
        // Latch bit set, unrelated bits kept
        assert_eq!(regs[CTRL_REG5 as usize], 0b1100_1000);
        assert_eq!(regs[CTRL_REG1 as usize], CTRL1_10HZ_XYZ | CTRL1_LOW_POWER);
    }

    #[test]
    fn test_mapper_format_lowers_threshold() {
        let mut bus = accelerometer();
        let settings = Settings {
            gnss_format: GnssFormat::HeliumMapper,
            ..Settings::default()
        };
        let sensor = init_with(&mut bus, &settings);
        assert_eq!(sensor.threshold(), THRESHOLD_MAPPER);
        assert_eq!(bus.device(ADDRESS).unwrap().regs[INT1_THS as usize], 0x03);
    }

    #[test]
    fn test_acknowledge_reads_int1_src() {
        let mut bus = accelerometer();
        let mut sensor = init_with(&mut bus, &Settings::default());
        let mut delay = NoDelay;
        {
            let mut port = Port::new(&mut bus, &mut delay, ADDRESS);
            sensor.acknowledge(&mut port).unwrap();
        }
        let writes = &bus.device(ADDRESS).unwrap().writes;
        assert_eq!(writes.last().unwrap(), &[INT1_SRC]);
    }

    #[test]
    fn test_read_adds_nothing_to_payload() {
        let mut bus = accelerometer();
        let mut sensor = init_with(&mut bus, &Settings::default());
        let mut delay = NoDelay;
        let mut port = Port::new(&mut bus, &mut delay, ADDRESS);
        let mut payload = RecordingPayload::new();
        sensor.read(&mut port, &mut payload).unwrap();
        assert!(payload.records.is_empty());
    }

    #[test]
    fn test_g_conversion() {
        assert!((raw_to_g(0x00, 0x20) - 1.024).abs() < 1e-4);
        assert!((raw_to_g(0x00, 0xE0) + 1.024).abs() < 1e-4);
    }
}
