//! Module drivers
//!
//! One driver per supported WisBlock module. [`WisblockDrivers`] bundles them
//! into the [`DriverTable`] the dispatcher looks drivers up in; catalog
//! slots without an entry here are rejected at arbitration. [`Ultrasonic`]
//! sits on GPIO rather than I2C and is driven by the board directly.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::catalog::ModuleKind;
use crate::module::{DriverTable, Module};

pub mod bme680;
pub mod lis3dh;
pub mod lps22hb;
pub mod opt3001;
pub mod rv3028;
pub mod sgp40;
pub mod shtc3;
pub mod ultrasonic;
pub mod voc_index;

pub use bme680::Bme680;
pub use lis3dh::Lis3dh;
pub use lps22hb::Lps22hb;
pub use opt3001::Opt3001;
pub use rv3028::Rv3028;
pub use sgp40::Sgp40;
pub use shtc3::Shtc3;
pub use ultrasonic::Ultrasonic;

/// Every driver this crate ships
#[derive(Debug, Default)]
pub struct WisblockDrivers {
    pub shtc3: Shtc3,
    pub lps22hb: Lps22hb,
    pub opt3001: Opt3001,
    pub lis3dh: Lis3dh,
    pub bme680: Bme680,
    pub rv3028: Rv3028,
    pub sgp40: Sgp40,
}

impl WisblockDrivers {
    pub const fn new() -> Self {
        Self {
            shtc3: Shtc3::new(),
            lps22hb: Lps22hb::new(),
            opt3001: Opt3001,
            lis3dh: Lis3dh::new(),
            bme680: Bme680::new(),
            rv3028: Rv3028::new(),
            sgp40: Sgp40::new(),
        }
    }
}

/// The VOC sensor is handed the RAK1901's latest reading every time it is
/// looked up, so each measurement uses the freshest compensation.
impl<I: I2c, D: DelayNs> DriverTable<I, D> for WisblockDrivers {
    fn driver(&mut self, kind: ModuleKind) -> Option<&mut dyn Module<I, D>> {
        match kind {
            ModuleKind::Rak1901 => Some(&mut self.shtc3),
            ModuleKind::Rak1902 => Some(&mut self.lps22hb),
            ModuleKind::Rak1903 => Some(&mut self.opt3001),
            ModuleKind::Rak1904 => Some(&mut self.lis3dh),
            ModuleKind::Rak1906 => Some(&mut self.bme680),
            ModuleKind::Rak12002 => Some(&mut self.rv3028),
            ModuleKind::Rak12047 => {
                self.sgp40.set_ambient(self.shtc3.last());
                Some(&mut self.sgp40)
            }
            _ => None,
        }
    }
}
