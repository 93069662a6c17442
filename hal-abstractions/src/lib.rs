//! Hardware abstraction traits for sensor-node firmware
//!
//! This crate defines traits that abstract over hardware differences
//! between boards. BSPs implement these traits.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

pub mod power;
pub mod pulse;
pub mod store;

pub use power::{PowerEnable, ProbePower};
pub use pulse::{pulse_high_us, MicrosClock};
pub use store::{MemoryStore, SettingsStore, StoreError};
