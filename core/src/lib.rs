//! Platform-agnostic core logic for modular sensor-node firmware
//!
//! This crate contains the module discovery and dispatch machinery that is
//! shared across all supported boards. It has NO board dependencies; buses
//! come in through `embedded-hal` traits and storage through
//! `hal-abstractions`.
//!
//! # Flow
//!
//! ```text
//! probe::discover ──► DiscoverySession ──► resolve::resolve ──► Catalog
//!                                                                  │
//!            Payload ◄── Dispatcher::read_cycle ◄── Dispatcher::arbitrate
//! ```
//!
//! - [`probe`] sweeps every bus segment for ACKing addresses
//! - [`resolve`] maps hits onto [`catalog`] slots (conflicts, aggregates)
//! - [`dispatch`] runs driver init arbitration and the periodic read cycle
//! - [`module`] is the contract every driver in [`drivers`] implements

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

#[macro_use]
mod fmt;

pub mod bus;
pub mod catalog;
pub mod command;
pub mod dispatch;
pub mod drivers;
pub mod error;
pub mod module;
pub mod motion;
pub mod payload;
pub mod probe;
pub mod resolve;
pub mod settings;
pub mod status;
pub mod time;

#[cfg(test)]
mod testing;

pub use bus::{BusSegment, Buses, Port};
pub use catalog::{Catalog, ModuleKind, SlotId, SlotState};
pub use dispatch::{Abort, Dispatcher};
pub use error::{DiscoveryError, DriverError};
pub use module::{DriverTable, InitContext, Module, Trigger};
pub use payload::{Channel, LppPayload, Payload};
pub use probe::DiscoverySession;
pub use settings::Settings;
