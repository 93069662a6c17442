//! Error taxonomy
//!
//! | Condition              | Type                         | Effect                         |
//! |------------------------|------------------------------|--------------------------------|
//! | `BusInitFailure`       | [`DiscoveryError::BusInit`]  | fatal, propagated to the caller|
//! | `ProbeMiss`            | [`crate::probe::ProbeOutcome::Miss`] | benign, address absent |
//! | `DriverInitFailure`    | [`Rejection::InitFailed`]    | slot rejected                  |
//! | `TransientReadFailure` | [`crate::dispatch::ReadFailure`] | reading skipped this cycle |
//!
//! Only the first one ever leaves the core as an `Err`; everything else is
//! confined to the slot it happened on.

use embedded_hal::i2c::ErrorKind;

use crate::bus::BusSegment;
use crate::catalog::ModuleKind;

/// Discovery errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryError {
    /// The bus segment does not exist or could not carry a single transaction
    BusInit {
        /// Segment that failed
        segment: BusSegment,
    },
}

impl core::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BusInit { segment } => {
                write!(f, "Bus segment {} could not be initialized", segment.0)
            }
        }
    }
}

impl core::error::Error for DiscoveryError {}

/// Driver operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// Bus transaction failed
    Bus(ErrorKind),
    /// Device answered but its identification register didn't match
    Signature {
        /// Value the driver expects
        expected: u16,
        /// Value read from the device
        found: u16,
    },
    /// Checksum on received data didn't match
    Crc,
    /// Measurement not finished or data flagged invalid
    NotReady,
    /// Data read back was out of range
    InvalidData,
    /// Payload accumulator has no room for the reading
    PayloadFull,
    /// No driver is registered for this module
    Unsupported,
    /// A GPIO line could not be driven or sampled
    Pin,
}

impl core::fmt::Display for DriverError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bus(kind) => write!(f, "Bus error: {kind:?}"),
            Self::Signature { expected, found } => {
                write!(f, "Unexpected device id {found:#06x} (expected {expected:#06x})")
            }
            Self::Crc => write!(f, "CRC mismatch"),
            Self::NotReady => write!(f, "Measurement not ready"),
            Self::InvalidData => write!(f, "Invalid data"),
            Self::PayloadFull => write!(f, "Payload full"),
            Self::Unsupported => write!(f, "No driver for module"),
            Self::Pin => write!(f, "GPIO error"),
        }
    }
}

impl core::error::Error for DriverError {}

/// Why a slot ended up rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rejection {
    /// The driver's `init()` failed
    InitFailed(DriverError),
    /// No driver is registered for the module kind
    NoDriver,
    /// Another member of the conflict group is already active
    Arbitration,
    /// An active module claims this slot's address
    Claimed(ModuleKind),
}

impl core::fmt::Display for Rejection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InitFailed(err) => write!(f, "init failed: {err}"),
            Self::NoDriver => write!(f, "no driver"),
            Self::Arbitration => write!(f, "lost arbitration"),
            Self::Claimed(owner) => write!(f, "address claimed by {}", owner.part()),
        }
    }
}
