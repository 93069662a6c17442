//! Dispatch cycle
//!
//! Owns the [`Catalog`] and drives every slot through
//!
//! ```text
//! Absent ──resolve──► Candidate ──arbitrate──► Active ──read_cycle──► ...
//!                               └────────────► Rejected
//! ```
//!
//! Drivers are looked up through a [`DriverTable`] on every call; the
//! dispatcher itself never holds a driver or a bus.

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, I2c};
use heapless::Vec;

use crate::bus::Buses;
use crate::catalog::{Catalog, ModuleKind, Slot, SlotId, SlotState};
use crate::error::{DriverError, Rejection};
use crate::module::{DriverTable, InitContext, Trigger};
use crate::payload::Payload;
use crate::probe::DiscoverySession;
use crate::resolve::{resolve, Resolution};

/// Settle waits are sliced into steps this long, checking [`Abort`] in between
pub const SETTLE_POLL_MS: u32 = 10;

/// Longest settle time honoured for a single module
pub const MAX_SETTLE_MS: u32 = 1000;

/// Cancellation request for a running read cycle
///
/// Raised from another task (rescan or shutdown request); the read cycle
/// polls it during settle waits.
#[derive(Debug, Default)]
pub struct Abort(AtomicBool);

impl Abort {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome counts of one arbitration pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Arbitration {
    pub activated: usize,
    pub rejected: usize,
}

/// Result of a rescan: resolution summary plus arbitration counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rescan<const N: usize> {
    pub resolution: Resolution<N>,
    pub arbitration: Arbitration,
}

/// A reading skipped this cycle; the slot stays active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadFailure {
    pub slot: SlotId,
    pub kind: ModuleKind,
    pub error: DriverError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleOutcome {
    Completed,
    /// Cancelled; `slot` had its measurement released unread
    Aborted { slot: Option<SlotId> },
}

/// What one read cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport<const N: usize> {
    /// Slots whose readings went into the payload
    pub read: usize,
    pub failures: Vec<ReadFailure, N>,
    pub outcome: CycleOutcome,
}

/// Catalog owner running arbitration, read cycles and shutdown
#[derive(Debug, Clone)]
pub struct Dispatcher<const N: usize> {
    catalog: Catalog<N>,
}

impl<const N: usize> Dispatcher<N> {
    pub fn new(catalog: Catalog<N>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog<N> {
        &self.catalog
    }

    /// Apply a discovery session to the catalog.
    ///
    /// Drivers of dropped modules are not released here; use
    /// [`Self::rescan`] for the full sequence.
    pub fn resolve(&mut self, session: DiscoverySession) -> Resolution<N> {
        resolve(session, &mut self.catalog)
    }

    /// Initialize candidates in priority order.
    ///
    /// For each candidate: an active owner's range claim or an active
    /// member of its conflict group rejects it without an `init()`; a missing
    /// driver rejects it; otherwise `init()` decides. A failed driver is
    /// released. Running this twice in a row changes nothing the second time.
    pub fn arbitrate<I, D, T>(
        &mut self,
        buses: &mut Buses<I, D>,
        drivers: &mut T,
        cx: &InitContext<'_>,
    ) -> Arbitration
    where
        I: I2c,
        D: DelayNs,
        T: DriverTable<I, D> + ?Sized,
    {
        let mut summary = Arbitration::default();

        for id in self.catalog.arbitration_order() {
            let Some(slot) = self.catalog.slot(id).copied() else {
                continue;
            };
            if slot.state != SlotState::Candidate {
                continue;
            }

            let state = match self.precheck(&slot) {
                Some(rejection) => SlotState::Rejected(rejection),
                None => Self::try_init(&slot, buses, drivers, cx),
            };

            match state {
                SlotState::Active => {
                    info!("{=str} active at {=u8:#x}", slot.kind().part(), slot.address());
                    summary.activated += 1;
                }
                SlotState::Rejected(rejection) => {
                    warn!("{=str} rejected: {}", slot.kind().part(), rejection);
                    summary.rejected += 1;
                }
                _ => {}
            }
            self.catalog.set_state(id, state);
        }

        summary
    }

    /// Reason to reject `slot` without trying its driver.
    fn precheck(&self, slot: &Slot) -> Option<Rejection> {
        let claimed = self.catalog.active().find(|owner| {
            owner.id != slot.id
                && self
                    .catalog
                    .claim_of(owner.kind())
                    .is_some_and(|range| range.contains(slot.segment(), slot.address()))
        });
        if let Some(owner) = claimed {
            return Some(Rejection::Claimed(owner.kind()));
        }
        if self
            .catalog
            .conflicts(slot.id)
            .any(|other| other.state == SlotState::Active)
        {
            return Some(Rejection::Arbitration);
        }
        None
    }

    fn try_init<I, D, T>(
        slot: &Slot,
        buses: &mut Buses<I, D>,
        drivers: &mut T,
        cx: &InitContext<'_>,
    ) -> SlotState
    where
        I: I2c,
        D: DelayNs,
        T: DriverTable<I, D> + ?Sized,
    {
        let Some(driver) = drivers.driver(slot.kind()) else {
            return SlotState::Rejected(Rejection::NoDriver);
        };
        let Some(mut port) = buses.port(slot.segment(), slot.address()) else {
            return SlotState::Rejected(Rejection::InitFailed(DriverError::Bus(ErrorKind::Other)));
        };
        match driver.init(&mut port, cx) {
            Ok(()) => SlotState::Active,
            Err(e) => {
                driver.release(&mut port);
                SlotState::Rejected(Rejection::InitFailed(e))
            }
        }
    }

    /// Resolve a fresh session, release drivers of removed modules and
    /// arbitrate the new candidates.
    pub fn rescan<I, D, T>(
        &mut self,
        session: DiscoverySession,
        buses: &mut Buses<I, D>,
        drivers: &mut T,
        cx: &InitContext<'_>,
    ) -> Rescan<N>
    where
        I: I2c,
        D: DelayNs,
        T: DriverTable<I, D> + ?Sized,
    {
        let resolution = resolve(session, &mut self.catalog);
        for id in &resolution.dropped {
            if let Some(slot) = self.catalog.slot(*id).copied() {
                Self::release(&slot, buses, drivers);
            }
        }
        let arbitration = self.arbitrate(buses, drivers, cx);
        Rescan {
            resolution,
            arbitration,
        }
    }

    fn release<I, D, T>(slot: &Slot, buses: &mut Buses<I, D>, drivers: &mut T)
    where
        I: I2c,
        D: DelayNs,
        T: DriverTable<I, D> + ?Sized,
    {
        if let (Some(driver), Some(mut port)) = (
            drivers.driver(slot.kind()),
            buses.port(slot.segment(), slot.address()),
        ) {
            driver.release(&mut port);
        }
    }

    /// Read every active slot, in slot order, into `payload`.
    ///
    /// A slot whose read fails contributes nothing: whatever it added
    /// before failing is cut off again.
    ///
    /// Two-phase modules are started first and waited on in
    /// [`SETTLE_POLL_MS`] steps. When `abort` is raised the pending
    /// measurement is released and the cycle stops.
    pub fn read_cycle<I, D, T>(
        &mut self,
        buses: &mut Buses<I, D>,
        drivers: &mut T,
        payload: &mut dyn Payload,
        abort: &Abort,
    ) -> CycleReport<N>
    where
        I: I2c,
        D: DelayNs,
        T: DriverTable<I, D> + ?Sized,
    {
        let mut report = CycleReport {
            read: 0,
            failures: Vec::new(),
            outcome: CycleOutcome::Completed,
        };

        for index in 0..self.catalog.slots().len() {
            let slot = self.catalog.slots()[index];
            if slot.state != SlotState::Active {
                continue;
            }
            if abort.is_requested() {
                report.outcome = CycleOutcome::Aborted { slot: None };
                return report;
            }

            let mark = payload.len();
            let result = match (
                drivers.driver(slot.kind()),
                buses.port(slot.segment(), slot.address()),
            ) {
                (Some(driver), Some(mut port)) => match driver.start(&mut port) {
                    Ok(Trigger::Ready) => driver.read(&mut port, payload),
                    Ok(Trigger::Settle { ms }) => {
                        let mut remaining = ms.min(MAX_SETTLE_MS);
                        let mut aborted = false;
                        while remaining > 0 {
                            if abort.is_requested() {
                                aborted = true;
                                break;
                            }
                            let step = remaining.min(SETTLE_POLL_MS);
                            port.delay_ms(step);
                            remaining -= step;
                        }
                        if aborted || abort.is_requested() {
                            info!("Read cycle aborted, releasing {=str}", slot.kind().part());
                            driver.release(&mut port);
                            report.outcome = CycleOutcome::Aborted {
                                slot: Some(slot.id),
                            };
                            return report;
                        }
                        driver.read(&mut port, payload)
                    }
                    Err(e) => Err(e),
                },
                _ => Err(DriverError::Unsupported),
            };

            match result {
                Ok(()) => report.read += 1,
                Err(error) => {
                    warn!("{=str} read failed: {}", slot.kind().part(), error);
                    payload.truncate(mark);
                    let _ = report.failures.push(ReadFailure {
                        slot: slot.id,
                        kind: slot.kind(),
                        error,
                    });
                }
            }
        }

        report
    }

    /// Give every active module its background sample.
    ///
    /// Failures are logged and returned; the slots stay active.
    pub fn sample<I, D, T>(&self, buses: &mut Buses<I, D>, drivers: &mut T) -> Vec<ReadFailure, N>
    where
        I: I2c,
        D: DelayNs,
        T: DriverTable<I, D> + ?Sized,
    {
        let mut failures = Vec::new();
        for slot in self.catalog.active() {
            let (Some(driver), Some(mut port)) = (
                drivers.driver(slot.kind()),
                buses.port(slot.segment(), slot.address()),
            ) else {
                continue;
            };
            if let Err(error) = driver.sample(&mut port) {
                trace!("{=str} sample failed: {}", slot.kind().part(), error);
                let _ = failures.push(ReadFailure {
                    slot: slot.id,
                    kind: slot.kind(),
                    error,
                });
            }
        }
        failures
    }

    /// Clear a latched interrupt of the active module of `kind`.
    pub fn acknowledge<I, D, T>(
        &mut self,
        kind: ModuleKind,
        buses: &mut Buses<I, D>,
        drivers: &mut T,
    ) -> Result<(), DriverError>
    where
        I: I2c,
        D: DelayNs,
        T: DriverTable<I, D> + ?Sized,
    {
        let slot = self
            .catalog
            .active()
            .find(|slot| slot.kind() == kind)
            .copied()
            .ok_or(DriverError::Unsupported)?;
        let driver = drivers.driver(kind).ok_or(DriverError::Unsupported)?;
        let mut port = buses
            .port(slot.segment(), slot.address())
            .ok_or(DriverError::Unsupported)?;
        driver.acknowledge(&mut port)
    }

    /// Release every active driver and return all slots to `Absent`.
    pub fn shutdown<I, D, T>(&mut self, buses: &mut Buses<I, D>, drivers: &mut T)
    where
        I: I2c,
        D: DelayNs,
        T: DriverTable<I, D> + ?Sized,
    {
        for index in 0..self.catalog.slots().len() {
            let slot = self.catalog.slots()[index];
            if slot.state == SlotState::Active {
                Self::release(&slot, buses, drivers);
            }
            self.catalog.set_state(slot.id, SlotState::Absent);
        }
        info!("All modules released");
    }

    /// `true` if a module of `kind` is active.
    pub fn is_active(&self, kind: ModuleKind) -> bool {
        self.catalog.active().any(|slot| slot.kind() == kind)
    }
}
