//! Resolution engine
//!
//! Maps the raw hits of a [`DiscoverySession`] onto catalog slots. A slot is
//! *present* when its own `(segment, address)` ACKed, or when it lies inside
//! an aggregate whose base address ACKed. Presence then drives the slot
//! transitions:
//!
//! | Before                | Present   | Absent   |
//! |-----------------------|-----------|----------|
//! | `Active`              | `Active`  | `Absent` (dropped) |
//! | anything else         | `Candidate` | `Absent` |
//!
//! Conflicting slots all become candidates here; picking one is left to
//! [`crate::dispatch::Dispatcher::arbitrate`].

use heapless::Vec;

use crate::catalog::{Catalog, Slot, SlotId, SlotState};
use crate::probe::DiscoverySession;

/// Summary of one resolution pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<const N: usize> {
    /// Slots that are now candidates
    pub candidates: Vec<SlotId, N>,
    /// Previously active slots whose module is gone; their drivers must be
    /// released
    pub dropped: Vec<SlotId, N>,
    /// Hits that matched no slot at all
    pub unmatched: usize,
    /// The session had no hits and every slot was cleared
    pub cleared: bool,
}

impl<const N: usize> Resolution<N> {
    fn new() -> Self {
        Self {
            candidates: Vec::new(),
            dropped: Vec::new(),
            unmatched: 0,
            cleared: false,
        }
    }
}

fn is_present<const N: usize>(slot: &Slot, session: &DiscoverySession, catalog: &Catalog<N>) -> bool {
    session.contains(slot.segment(), slot.address())
        || catalog.aggregates().iter().any(|aggregate| {
            aggregate.contains(slot.segment(), slot.address())
                && session.contains(aggregate.segment, aggregate.base)
        })
}

/// Apply `session` to `catalog`.
///
/// Takes the session by value; it's spent once resolved.
pub fn resolve<const N: usize>(session: DiscoverySession, catalog: &mut Catalog<N>) -> Resolution<N> {
    let mut resolution = Resolution::new();

    if session.is_empty() {
        info!("Nothing installed, clearing every slot");
        for index in 0..catalog.slots().len() {
            let slot = catalog.slots()[index];
            if slot.state == SlotState::Active {
                // At most N slots
                let _ = resolution.dropped.push(slot.id);
            }
            catalog.set_state(slot.id, SlotState::Absent);
        }
        resolution.cleared = true;
        return resolution;
    }

    for hit in session.iter() {
        if catalog.matching(hit.segment, hit.address).next().is_none()
            && !catalog
                .aggregates()
                .iter()
                .any(|aggregate| aggregate.contains(hit.segment, hit.address))
        {
            debug!("No module known at {=u8:#x}", hit.address);
            resolution.unmatched += 1;
        }
    }

    for index in 0..catalog.slots().len() {
        let slot = catalog.slots()[index];
        let present = is_present(&slot, &session, catalog);
        let next = match (slot.state, present) {
            (SlotState::Active, true) => SlotState::Active,
            (SlotState::Active, false) => {
                warn!("{=str} removed", slot.kind().part());
                let _ = resolution.dropped.push(slot.id);
                SlotState::Absent
            }
            (_, true) => {
                let _ = resolution.candidates.push(slot.id);
                SlotState::Candidate
            }
            (_, false) => SlotState::Absent,
        };
        catalog.set_state(slot.id, next);
    }

    resolution
}
