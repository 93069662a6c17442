//! Motion events
//!
//! The accelerometer interrupt only calls [`MotionLatch::record`]. The
//! control loop takes the event, asks [`MotionPolicy`] whether it may
//! trigger a reading, and acknowledges the module's interrupt afterwards.
//! No bus traffic ever happens in interrupt context.

use core::cell::Cell;

use critical_section::Mutex;

/// A drained motion event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotionEvent {
    /// Time of the first interrupt, in ms
    pub at_ms: u64,
    /// Further interrupts folded into this event
    pub coalesced: u32,
}

/// Pending motion event, shared between the interrupt and the loop
pub struct MotionLatch {
    /// Timestamp of the oldest undrained event, in ms
    pending: Mutex<Cell<Option<u64>>>,
    /// Events recorded while one was already pending
    coalesced: Mutex<Cell<u32>>,
}

impl MotionLatch {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(None)),
            coalesced: Mutex::new(Cell::new(0)),
        }
    }

    /// Record an event. Interrupt safe.
    pub fn record(&self, now_ms: u64) {
        critical_section::with(|cs| {
            let pending = self.pending.borrow(cs);
            if pending.get().is_some() {
                let coalesced = self.coalesced.borrow(cs);
                coalesced.set(coalesced.get().saturating_add(1));
            } else {
                pending.set(Some(now_ms));
            }
        });
    }

    /// Drain the pending event, if any.
    pub fn take(&self) -> Option<MotionEvent> {
        critical_section::with(|cs| {
            let coalesced = self.coalesced.borrow(cs).replace(0);
            self.pending
                .borrow(cs)
                .take()
                .map(|at_ms| MotionEvent { at_ms, coalesced })
        })
    }
}

impl Default for MotionLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a motion event was not turned into a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Suppressed {
    /// Location fix in progress
    GnssActive,
    /// Less than half a send interval since the last accepted trigger
    TooSoon,
}

/// Rate limit for motion-triggered readings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionPolicy {
    last_accepted_ms: Option<u64>,
}

impl MotionPolicy {
    pub const fn new() -> Self {
        Self {
            last_accepted_ms: None,
        }
    }

    /// Start the gap from `now_ms`, e.g. when the accelerometer comes up.
    pub fn reset(&mut self, now_ms: u64) {
        self.last_accepted_ms = Some(now_ms);
    }

    /// Decide on an event at `event_ms`; accepting it restarts the gap.
    pub fn evaluate(
        &mut self,
        event_ms: u64,
        send_interval_ms: u32,
        gnss_active: bool,
    ) -> Result<(), Suppressed> {
        if gnss_active {
            return Err(Suppressed::GnssActive);
        }
        let min_gap = u64::from(send_interval_ms / 2);
        if let Some(last) = self.last_accepted_ms {
            if event_ms.saturating_sub(last) <= min_gap {
                return Err(Suppressed::TooSoon);
            }
        }
        self.last_accepted_ms = Some(event_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_keeps_first_event() {
        let latch = MotionLatch::new();
        assert_eq!(latch.take(), None);
        latch.record(100);
        latch.record(150);
        latch.record(180);
        assert_eq!(
            latch.take(),
            Some(MotionEvent {
                at_ms: 100,
                coalesced: 2
            })
        );
        assert_eq!(latch.take(), None);
        latch.record(300);
        assert_eq!(latch.take().map(|event| event.coalesced), Some(0));
    }

    #[test]
    fn test_gap_is_half_the_send_interval() {
        let mut policy = MotionPolicy::new();
        policy.reset(0);
        assert_eq!(policy.evaluate(30_000, 60_000, false), Err(Suppressed::TooSoon));
        assert_eq!(policy.evaluate(30_001, 60_000, false), Ok(()));
        assert_eq!(policy.evaluate(40_000, 60_000, false), Err(Suppressed::TooSoon));
    }

    #[test]
    fn test_gnss_suppresses() {
        let mut policy = MotionPolicy::new();
        assert_eq!(policy.evaluate(1_000, 0, true), Err(Suppressed::GnssActive));
        assert_eq!(policy.evaluate(1_000, 0, false), Ok(()));
    }

    #[test]
    fn test_interval_off_still_needs_strictly_later_event() {
        let mut policy = MotionPolicy::new();
        policy.reset(500);
        assert_eq!(policy.evaluate(500, 0, false), Err(Suppressed::TooSoon));
        assert_eq!(policy.evaluate(501, 0, false), Ok(()));
    }
}
