//! Bus prober
//!
//! Sweeps an address range with one zero-length write per address and
//! records which addresses ACK. A NACK is a plain miss. The sweep only fails
//! when the bus can't be used at all, i.e. not a single address produced
//! either an ACK or a NACK.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use hal_abstractions::ProbePower;
use heapless::Vec;

use crate::bus::{BusSegment, Buses, MAX_SEGMENTS};
use crate::error::DiscoveryError;

/// Most hits one session can hold
pub const MAX_HITS: usize = MAX_SEGMENTS * 128;

/// Result of probing a single address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProbeOutcome {
    /// Device ACKed its address
    Hit,
    /// Nobody answered
    Miss,
    /// The transaction itself failed (bus error, arbitration loss)
    Fault,
}

/// Address range swept on every segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProbeConfig {
    pub first: u8,
    /// Inclusive
    pub last: u8,
}

impl Default for ProbeConfig {
    /// 1..=126, skipping the general call address and 0x7F.
    fn default() -> Self {
        Self { first: 1, last: 126 }
    }
}

/// One ACKing address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Hit {
    pub segment: BusSegment,
    pub address: u8,
}

/// Raw hits of one discovery run
///
/// Consumed by [`crate::resolve::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverySession {
    hits: Vec<Hit, MAX_HITS>,
}

impl DiscoverySession {
    pub const fn new() -> Self {
        Self { hits: Vec::new() }
    }

    /// Session from a fixed list of primary-segment addresses.
    pub fn from_addresses(addresses: &[u8]) -> Self {
        let mut session = Self::new();
        for address in addresses {
            session.record(BusSegment::PRIMARY, *address);
        }
        session
    }

    /// Record a hit; duplicates are ignored.
    pub fn record(&mut self, segment: BusSegment, address: u8) {
        let hit = Hit { segment, address };
        if self.hits.contains(&hit) {
            return;
        }
        if self.hits.push(hit).is_err() {
            warn!("Discovery session full, dropping {=u8:#x}", address);
        }
    }

    pub fn contains(&self, segment: BusSegment, address: u8) -> bool {
        self.hits.contains(&Hit { segment, address })
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hit> {
        self.hits.iter()
    }
}

/// Probe one address with a zero-length write.
pub fn probe_address<I: I2c>(i2c: &mut I, address: u8) -> ProbeOutcome {
    match i2c.write(address, &[]) {
        Ok(()) => ProbeOutcome::Hit,
        Err(e) => match e.kind() {
            ErrorKind::Bus | ErrorKind::ArbitrationLoss => ProbeOutcome::Fault,
            _ => ProbeOutcome::Miss,
        },
    }
}

/// Sweep `config`'s range on one segment, adding hits to `session`.
///
/// `power` gets to sequence any address that needs it before and after its
/// probe. Returns the number of hits.
pub fn probe<I, D, P>(
    buses: &mut Buses<I, D>,
    segment: BusSegment,
    config: &ProbeConfig,
    power: &mut P,
    session: &mut DiscoverySession,
) -> Result<usize, DiscoveryError>
where
    I: I2c,
    D: DelayNs,
    P: ProbePower,
{
    let (i2c, delay) = buses
        .split(segment)
        .ok_or(DiscoveryError::BusInit { segment })?;

    let mut hits = 0;
    let mut answered = false;
    let mut faults = 0usize;

    for address in config.first..=config.last {
        power.before_probe(segment.0, address, delay);
        let outcome = probe_address(i2c, address);
        power.after_probe(segment.0, address);

        match outcome {
            ProbeOutcome::Hit => {
                debug!("Found device on segment {=u8} at {=u8:#x}", segment.0, address);
                session.record(segment, address);
                hits += 1;
                answered = true;
            }
            ProbeOutcome::Miss => answered = true,
            ProbeOutcome::Fault => {
                trace!("Bus fault probing {=u8:#x}", address);
                faults += 1;
            }
        }
    }

    if !answered && faults > 0 {
        error!("Bus segment {=u8} unusable, {=usize} faults", segment.0, faults);
        return Err(DiscoveryError::BusInit { segment });
    }
    Ok(hits)
}

/// Sweep every registered segment into one [`DiscoverySession`].
pub fn discover<I, D, P>(
    buses: &mut Buses<I, D>,
    config: &ProbeConfig,
    power: &mut P,
) -> Result<DiscoverySession, DiscoveryError>
where
    I: I2c,
    D: DelayNs,
    P: ProbePower,
{
    let mut session = DiscoverySession::new();
    if buses.is_empty() {
        return Err(DiscoveryError::BusInit {
            segment: BusSegment::PRIMARY,
        });
    }
    for index in 0..buses.len() {
        let segment = BusSegment(index as u8);
        let hits = probe(buses, segment, config, power, &mut session)?;
        info!("Segment {=u8}: {=usize} device(s)", segment.0, hits);
    }
    Ok(session)
}
