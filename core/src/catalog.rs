//! Module catalog
//!
//! A fixed table of every supported module variant. Addresses are NOT
//! unique: module families that are never fitted together share addresses,
//! and the catalog lists each of them as its own slot. Three declared
//! relations refine plain address matching:
//!
//! - **aggregates** ([`AddressSpan`]): one module answering on a contiguous
//!   range; a hit on the base marks every slot in the range found
//! - **range claims** ([`RangeClaim`]): an active module owns a range and
//!   rejects other candidates in it
//! - **priority** ([`CatalogSpec::priority`]): the order conflict groups are
//!   arbitrated in, independent of slot order
//!
//! Slot state is the only thing that changes after construction.

use heapless::Vec;

use crate::bus::BusSegment;
use crate::error::Rejection;

/// Stable slot index; never reused or reordered at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotId(pub u8);

/// Supported module variants, by WisBlock part number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModuleKind {
    /// LIS3DH 3-axis accelerometer
    Rak1904,
    /// OPT3001 ambient light sensor
    Rak1903,
    /// u-blox ZOE-M8Q GNSS receiver
    Rak12500,
    /// LPS22HB barometric pressure sensor
    Rak1902,
    /// SHTC3 temperature & humidity sensor
    Rak1901,
    /// BME680 environment sensor
    Rak1906,
    /// Soil moisture sensor
    Rak12035,
    /// VEML7700 light sensor
    Rak12010,
    /// MQ2 gas sensor
    Rak12004,
    /// EEPROM, answers on four consecutive addresses
    Rak15000,
    /// MG812 CO2 gas sensor
    Rak12008,
    /// MQ3 alcohol gas sensor
    Rak12009,
    /// VL53L0X laser time-of-flight sensor
    Rak12014,
    /// RV-3028 real-time clock
    Rak12002,
    /// LED bargraph
    Rak14003,
    /// SGP40 VOC sensor
    Rak12047,
    /// Gyroscope
    Rak12025,
    /// Gesture sensor
    Rak14008,
    /// SSD1306 OLED display
    Rak1921,
    /// LTR390 UV light sensor
    Rak12019,
    /// Touch button pad
    Rak14002,
    /// DC current sensor
    Rak16000,
    /// MPU9250 9-DOF motion sensor
    Rak1905,
    /// SCD30 CO2 sensor
    Rak12037,
    /// MLX90632 IR temperature sensor
    Rak12003,
    /// AMG8833 temperature array
    Rak12040,
    /// MAX30102 heart rate sensor
    Rak12012,
    /// Flex sensor
    Rak12016,
    /// PWM expander
    Rak13004,
    /// RGB LED
    Rak14001,
    /// Keypad interface
    Rak14004,
    /// ADC
    Rak16001,
    /// NFC reader
    Rak13600,
    /// Coulomb counter
    Rak16002,
    /// IO expander
    Rak13003,
}

impl ModuleKind {
    /// Part number as printed on the module.
    pub const fn part(&self) -> &'static str {
        match self {
            Self::Rak1904 => "RAK1904",
            Self::Rak1903 => "RAK1903",
            Self::Rak12500 => "RAK12500",
            Self::Rak1902 => "RAK1902",
            Self::Rak1901 => "RAK1901",
            Self::Rak1906 => "RAK1906",
            Self::Rak12035 => "RAK12035",
            Self::Rak12010 => "RAK12010",
            Self::Rak12004 => "RAK12004",
            Self::Rak15000 => "RAK15000",
            Self::Rak12008 => "RAK12008",
            Self::Rak12009 => "RAK12009",
            Self::Rak12014 => "RAK12014",
            Self::Rak12002 => "RAK12002",
            Self::Rak14003 => "RAK14003",
            Self::Rak12047 => "RAK12047",
            Self::Rak12025 => "RAK12025",
            Self::Rak14008 => "RAK14008",
            Self::Rak1921 => "RAK1921",
            Self::Rak12019 => "RAK12019",
            Self::Rak14002 => "RAK14002",
            Self::Rak16000 => "RAK16000",
            Self::Rak1905 => "RAK1905",
            Self::Rak12037 => "RAK12037",
            Self::Rak12003 => "RAK12003",
            Self::Rak12040 => "RAK12040",
            Self::Rak12012 => "RAK12012",
            Self::Rak12016 => "RAK12016",
            Self::Rak13004 => "RAK13004",
            Self::Rak14001 => "RAK14001",
            Self::Rak14004 => "RAK14004",
            Self::Rak16001 => "RAK16001",
            Self::Rak13600 => "RAK13600",
            Self::Rak16002 => "RAK16002",
            Self::Rak13003 => "RAK13003",
        }
    }
}

/// Static description of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CatalogEntry {
    pub kind: ModuleKind,
    /// 7-bit bus address
    pub address: u8,
    pub segment: BusSegment,
}

impl CatalogEntry {
    /// Entry on [`BusSegment::PRIMARY`].
    pub const fn primary(kind: ModuleKind, address: u8) -> Self {
        Self {
            kind,
            address,
            segment: BusSegment::PRIMARY,
        }
    }
}

/// Contiguous address range `base .. base + span` on one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressSpan {
    pub segment: BusSegment,
    pub base: u8,
    pub span: u8,
}

impl AddressSpan {
    pub const fn primary(base: u8, span: u8) -> Self {
        Self {
            segment: BusSegment::PRIMARY,
            base,
            span,
        }
    }

    pub fn contains(&self, segment: BusSegment, address: u8) -> bool {
        segment == self.segment
            && address >= self.base
            && u16::from(address) < u16::from(self.base) + u16::from(self.span)
    }
}

/// Address range owned by a module once it is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RangeClaim {
    pub owner: ModuleKind,
    pub range: AddressSpan,
}

/// Everything needed to build a [`Catalog`]
#[derive(Debug, Clone, Copy)]
pub struct CatalogSpec<const N: usize> {
    pub entries: [CatalogEntry; N],
    /// Aggregate devices, see [`AddressSpan`]
    pub aggregates: &'static [AddressSpan],
    pub claims: &'static [RangeClaim],
    /// Arbitration order; kinds not listed follow in slot order
    pub priority: &'static [ModuleKind],
}

/// Number of slots in the WisBlock catalog
pub const WISBLOCK_SLOTS: usize = 35;

/// The WisBlock module catalog
pub const WISBLOCK: CatalogSpec<WISBLOCK_SLOTS> = {
    use ModuleKind::*;
    const fn e(kind: ModuleKind, address: u8) -> CatalogEntry {
        CatalogEntry::primary(kind, address)
    }
    CatalogSpec {
        entries: [
            e(Rak1904, 0x18),  //  0
            e(Rak1903, 0x44),  //  1
            e(Rak12500, 0x42), //  2
            e(Rak1902, 0x5C),  //  3
            e(Rak1901, 0x70),  //  4
            e(Rak1906, 0x76),  //  5
            e(Rak12035, 0x20), //  6 conflicts with RAK13003
            e(Rak12010, 0x10), //  7
            e(Rak12004, 0x51), //  8 inside the RAK15000 range
            e(Rak15000, 0x50), //  9 conflicts with RAK12008
            e(Rak12008, 0x50), // 10
            e(Rak12009, 0x55), // 11
            e(Rak12014, 0x29), // 12 needs XSHUT before probing
            e(Rak12002, 0x52), // 13
            e(Rak14003, 0x04), // 14
            e(Rak12047, 0x59), // 15 conflicts with RAK13600, RAK16002
            e(Rak12025, 0x68), // 16 conflicts with RAK1905, RAK12040
            e(Rak14008, 0x73), // 17
            e(Rak1921, 0x3C),  // 18
            e(Rak12019, 0x53), // 19
            e(Rak14002, 0x28), // 20
            e(Rak16000, 0x41), // 21
            e(Rak1905, 0x68),  // 22
            e(Rak12037, 0x61), // 23 conflicts with RAK16001
            e(Rak12003, 0x3A), // 24
            e(Rak12040, 0x68), // 25
            e(Rak12012, 0x57), // 26
            e(Rak12016, 0x54), // 27
            e(Rak13004, 0x47), // 28
            e(Rak14001, 0x38), // 29
            e(Rak14004, 0x5F), // 30
            e(Rak16001, 0x61), // 31
            e(Rak13600, 0x59), // 32
            e(Rak16002, 0x59), // 33
            e(Rak13003, 0x20), // 34
        ],
        // The RTC answers on 0x52 and pulls 0x53 in with it
        aggregates: &[AddressSpan::primary(0x52, 2)],
        claims: &[RangeClaim {
            owner: Rak15000,
            range: AddressSpan::primary(0x50, 4),
        }],
        priority: &[
            // EEPROM first: it occupies 0x50..=0x53
            Rak15000, Rak12008, //
            Rak1901, Rak1902, Rak1903, Rak1904, //
            Rak12025, Rak1905, Rak12040, //
            Rak1906, Rak1921, Rak12002, Rak12003, Rak12010, Rak12014, Rak12019, //
            Rak12037, Rak16001, //
            Rak12047, Rak13600, Rak16002, //
            Rak12035, Rak13003, //
            Rak12500,
        ],
    }
};

/// Discovery/dispatch state of one slot
///
/// ```text
/// Absent ──► Candidate ──► Active
///                     └──► Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotState {
    /// Not seen on the bus
    Absent,
    /// Address answered, driver not initialized yet
    Candidate,
    /// Driver initialized; read every cycle
    Active,
    /// Init failed or arbitration eliminated it
    Rejected(Rejection),
}

impl SlotState {
    /// The legacy "found" flag: seen and not rejected.
    pub const fn found(&self) -> bool {
        matches!(self, Self::Candidate | Self::Active)
    }
}

/// One catalog entry plus its runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Slot {
    pub id: SlotId,
    pub entry: CatalogEntry,
    pub state: SlotState,
}

impl Slot {
    pub fn kind(&self) -> ModuleKind {
        self.entry.kind
    }

    pub fn address(&self) -> u8 {
        self.entry.address
    }

    pub fn segment(&self) -> BusSegment {
        self.entry.segment
    }

    pub fn found(&self) -> bool {
        self.state.found()
    }

    fn shares_address(&self, other: &Slot) -> bool {
        self.entry.segment == other.entry.segment && self.entry.address == other.entry.address
    }
}

/// Owned module catalog with indexed slot access
#[derive(Debug, Clone)]
pub struct Catalog<const N: usize> {
    slots: [Slot; N],
    aggregates: &'static [AddressSpan],
    claims: &'static [RangeClaim],
    priority: &'static [ModuleKind],
}

impl Catalog<WISBLOCK_SLOTS> {
    /// Catalog of all WisBlock modules, every slot absent.
    pub fn wisblock() -> Self {
        Self::new(&WISBLOCK)
    }
}

impl<const N: usize> Catalog<N> {
    pub fn new(spec: &CatalogSpec<N>) -> Self {
        Self {
            slots: core::array::from_fn(|i| Slot {
                id: SlotId(i as u8),
                entry: spec.entries[i],
                state: SlotState::Absent,
            }),
            aggregates: spec.aggregates,
            claims: spec.claims,
            priority: spec.priority,
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(usize::from(id.0))
    }

    pub fn state(&self, id: SlotId) -> Option<SlotState> {
        self.slot(id).map(|slot| slot.state)
    }

    /// Legacy found flag of a slot; `false` for unknown ids.
    pub fn found(&self, id: SlotId) -> bool {
        self.slot(id).is_some_and(Slot::found)
    }

    pub(crate) fn set_state(&mut self, id: SlotId, state: SlotState) {
        if let Some(slot) = self.slots.get_mut(usize::from(id.0)) {
            slot.state = state;
        }
    }

    /// First slot of the given kind.
    pub fn find(&self, kind: ModuleKind) -> Option<SlotId> {
        self.slots.iter().find(|slot| slot.kind() == kind).map(|slot| slot.id)
    }

    /// Slots currently active, in slot order.
    pub fn active(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|slot| slot.state == SlotState::Active)
    }

    /// Every slot matching `(segment, address)` exactly.
    pub fn matching(&self, segment: BusSegment, address: u8) -> impl Iterator<Item = &Slot> {
        self.slots
            .iter()
            .filter(move |slot| slot.segment() == segment && slot.address() == address)
    }

    /// Other members of `id`'s conflict group.
    pub fn conflicts(&self, id: SlotId) -> impl Iterator<Item = &Slot> {
        let this = self.slot(id).copied();
        self.slots.iter().filter(move |slot| match this {
            Some(this) => slot.id != this.id && slot.shares_address(&this),
            None => false,
        })
    }

    pub fn aggregates(&self) -> &'static [AddressSpan] {
        self.aggregates
    }

    /// Range claimed by `kind` once active, if it declares one.
    pub fn claim_of(&self, kind: ModuleKind) -> Option<AddressSpan> {
        self.claims
            .iter()
            .find(|claim| claim.owner == kind)
            .map(|claim| claim.range)
    }

    /// Slot ids in arbitration order: range claim owners first, then the
    /// declared priority, the rest in slot order. A claim is in force before
    /// any slot inside its range gets a turn.
    pub fn arbitration_order(&self) -> Vec<SlotId, N> {
        let mut order: Vec<SlotId, N> = Vec::new();
        let owners = self.claims.iter().map(|claim| claim.owner);
        for kind in owners.chain(self.priority.iter().copied()) {
            for slot in self.slots.iter().filter(|slot| slot.kind() == kind) {
                if !order.contains(&slot.id) {
                    // At most N distinct ids, never overflows.
                    let _ = order.push(slot.id);
                }
            }
        }
        for slot in &self.slots {
            if !order.contains(&slot.id) {
                let _ = order.push(slot.id);
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wisblock_starts_absent() {
        let catalog = Catalog::wisblock();
        assert_eq!(catalog.slots().len(), WISBLOCK_SLOTS);
        assert!(catalog.slots().iter().all(|slot| slot.state == SlotState::Absent));
        for (i, slot) in catalog.slots().iter().enumerate() {
            assert_eq!(slot.id, SlotId(i as u8));
        }
    }

    #[test]
    fn test_conflict_group_at_0x68() {
        let catalog = Catalog::wisblock();
        let gyro = catalog.find(ModuleKind::Rak12025).unwrap();
        let mut others: std::vec::Vec<ModuleKind> =
            catalog.conflicts(gyro).map(|slot| slot.kind()).collect();
        others.sort_by_key(|kind| kind.part());
        assert_eq!(others, [ModuleKind::Rak12040, ModuleKind::Rak1905]);
    }

    #[test]
    fn test_arbitration_order_is_priority_then_slot_order() {
        let catalog = Catalog::wisblock();
        let order = catalog.arbitration_order();
        assert_eq!(order.len(), WISBLOCK_SLOTS);
        assert_eq!(order[0], catalog.find(ModuleKind::Rak15000).unwrap());

        let position = |kind| {
            let id = catalog.find(kind).unwrap();
            order.iter().position(|x| *x == id).unwrap()
        };
        // Declared priority beats slot order inside the 0x68 group
        assert!(position(ModuleKind::Rak12025) < position(ModuleKind::Rak1905));
        assert!(position(ModuleKind::Rak1905) < position(ModuleKind::Rak12040));
        // Unlisted kinds still get a turn
        assert!(order.contains(&catalog.find(ModuleKind::Rak14003).unwrap()));
    }

    #[test]
    fn test_claim_owner_arbitrates_before_claimed_slots() {
        let spec = CatalogSpec {
            entries: [
                CatalogEntry::primary(ModuleKind::Rak12002, 0x52),
                CatalogEntry::primary(ModuleKind::Rak1901, 0x70),
                CatalogEntry::primary(ModuleKind::Rak15000, 0x50),
            ],
            aggregates: &[],
            claims: &const {
                [RangeClaim {
                    owner: ModuleKind::Rak15000,
                    range: AddressSpan::primary(0x50, 4),
                }]
            },
            priority: &[ModuleKind::Rak1901],
        };
        let order = Catalog::new(&spec).arbitration_order();
        assert_eq!(order.as_slice(), &[SlotId(2), SlotId(1), SlotId(0)]);
    }

    #[test]
    fn test_address_span_bounds() {
        let span = AddressSpan::primary(0x50, 4);
        assert!(span.contains(BusSegment::PRIMARY, 0x50));
        assert!(span.contains(BusSegment::PRIMARY, 0x53));
        assert!(!span.contains(BusSegment::PRIMARY, 0x54));
        assert!(!span.contains(BusSegment(1), 0x51));
        assert!(AddressSpan::primary(0xFF, 1).contains(BusSegment::PRIMARY, 0xFF));
    }

    #[test]
    fn test_found_flag_follows_state() {
        let mut catalog = Catalog::wisblock();
        let id = catalog.find(ModuleKind::Rak1901).unwrap();
        assert!(!catalog.found(id));
        catalog.set_state(id, SlotState::Candidate);
        assert!(catalog.found(id));
        catalog.set_state(id, SlotState::Rejected(Rejection::NoDriver));
        assert!(!catalog.found(id));
        assert!(!catalog.found(SlotId(200)));
    }

    #[test]
    fn test_eeprom_claims_its_range() {
        let catalog = Catalog::wisblock();
        let claim = catalog.claim_of(ModuleKind::Rak15000).unwrap();
        assert!(claim.contains(BusSegment::PRIMARY, 0x52));
        assert!(catalog.claim_of(ModuleKind::Rak1901).is_none());
    }
}
