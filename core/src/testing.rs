//! Host-side test doubles shared by the unit tests

use core::cell::RefCell;
use core::convert::Infallible;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, InputPin, OutputPin};
use embedded_hal::i2c::{self, ErrorKind, I2c, NoAcknowledgeSource, Operation};
use hal_abstractions::MicrosClock;

use crate::bus::Port;
use crate::catalog::ModuleKind;
use crate::error::DriverError;
use crate::module::{DriverTable, InitContext, Module, Trigger};
use crate::payload::{Channel, Payload, PayloadFull};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeError(pub ErrorKind);

impl i2c::Error for FakeError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Register-file device on a [`FakeBus`]
///
/// A write sets the register pointer from its first byte and stores the
/// rest with auto-increment. Reads pop `script` first and fall back to the
/// register file.
#[derive(Debug)]
pub struct FakeDevice {
    pub address: u8,
    pub regs: [u8; 256],
    pub script: VecDeque<Vec<u8>>,
    pub writes: Vec<Vec<u8>>,
    pub fail_reads: bool,
    pointer: u8,
}

impl FakeDevice {
    fn new(address: u8) -> Self {
        Self {
            address,
            regs: [0; 256],
            script: VecDeque::new(),
            writes: Vec::new(),
            fail_reads: false,
            pointer: 0,
        }
    }

    /// Queue the bytes returned by the next read.
    pub fn respond(&mut self, bytes: &[u8]) -> &mut Self {
        self.script.push_back(bytes.to_vec());
        self
    }

    fn write(&mut self, bytes: &[u8]) {
        self.writes.push(bytes.to_vec());
        if let Some((reg, data)) = bytes.split_first() {
            self.pointer = *reg;
            for value in data {
                self.regs[usize::from(self.pointer)] = *value;
                self.pointer = self.pointer.wrapping_add(1);
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), FakeError> {
        if self.fail_reads {
            return Err(FakeError(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)));
        }
        if let Some(bytes) = self.script.pop_front() {
            for (dst, src) in buf.iter_mut().zip(bytes.iter().chain(core::iter::repeat(&0))) {
                *dst = *src;
            }
            return Ok(());
        }
        for dst in buf.iter_mut() {
            *dst = self.regs[usize::from(self.pointer)];
            self.pointer = self.pointer.wrapping_add(1);
        }
        Ok(())
    }
}

/// In-memory I2C bus with any number of attached devices
#[derive(Debug, Default)]
pub struct FakeBus {
    devices: Vec<FakeDevice>,
    /// Every transaction fails with a bus fault
    pub faulty: bool,
    /// Addresses of every transaction, in order
    pub log: Vec<u8>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus with bare devices on `addresses`.
    pub fn with(addresses: &[u8]) -> Self {
        let mut bus = Self::new();
        for address in addresses {
            bus.attach(*address);
        }
        bus
    }

    pub fn attach(&mut self, address: u8) -> &mut FakeDevice {
        if let Some(i) = self.devices.iter().position(|d| d.address == address) {
            return &mut self.devices[i];
        }
        self.devices.push(FakeDevice::new(address));
        self.devices.last_mut().unwrap()
    }

    pub fn device(&mut self, address: u8) -> Option<&mut FakeDevice> {
        self.devices.iter_mut().find(|d| d.address == address)
    }
}

impl i2c::ErrorType for FakeBus {
    type Error = FakeError;
}

impl I2c for FakeBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.log.push(address);
        if self.faulty {
            return Err(FakeError(ErrorKind::Bus));
        }
        let device = self
            .devices
            .iter_mut()
            .find(|d| d.address == address)
            .ok_or(FakeError(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)))?;
        for op in operations {
            match op {
                Operation::Write(bytes) => device.write(bytes),
                Operation::Read(buf) => device.read(buf)?,
            }
        }
        Ok(())
    }
}

/// Delay that returns immediately
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// One call made on a [`RecordingPayload`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Recorded {
    Temperature(f32),
    Humidity(f32),
    Pressure(f32),
    Analog(f32),
    Luminosity(f32),
    Distance(u32),
    VocIndex(u16),
}

/// Payload that remembers every add, optionally with a capacity
#[derive(Debug, Default)]
pub struct RecordingPayload {
    pub records: Vec<(Channel, Recorded)>,
    pub capacity: Option<usize>,
}

impl RecordingPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(&self) -> Vec<u8> {
        self.records.iter().map(|(channel, _)| channel.0).collect()
    }

    fn push(&mut self, channel: Channel, value: Recorded) -> Result<(), PayloadFull> {
        if self.capacity.is_some_and(|cap| self.records.len() >= cap) {
            return Err(PayloadFull);
        }
        self.records.push((channel, value));
        Ok(())
    }
}

impl Payload for RecordingPayload {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }

    fn add_temperature(&mut self, channel: Channel, celsius: f32) -> Result<(), PayloadFull> {
        self.push(channel, Recorded::Temperature(celsius))
    }

    fn add_humidity(&mut self, channel: Channel, percent: f32) -> Result<(), PayloadFull> {
        self.push(channel, Recorded::Humidity(percent))
    }

    fn add_pressure(&mut self, channel: Channel, hpa: f32) -> Result<(), PayloadFull> {
        self.push(channel, Recorded::Pressure(hpa))
    }

    fn add_analog(&mut self, channel: Channel, value: f32) -> Result<(), PayloadFull> {
        self.push(channel, Recorded::Analog(value))
    }

    fn add_luminosity(&mut self, channel: Channel, lux: f32) -> Result<(), PayloadFull> {
        self.push(channel, Recorded::Luminosity(lux))
    }

    fn add_distance(&mut self, channel: Channel, millimeters: u32) -> Result<(), PayloadFull> {
        self.push(channel, Recorded::Distance(millimeters))
    }

    fn add_voc_index(&mut self, channel: Channel, index: u16) -> Result<(), PayloadFull> {
        self.push(channel, Recorded::VocIndex(index))
    }
}

/// Scriptable driver that counts calls and never touches the bus
#[derive(Debug, Clone, Default)]
pub struct FakeModule {
    pub init_error: Option<DriverError>,
    pub read_error: Option<DriverError>,
    /// Fail with this after the reading went into the payload
    pub late_error: Option<DriverError>,
    pub settle_ms: Option<u32>,
    /// Temperature reported on this channel by `read()`
    pub channel: u8,
    pub inits: usize,
    pub starts: usize,
    pub reads: usize,
    pub samples: usize,
    pub acks: usize,
    pub releases: usize,
}

impl FakeModule {
    pub fn reporting(channel: u8) -> Self {
        Self {
            channel,
            ..Self::default()
        }
    }

    pub fn failing_init(error: DriverError) -> Self {
        Self {
            init_error: Some(error),
            ..Self::default()
        }
    }
}

impl<I: I2c, D: DelayNs> Module<I, D> for FakeModule {
    fn init(&mut self, _port: &mut Port<'_, I, D>, _cx: &InitContext<'_>) -> Result<(), DriverError> {
        self.inits += 1;
        self.init_error.map_or(Ok(()), Err)
    }

    fn start(&mut self, _port: &mut Port<'_, I, D>) -> Result<Trigger, DriverError> {
        self.starts += 1;
        Ok(match self.settle_ms {
            Some(ms) => Trigger::Settle { ms },
            None => Trigger::Ready,
        })
    }

    fn read(&mut self, _port: &mut Port<'_, I, D>, payload: &mut dyn Payload) -> Result<(), DriverError> {
        self.reads += 1;
        if let Some(error) = self.read_error {
            return Err(error);
        }
        payload.add_temperature(Channel(self.channel), 21.5)?;
        self.late_error.map_or(Ok(()), Err)
    }

    fn sample(&mut self, _port: &mut Port<'_, I, D>) -> Result<(), DriverError> {
        self.samples += 1;
        self.read_error.map_or(Ok(()), Err)
    }

    fn acknowledge(&mut self, _port: &mut Port<'_, I, D>) -> Result<(), DriverError> {
        self.acks += 1;
        Ok(())
    }

    fn release(&mut self, _port: &mut Port<'_, I, D>) {
        self.releases += 1;
    }
}

/// Driver table of [`FakeModule`]s keyed by kind
#[derive(Debug, Default)]
pub struct FakeDrivers {
    pub modules: Vec<(ModuleKind, FakeModule)>,
}

impl FakeDrivers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ModuleKind, module: FakeModule) -> Self {
        self.modules.push((kind, module));
        self
    }

    pub fn get(&self, kind: ModuleKind) -> &FakeModule {
        &self.modules.iter().find(|(k, _)| *k == kind).unwrap().1
    }

    pub fn get_mut(&mut self, kind: ModuleKind) -> &mut FakeModule {
        &mut self.modules.iter_mut().find(|(k, _)| *k == kind).unwrap().1
    }
}

impl<I: I2c, D: DelayNs> DriverTable<I, D> for FakeDrivers {
    fn driver(&mut self, kind: ModuleKind) -> Option<&mut dyn Module<I, D>> {
        self.modules
            .iter_mut()
            .find(|(k, _)| *k == kind)
            .map(|(_, module)| module as &mut dyn Module<I, D>)
    }
}

/// Ultrasonic transducer on a shared microsecond timeline
///
/// Each trigger pulse (high then low) schedules the next queued echo 5 µs
/// later, provided the sensor is powered. `None` in the queue is a shot
/// that never echoes.
#[derive(Debug, Default)]
pub struct Sonar {
    pub now: u32,
    pub echoes: VecDeque<Option<u32>>,
    pub powered: bool,
    pub triggers: usize,
    trigger_high: bool,
    pulse: Option<(u32, u32)>,
}

impl Sonar {
    pub fn shared(echoes: &[Option<u32>]) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            echoes: echoes.iter().copied().collect(),
            ..Self::default()
        }))
    }
}

/// Trigger line of a [`Sonar`]
pub struct SonarTrigger(pub Rc<RefCell<Sonar>>);
/// Echo line of a [`Sonar`]
pub struct SonarEcho(pub Rc<RefCell<Sonar>>);
/// Power-down line of a [`Sonar`], low powers it up
pub struct SonarPower(pub Rc<RefCell<Sonar>>);
/// Microsecond counter of a [`Sonar`], 1 µs per reading
pub struct SonarClock(pub Rc<RefCell<Sonar>>);

impl digital::ErrorType for SonarTrigger {
    type Error = Infallible;
}

impl OutputPin for SonarTrigger {
    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut sonar = self.0.borrow_mut();
        if sonar.trigger_high && sonar.powered {
            sonar.triggers += 1;
            let rise = sonar.now.wrapping_add(5);
            sonar.pulse = sonar.echoes.pop_front().flatten().map(|width| (rise, width));
        }
        sonar.trigger_high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().trigger_high = true;
        Ok(())
    }
}

impl digital::ErrorType for SonarEcho {
    type Error = Infallible;
}

impl InputPin for SonarEcho {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        let sonar = self.0.borrow();
        Ok(sonar
            .pulse
            .is_some_and(|(rise, width)| sonar.now.wrapping_sub(rise) < width))
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        self.is_high().map(|high| !high)
    }
}

impl digital::ErrorType for SonarPower {
    type Error = Infallible;
}

impl OutputPin for SonarPower {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().powered = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().powered = false;
        Ok(())
    }
}

impl MicrosClock for SonarClock {
    fn now_us(&mut self) -> u32 {
        let mut sonar = self.0.borrow_mut();
        let now = sonar.now;
        sonar.now = now.wrapping_add(1);
        now
    }
}
