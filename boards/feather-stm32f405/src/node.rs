//! Everything that touches the sensor bus, owned by the sensor task

use core::fmt::Write;

use defmt::{debug, error, info, warn};
use embassy_stm32::gpio::{Input, Output};
use embassy_stm32::i2c::I2c;
use embassy_stm32::mode::Blocking;
use embassy_time::Delay;
use hal_abstractions::PowerEnable;
use node_core::catalog::WISBLOCK_SLOTS;
use node_core::command::{CommandContext, Effect};
use node_core::dispatch::CycleOutcome;
use node_core::drivers::rv3028::LiveClock;
use node_core::drivers::{Ultrasonic, WisblockDrivers};
use node_core::motion::{MotionEvent, MotionPolicy};
use node_core::probe::{discover, ProbeConfig};
use node_core::time::DateTime;
use node_core::{status, Abort, Buses, Catalog, Dispatcher, InitContext, LppPayload, ModuleKind, Settings};

use crate::store::FlashStore;
use crate::MonoMicros;

/// Cayenne LPP buffer, the largest LoRaWAN application payload
pub const PAYLOAD_SIZE: usize = 222;

type Bus = I2c<'static, Blocking>;

/// RAK12007: trigger, echo, power-down
pub type Sonar = Ultrasonic<Output<'static>, Input<'static>, Output<'static>, MonoMicros>;

pub struct Node {
    buses: Buses<Bus, Delay>,
    drivers: WisblockDrivers,
    dispatcher: Dispatcher<WISBLOCK_SLOTS>,
    power: PowerEnable<Output<'static>>,
    sonar: Sonar,
    sonar_present: bool,
    store: FlashStore,
    settings: Settings,
    policy: MotionPolicy,
}

impl Node {
    pub fn new(i2c: Bus, power: PowerEnable<Output<'static>>, sonar: Sonar, mut store: FlashStore) -> Self {
        let settings = Settings::load(&mut store).unwrap_or_else(|e| {
            warn!("Settings unreadable ({}), using defaults", e);
            Settings::default()
        });
        info!(
            "Send interval {=u32} ms, location format: {=str}",
            settings.send_interval_ms,
            settings.gnss_format.description()
        );
        Self {
            buses: Buses::single(i2c, Delay),
            drivers: WisblockDrivers::new(),
            dispatcher: Dispatcher::new(Catalog::wisblock()),
            power,
            sonar,
            sonar_present: false,
            store,
            settings,
            policy: MotionPolicy::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Probe the bus, re-arbitrate, list the active modules to `out`, then
    /// take a first reading from them.
    ///
    /// A bus that can't be used leaves the current modules as they are.
    pub fn rescan<W: Write>(&mut self, now_ms: u64, out: &mut W, abort: &Abort) {
        let session = match discover(&mut self.buses, &ProbeConfig::default(), &mut self.power) {
            Ok(session) => session,
            Err(e) => {
                error!("Discovery failed: {}", e);
                let _ = write!(out, "+EVT:BUS_ERROR\r\n");
                return;
            }
        };
        let cx = InitContext {
            settings: &self.settings,
        };
        let rescan = self
            .dispatcher
            .rescan(session, &mut self.buses, &mut self.drivers, &cx);
        info!(
            "{=usize} module(s) active, {=usize} rejected, {=usize} unknown address(es)",
            self.dispatcher.catalog().active().count(),
            rescan.arbitration.rejected,
            rescan.resolution.unmatched
        );
        if self.dispatcher.is_active(ModuleKind::Rak1904) {
            self.policy.reset(now_ms);
        }
        info!("Device name: {=str}", status::device_name(self.dispatcher.catalog()));
        let _ = status::announce(out, self.dispatcher.catalog());
        self.sonar_present = self.sonar.detect(self.buses.delay());
        if self.sonar_present {
            let _ = write!(out, "+EVT:RAK12007 OK\r\n");
        }
        self.read_cycle(abort);
    }

    /// One dispatch cycle; the payload goes to the log in place of a radio.
    pub fn read_cycle(&mut self, abort: &Abort) {
        let mut payload = LppPayload::<PAYLOAD_SIZE>::new();
        let report = self
            .dispatcher
            .read_cycle(&mut self.buses, &mut self.drivers, &mut payload, abort);
        if let CycleOutcome::Aborted { .. } = report.outcome {
            info!("Read cycle aborted");
            return;
        }
        let mut modules = report.read;
        if self.sonar_present {
            match self.sonar.read(self.buses.delay(), &mut payload) {
                Ok(()) => modules += 1,
                Err(e) => warn!("RAK12007 read failed: {}", e),
            }
        }
        if payload.is_empty() {
            info!("No readings this cycle");
            return;
        }
        info!(
            "Payload {=usize} bytes from {=usize} module(s): {=[u8]:x}",
            payload.len(),
            modules,
            payload.as_bytes()
        );
    }

    /// `true` while an active module wants a sample every second.
    pub fn wants_samples(&self) -> bool {
        self.dispatcher.is_active(ModuleKind::Rak12047)
    }

    /// Background sample of every active module.
    pub fn sample(&mut self) {
        let failures = self.dispatcher.sample(&mut self.buses, &mut self.drivers);
        if !failures.is_empty() {
            debug!("{=usize} background sample(s) failed", failures.len());
        }
    }

    /// Turn a latched motion event into a reading if the policy allows it,
    /// then clear the accelerometer's latch.
    pub fn on_motion(&mut self, event: MotionEvent, abort: &Abort) {
        if event.coalesced > 0 {
            debug!("{=u32} further motion event(s) folded into this one", event.coalesced);
        }
        let gnss_active = self.dispatcher.is_active(ModuleKind::Rak12500);
        match self
            .policy
            .evaluate(event.at_ms, self.settings.send_interval_ms, gnss_active)
        {
            Ok(()) => {
                info!("Motion trigger");
                self.read_cycle(abort);
            }
            Err(reason) => debug!("Motion ignored: {}", reason),
        }
        if let Err(e) = self
            .dispatcher
            .acknowledge(ModuleKind::Rak1904, &mut self.buses, &mut self.drivers)
        {
            warn!("Motion acknowledge failed: {}", e);
        }
    }

    /// Run one console line, response text goes to `out`.
    pub fn command<W: Write>(&mut self, line: &str, out: &mut W) -> Option<Effect> {
        let catalog = self.dispatcher.catalog();
        let rtc = catalog
            .active()
            .find(|slot| slot.kind() == ModuleKind::Rak12002)
            .and_then(|slot| self.buses.port(slot.segment(), slot.address()));
        let mut clock = LiveClock::new(&mut self.drivers.rv3028, rtc);
        let mut cx = CommandContext {
            settings: &mut self.settings,
            store: &mut self.store,
            catalog,
            clock: &mut clock,
        };
        cx.handle(line, out)
    }

    pub fn set_clock(&mut self, time: &DateTime) {
        let catalog = self.dispatcher.catalog();
        let Some(slot) = catalog
            .active()
            .find(|slot| slot.kind() == ModuleKind::Rak12002)
            .copied()
        else {
            return;
        };
        let Some(mut port) = self.buses.port(slot.segment(), slot.address()) else {
            return;
        };
        if let Err(e) = self.drivers.rv3028.set(&mut port, time) {
            warn!("Setting RTC failed: {}", e);
        }
    }

    /// Power every module down.
    pub fn shutdown(&mut self) {
        self.dispatcher.shutdown(&mut self.buses, &mut self.drivers);
    }
}
