//! RAK12007: ultrasonic distance sensor on GPIO
//!
//! Not an I2C module, so it has no catalog slot. The board looks for it on every
//! rescan and reads it after each dispatch cycle. A reading is the average
//! of [`SHOTS`] echo times; echoes longer than [`ECHO_TIMEOUT_US`] (past
//! 4 m) are dropped.
//!
//! The sensor is powered only while measuring.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use hal_abstractions::{pulse_high_us, MicrosClock};

use crate::error::DriverError;
use crate::payload::{Channel, Payload};

pub const SHOTS: u32 = 10;
pub const ECHO_TIMEOUT_US: u32 = 24_125;

/// Longest the echo line may take to finish a pulse
const ECHO_WAIT_US: u32 = 33_000;
/// Speed of sound at 25 °C over the round trip, mm per µs
const MM_PER_US: f32 = 346.6 / 1000.0 / 2.0;

const POWER_UP_MS: u32 = 500;
const TRIGGER_US: u32 = 20;
const ECHO_SETTLE_MS: u32 = 33;
const SHOT_GAP_MS: u32 = 500;

pub struct Ultrasonic<T, E, P, C> {
    trigger: T,
    echo: E,
    power_down: P,
    clock: C,
}

impl<T, E, P, C> Ultrasonic<T, E, P, C>
where
    T: OutputPin,
    E: InputPin,
    P: OutputPin,
    C: MicrosClock,
{
    pub fn new(trigger: T, echo: E, power_down: P, clock: C) -> Self {
        Self {
            trigger,
            echo,
            power_down,
            clock,
        }
    }

    /// `true` if a full measurement gets at least one echo back.
    pub fn detect<D: DelayNs>(&mut self, delay: &mut D) -> bool {
        match self.measure(delay) {
            Ok(mm) => {
                info!("RAK12007 found, {=u32} mm", mm);
                true
            }
            Err(e) => {
                debug!("No RAK12007: {}", e);
                false
            }
        }
    }

    /// Averaged distance in millimetres.
    pub fn measure<D: DelayNs>(&mut self, delay: &mut D) -> Result<u32, DriverError> {
        self.trigger.set_low().map_err(|_| DriverError::Pin)?;
        self.power_down.set_low().map_err(|_| DriverError::Pin)?;
        delay.delay_ms(POWER_UP_MS);

        let result = self.shots(delay);

        let _ = self.power_down.set_high();
        let _ = self.trigger.set_high();
        result
    }

    fn shots<D: DelayNs>(&mut self, delay: &mut D) -> Result<u32, DriverError> {
        let mut total = 0u64;
        let mut valid = 0u32;
        for _ in 0..SHOTS {
            self.trigger.set_high().map_err(|_| DriverError::Pin)?;
            delay.delay_us(TRIGGER_US);
            self.trigger.set_low().map_err(|_| DriverError::Pin)?;
            let echo = pulse_high_us(&mut self.echo, &mut self.clock, ECHO_WAIT_US).map_err(|_| DriverError::Pin)?;
            delay.delay_ms(ECHO_SETTLE_MS);
            match echo {
                Some(us) if us > 0 && us < ECHO_TIMEOUT_US => {
                    total += u64::from(us);
                    valid += 1;
                }
                _ => trace!("RAK12007 echo timeout"),
            }
            delay.delay_ms(SHOT_GAP_MS);
        }
        if valid == 0 {
            return Err(DriverError::NotReady);
        }
        let average_us = total / u64::from(valid);
        trace!("RAK12007 {=u32}/{=u32} echoes, {=u64} us", valid, SHOTS, average_us);
        Ok((average_us as f32 * MM_PER_US) as u32)
    }

    /// Measure and add the distance to `payload`.
    pub fn read<D: DelayNs>(&mut self, delay: &mut D, payload: &mut dyn Payload) -> Result<(), DriverError> {
        let mm = self.measure(delay)?;
        debug!("RAK12007 {=u32} mm", mm);
        payload.add_distance(Channel::DISTANCE, mm)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NoDelay, Recorded, RecordingPayload, Sonar, SonarClock, SonarEcho, SonarPower, SonarTrigger};
    use core::cell::RefCell;
    use std::rc::Rc;

    type Sensor = Ultrasonic<SonarTrigger, SonarEcho, SonarPower, SonarClock>;

    fn sensor(sonar: &Rc<RefCell<Sonar>>) -> Sensor {
        Ultrasonic::new(
            SonarTrigger(sonar.clone()),
            SonarEcho(sonar.clone()),
            SonarPower(sonar.clone()),
            SonarClock(sonar.clone()),
        )
    }

    #[derive(Default)]
    struct CountingDelay {
        total_us: u64,
    }

    impl DelayNs for CountingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_us += u64::from(ns / 1000);
        }
    }

    #[test]
    fn test_reading_averages_ten_echoes() {
        let echoes: Vec<_> = (0..10).map(|i| Some(if i % 2 == 0 { 1000 } else { 1200 })).collect();
        let sonar = Sonar::shared(&echoes);
        let mut payload = RecordingPayload::new();
        sensor(&sonar).read(&mut NoDelay, &mut payload).unwrap();
        // 1100 us * 0.1733 mm/us
        assert_eq!(payload.records, [(Channel::DISTANCE, Recorded::Distance(190))]);
        assert_eq!(sonar.borrow().triggers, 10);
        assert!(!sonar.borrow().powered);
    }

    #[test]
    fn test_late_and_missing_echoes_are_skipped() {
        let mut echoes = [None; 10];
        echoes[3] = Some(30_000);
        echoes[7] = Some(1000);
        let sonar = Sonar::shared(&echoes);
        assert_eq!(sensor(&sonar).measure(&mut NoDelay), Ok(173));
    }

    #[test]
    fn test_silence_is_not_ready() {
        let sonar = Sonar::shared(&[None; 10]);
        let mut payload = RecordingPayload::new();
        let mut us = sensor(&sonar);
        assert_eq!(us.read(&mut NoDelay, &mut payload), Err(DriverError::NotReady));
        assert!(payload.records.is_empty());
        assert!(!sonar.borrow().powered);
        assert!(!us.detect(&mut NoDelay));
    }

    #[test]
    fn test_answering_sensor_is_detected() {
        let sonar = Sonar::shared(&[Some(2000); 10]);
        assert!(sensor(&sonar).detect(&mut NoDelay));
    }

    #[test]
    fn test_measurement_timing() {
        let sonar = Sonar::shared(&[Some(1000); 10]);
        let mut delay = CountingDelay::default();
        sensor(&sonar).measure(&mut delay).unwrap();
        // Power-up, then trigger pulse, echo settle and gap per shot
        assert_eq!(delay.total_us, 500_000 + 10 * (20 + 33_000 + 500_000));
    }
}
