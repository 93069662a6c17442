//! Sensirion gas index algorithm, VOC flavour, default tuning
//!
//! Turns the SGP40's raw ticks into a 1..=500 index where 100 is the
//! learned baseline. Must be fed once per [`SAMPLING_INTERVAL_S`].
//!
//! ```text
//! sraw ─► mean/variance estimator ─► mox model ─► sigmoid ─► adaptive lowpass ─► index
//!              ▲                                                   │
//!              └──────────────────── gating ◄──────────────────────┘
//! ```

use libm::{expf, fabsf, sqrtf};

pub const SAMPLING_INTERVAL_S: f32 = 1.0;

/// Samples ignored after (re)start while the hotplate settles
const INITIAL_BLACKOUT_S: f32 = 45.0;
const INDEX_GAIN: f32 = 230.0;
const SRAW_MINIMUM: i32 = 20_000;
const SRAW_STD_INITIAL: f32 = 50.0;
const SRAW_STD_BONUS: f32 = 220.0;
const TAU_MEAN_HOURS: f32 = 12.0;
const TAU_VARIANCE_HOURS: f32 = 12.0;
const TAU_INITIAL_MEAN: f32 = 20.0;
const INIT_DURATION_MEAN: f32 = 3600.0 * 0.75;
const INIT_TRANSITION_MEAN: f32 = 0.01;
const TAU_INITIAL_VARIANCE: f32 = 2500.0;
const INIT_DURATION_VARIANCE: f32 = 3600.0 * 1.45;
const INIT_TRANSITION_VARIANCE: f32 = 0.01;
const GATING_THRESHOLD: f32 = 340.0;
const GATING_THRESHOLD_INITIAL: f32 = 510.0;
const GATING_THRESHOLD_TRANSITION: f32 = 0.09;
const GATING_MAX_DURATION_MINUTES: f32 = 60.0 * 3.0;
const GATING_MAX_RATIO: f32 = 0.3;
const SIGMOID_L: f32 = 500.0;
const SIGMOID_K: f32 = -0.0065;
const SIGMOID_X0: f32 = 213.0;
const LP_TAU_FAST: f32 = 20.0;
const LP_TAU_SLOW: f32 = 500.0;
const LP_ALPHA: f32 = -0.2;
const GAMMA_SCALING: f32 = 64.0;
const ADDITIONAL_GAMMA_MEAN_SCALING: f32 = 8.0;
/// Uptime counters saturate here
const UPTIME_LIMIT: f32 = 32767.0 - SAMPLING_INTERVAL_S;

/// `1 / (1 + e^(k (x - x0)))`, clamped for large exponents
fn sigmoid(x: f32, x0: f32, k: f32) -> f32 {
    let exponent = k * (x - x0);
    if exponent < -50.0 {
        1.0
    } else if exponent > 50.0 {
        0.0
    } else {
        1.0 / (1.0 + expf(exponent))
    }
}

/// Tracks the raw signal's running mean and spread
#[derive(Debug, Clone)]
struct MeanVariance {
    initialized: bool,
    mean: f32,
    sraw_offset: f32,
    std: f32,
    gamma_mean: f32,
    gamma_variance: f32,
    uptime_gamma: f32,
    uptime_gating: f32,
    gating_duration_minutes: f32,
}

impl MeanVariance {
    const fn new() -> Self {
        Self {
            initialized: false,
            mean: 0.0,
            sraw_offset: 0.0,
            std: SRAW_STD_INITIAL,
            gamma_mean: 0.0,
            gamma_variance: 0.0,
            uptime_gamma: 0.0,
            uptime_gating: 0.0,
            gating_duration_minutes: 0.0,
        }
    }

    fn mean(&self) -> f32 {
        self.mean + self.sraw_offset
    }

    fn update_gamma(&mut self, gas_index: f32) {
        let hours = SAMPLING_INTERVAL_S / 3600.0;
        let gamma_mean = ADDITIONAL_GAMMA_MEAN_SCALING * GAMMA_SCALING * hours / (TAU_MEAN_HOURS + hours);
        let gamma_variance = GAMMA_SCALING * hours / (TAU_VARIANCE_HOURS + hours);
        let gamma_initial_mean =
            ADDITIONAL_GAMMA_MEAN_SCALING * GAMMA_SCALING * SAMPLING_INTERVAL_S / (TAU_INITIAL_MEAN + SAMPLING_INTERVAL_S);
        let gamma_initial_variance = GAMMA_SCALING * SAMPLING_INTERVAL_S / (TAU_INITIAL_VARIANCE + SAMPLING_INTERVAL_S);

        if self.uptime_gamma < UPTIME_LIMIT {
            self.uptime_gamma += SAMPLING_INTERVAL_S;
        }
        if self.uptime_gating < UPTIME_LIMIT {
            self.uptime_gating += SAMPLING_INTERVAL_S;
        }

        let sigmoid_gamma_mean = sigmoid(self.uptime_gamma, INIT_DURATION_MEAN, INIT_TRANSITION_MEAN);
        let mean_gamma = gamma_mean + (gamma_initial_mean - gamma_mean) * sigmoid_gamma_mean;
        let threshold_mean = GATING_THRESHOLD
            + (GATING_THRESHOLD_INITIAL - GATING_THRESHOLD)
                * sigmoid(self.uptime_gating, INIT_DURATION_MEAN, INIT_TRANSITION_MEAN);
        let sigmoid_gating_mean = sigmoid(gas_index, threshold_mean, GATING_THRESHOLD_TRANSITION);
        self.gamma_mean = sigmoid_gating_mean * mean_gamma;

        let sigmoid_gamma_variance = sigmoid(self.uptime_gamma, INIT_DURATION_VARIANCE, INIT_TRANSITION_VARIANCE);
        let variance_gamma =
            gamma_variance + (gamma_initial_variance - gamma_variance) * (sigmoid_gamma_variance - sigmoid_gamma_mean);
        let threshold_variance = GATING_THRESHOLD
            + (GATING_THRESHOLD_INITIAL - GATING_THRESHOLD)
                * sigmoid(self.uptime_gating, INIT_DURATION_VARIANCE, INIT_TRANSITION_VARIANCE);
        let sigmoid_gating_variance = sigmoid(gas_index, threshold_variance, GATING_THRESHOLD_TRANSITION);
        self.gamma_variance = sigmoid_gating_variance * variance_gamma;

        self.gating_duration_minutes += (SAMPLING_INTERVAL_S / 60.0)
            * ((1.0 - sigmoid_gating_mean) * (1.0 + GATING_MAX_RATIO) - GATING_MAX_RATIO);
        if self.gating_duration_minutes < 0.0 {
            self.gating_duration_minutes = 0.0;
        }
        if self.gating_duration_minutes > GATING_MAX_DURATION_MINUTES {
            self.uptime_gating = 0.0;
        }
    }

    fn process(&mut self, sraw: f32, gas_index: f32) {
        if !self.initialized {
            self.initialized = true;
            self.sraw_offset = sraw;
            self.mean = 0.0;
            return;
        }
        if self.mean >= 100.0 || self.mean <= -100.0 {
            self.sraw_offset += self.mean;
            self.mean = 0.0;
        }
        let sraw = sraw - self.sraw_offset;
        self.update_gamma(gas_index);

        let delta = (sraw - self.mean) / GAMMA_SCALING;
        let spread = self.std + fabsf(delta);
        let scaling = if spread > 1440.0 { (spread / 1440.0) * (spread / 1440.0) } else { 1.0 };
        self.std = sqrtf(scaling * (GAMMA_SCALING - self.gamma_variance))
            * sqrtf(
                self.std * (self.std / (GAMMA_SCALING * scaling))
                    + self.gamma_variance * delta / scaling * delta,
            );
        self.mean += self.gamma_mean * delta / ADDITIONAL_GAMMA_MEAN_SCALING;
    }
}

/// Smooths the index, fast on steps and slow on drift
#[derive(Debug, Clone)]
struct AdaptiveLowpass {
    state: Option<[f32; 3]>,
}

impl AdaptiveLowpass {
    fn process(&mut self, sample: f32) -> f32 {
        let a1 = SAMPLING_INTERVAL_S / (LP_TAU_FAST + SAMPLING_INTERVAL_S);
        let a2 = SAMPLING_INTERVAL_S / (LP_TAU_SLOW + SAMPLING_INTERVAL_S);
        let [mut fast, mut slow, mut out] = self.state.unwrap_or([sample; 3]);
        fast = (1.0 - a1) * fast + a1 * sample;
        slow = (1.0 - a2) * slow + a2 * sample;
        let tau = (LP_TAU_SLOW - LP_TAU_FAST) * expf(LP_ALPHA * fabsf(fast - slow)) + LP_TAU_FAST;
        let a3 = SAMPLING_INTERVAL_S / (SAMPLING_INTERVAL_S + tau);
        out = (1.0 - a3) * out + a3 * sample;
        self.state = Some([fast, slow, out]);
        out
    }
}

/// VOC index state for one sensor
#[derive(Debug, Clone)]
pub struct VocIndex {
    uptime: f32,
    sraw: f32,
    gas_index: f32,
    estimator: MeanVariance,
    lowpass: AdaptiveLowpass,
}

impl Default for VocIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VocIndex {
    pub const fn new() -> Self {
        Self {
            uptime: 0.0,
            sraw: 0.0,
            gas_index: 0.0,
            estimator: MeanVariance::new(),
            lowpass: AdaptiveLowpass { state: None },
        }
    }

    /// Feed one raw reading, get the current index.
    ///
    /// Returns 0 during the initial blackout.
    pub fn process(&mut self, sraw: u16) -> u16 {
        if self.uptime <= INITIAL_BLACKOUT_S {
            self.uptime += SAMPLING_INTERVAL_S;
        } else {
            let sraw = i32::from(sraw);
            if sraw > 0 && sraw < 65_000 {
                let clamped = sraw.clamp(SRAW_MINIMUM + 1, SRAW_MINIMUM + 32_767);
                self.sraw = (clamped - SRAW_MINIMUM) as f32;
            }
            let mox = (self.sraw - self.estimator.mean()) / -(self.estimator.std + SRAW_STD_BONUS) * INDEX_GAIN;
            let scaled = SIGMOID_L * sigmoid(mox, SIGMOID_X0, SIGMOID_K);
            self.gas_index = self.lowpass.process(scaled).max(0.5);
            if self.sraw > 0.0 {
                self.estimator.process(self.sraw, self.gas_index);
            }
        }
        (self.gas_index + 0.5) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blackout_reports_zero() {
        let mut voc = VocIndex::new();
        for _ in 0..46 {
            assert_eq!(voc.process(30_000), 0);
        }
        assert_ne!(voc.process(30_000), 0);
    }

    #[test]
    fn test_steady_air_settles_at_baseline() {
        let mut voc = VocIndex::new();
        let mut index = 0;
        for _ in 0..400 {
            index = voc.process(30_000);
        }
        assert!((95..=105).contains(&index), "index {index}");
    }

    #[test]
    fn test_falling_raw_signal_raises_index() {
        let mut voc = VocIndex::new();
        for _ in 0..400 {
            voc.process(30_000);
        }
        // Fewer ticks means more VOCs
        let mut index = 0;
        for _ in 0..10 {
            index = voc.process(29_000);
        }
        assert!(index > 150, "index {index}");
    }

    #[test]
    fn test_sigmoid_saturates() {
        assert_eq!(sigmoid(0.0, 0.0, 1.0), 0.5);
        assert_eq!(sigmoid(-100.0, 0.0, 1.0), 1.0);
        assert_eq!(sigmoid(100.0, 0.0, 1.0), 0.0);
    }
}
