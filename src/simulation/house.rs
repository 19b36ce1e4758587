//! Household electrical load with time-of-day patterns, random noise, and
//! occasional appliance events. Electrical load only; no thermal modelling.

use chrono::{DateTime, FixedOffset, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// House load simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseSimulatorConfig {
    /// Always-on consumption in watts.
    pub base_w: f64,
    /// Morning activity peak added on top of the base, watts.
    pub morning_peak_w: f64,
    /// Evening activity peak added on top of the base, watts.
    pub evening_peak_w: f64,
    /// Uniform noise amplitude as a fraction of the momentary load.
    pub noise_fraction: f64,
    /// Chance per sample of an appliance event (oven, kettle, charger).
    pub appliance_probability: f64,
    /// Appliance event size, watts.
    pub appliance_w: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for HouseSimulatorConfig {
    fn default() -> Self {
        Self {
            base_w: 600.0,
            morning_peak_w: 2_500.0,
            evening_peak_w: 3_500.0,
            noise_fraction: 0.1,
            appliance_probability: 0.02,
            appliance_w: 2_000.0,
            seed: 42,
        }
    }
}

pub struct HouseSimulator {
    config: HouseSimulatorConfig,
    rng: StdRng,
}

impl HouseSimulator {
    pub fn new(config: HouseSimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    /// Instantaneous household load at the given wall-clock time.
    pub fn load_w(&mut self, now: DateTime<FixedOffset>) -> f64 {
        let hour = f64::from(now.hour()) + f64::from(now.minute()) / 60.0;

        let morning = bump(hour, 7.5, 1.5) * self.config.morning_peak_w;
        let evening = bump(hour, 18.5, 2.0) * self.config.evening_peak_w;
        let mut load_w = self.config.base_w + morning + evening;

        if self.rng.gen_bool(self.config.appliance_probability.clamp(0.0, 1.0)) {
            load_w += self.config.appliance_w;
        }
        let noise = self.rng.gen_range(-1.0..=1.0) * self.config.noise_fraction * load_w;
        (load_w + noise).max(0.0)
    }
}

/// Gaussian-shaped activity bump centred on `mu` hours.
fn bump(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma.max(0.01);
    (-0.5 * z * z).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2026, 1, 5, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_evening_load_exceeds_night_load() {
        let mut house = HouseSimulator::new(HouseSimulatorConfig {
            noise_fraction: 0.0,
            appliance_probability: 0.0,
            ..HouseSimulatorConfig::default()
        });
        let night = house.load_w(at(3));
        let evening = house.load_w(at(18));
        assert!(evening > night * 2.0, "evening {evening} vs night {night}");
    }

    #[test]
    fn test_load_is_never_negative() {
        let mut house = HouseSimulator::new(HouseSimulatorConfig {
            noise_fraction: 1.0,
            ..HouseSimulatorConfig::default()
        });
        for hour in 0..24 {
            assert!(house.load_w(at(hour)) >= 0.0);
        }
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let config = HouseSimulatorConfig::default();
        let mut a = HouseSimulator::new(config.clone());
        let mut b = HouseSimulator::new(config);
        for hour in 0..24 {
            assert_eq!(a.load_w(at(hour)), b.load_w(at(hour)));
        }
    }
}
