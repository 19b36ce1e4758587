use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::MeasureInterval;

/// Configuration errors are the only hard failure in the crate: they signal
/// a programming-contract violation at startup, never a runtime data issue.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("unknown preset \"{0}\", available: sweden-monthly, belgium-annual")]
    UnknownPreset(String),
    #[error("invalid configuration: {field} {message}")]
    Invalid { field: &'static str, message: String },
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field, message: message.into() }
}

/// Billing model for the capacity charge. The two variants carry only the
/// fields relevant to them; electrical and battery parameters are shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BillingMode {
    /// Charge billed on the average of the top N peaks of the month
    /// (Swedish "effekttariff").
    RankedAverage {
        peak_count: usize,
        /// At most one billing peak per calendar day.
        one_peak_per_day: bool,
    },
    /// Charge billed on the single highest peak of the month, optionally
    /// averaged over a rolling window of months (Belgian "capaciteitstarief").
    SinglePeak {
        /// Number of months in the rolling annual average; `None` disables
        /// the rolling history.
        rolling_months: Option<usize>,
    },
}

/// Policy for the learning phase, before enough peaks exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum LearningPolicy {
    /// No numeric target; fall back to the minimum floor.
    FixedMinimum,
    /// Limit against a percentage of the previous period's peak average.
    CarryoverPercentage { percent: f64 },
}

/// An hour-of-day window, start inclusive, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.end_hour
    }
}

/// Hours of the day during which peaks are billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakHours {
    pub start_hour: u32,
    pub end_hour: u32,
    /// Only Monday through Friday count towards billing.
    pub weekdays_only: bool,
}

/// Months of the year during which the capacity charge applies. The window
/// may wrap the year end (e.g. November through March).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonWindow {
    pub start_month: u32,
    pub end_month: u32,
}

/// One row of the dynamic-headroom rule table: applies while the battery SOC
/// is below `soc_below`. Rows are ordered ascending by threshold; the row
/// with the largest threshold acts as the catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadroomRule {
    pub soc_below: f64,
    pub headroom_w: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// The enforced limit never drops below this.
    pub min_floor_w: f64,
    /// Fixed safety margin subtracted from the protected peak.
    pub headroom_w: f64,
    /// SOC-dependent headroom overriding the fixed margin when non-empty.
    #[serde(default)]
    pub dynamic_headroom: Vec<HeadroomRule>,
    pub learning: LearningPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElectricalConfig {
    pub phases: u32,
    pub voltage_v: f64,
    /// Main fuse / breaker rating; the output current never exceeds it.
    pub main_fuse_a: f64,
}

/// Periodic full-charge-and-hold cycle for battery health.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalancingConfig {
    /// Start a cycle once SOC reaches this level inside the window.
    pub trigger_soc_percent: f64,
    pub target_soc_percent: f64,
    pub hold_hours: f64,
    pub window: HourWindow,
}

/// Which source produces the day's expected peak windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastSource {
    TimeBased,
    Historical,
    External,
}

/// Parameters of the fixed morning/evening time-based forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeBasedForecast {
    pub morning: HourWindow,
    pub evening: HourWindow,
    /// Share of the assumed daily peak expected in each window, percent.
    pub morning_share_percent: f64,
    pub evening_share_percent: f64,
    pub assumed_peak_w: f64,
}

impl Default for TimeBasedForecast {
    fn default() -> Self {
        Self {
            morning: HourWindow { start_hour: 7, end_hour: 9 },
            evening: HourWindow { start_hour: 17, end_hour: 21 },
            morning_share_percent: 40.0,
            evening_share_percent: 60.0,
            assumed_peak_w: 5_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    pub source: ForecastSource,
    /// Share of usable battery energy held back from the day's budget.
    pub buffer_percent: f64,
    #[serde(default)]
    pub time_based: TimeBasedForecast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryConfig {
    pub capacity_wh: f64,
    pub max_charge_w: f64,
    pub max_discharge_w: f64,
    /// Anticipatory charging targets `min_soc + soc_buffer_percent`.
    pub soc_buffer_percent: f64,
    #[serde(default)]
    pub balancing: Option<BalancingConfig>,
    /// `None` means greedy peak-hours discharge.
    #[serde(default)]
    pub forecast: Option<ForecastConfig>,
}

/// Immutable engine configuration, constructed once and threaded through
/// every call. There is no process-wide default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub billing: BillingMode,
    pub peak_hours: PeakHours,
    /// `None` means the charge applies all year.
    #[serde(default)]
    pub season: Option<SeasonWindow>,
    pub night_discount: bool,
    pub interval_minutes: MeasureInterval,
    pub limits: LimitConfig,
    pub electrical: ElectricalConfig,
    #[serde(default)]
    pub battery: Option<BatteryConfig>,
    /// Hour gap that counts as measurement downtime (60-minute intervals).
    pub downtime_trigger_hours: u32,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.billing {
            BillingMode::RankedAverage { peak_count, .. } => {
                if *peak_count == 0 {
                    return Err(invalid("billing.peak_count", "must be >= 1"));
                }
            }
            BillingMode::SinglePeak { rolling_months } => {
                if rolling_months == &Some(0) {
                    return Err(invalid("billing.rolling_months", "must be >= 1 when set"));
                }
            }
        }
        if self.peak_hours.start_hour >= self.peak_hours.end_hour
            || self.peak_hours.end_hour > 24
        {
            return Err(invalid("peak_hours", "requires start_hour < end_hour <= 24"));
        }
        if let Some(season) = &self.season {
            if !(1..=12).contains(&season.start_month) || !(1..=12).contains(&season.end_month) {
                return Err(invalid("season", "months must be in 1..=12"));
            }
        }
        if self.limits.min_floor_w < 0.0 || self.limits.headroom_w < 0.0 {
            return Err(invalid("limits", "floor and headroom must be >= 0"));
        }
        let rules = &self.limits.dynamic_headroom;
        if rules.windows(2).any(|w| w[0].soc_below >= w[1].soc_below) {
            return Err(invalid(
                "limits.dynamic_headroom",
                "rules must be sorted strictly ascending by soc_below",
            ));
        }
        if let LearningPolicy::CarryoverPercentage { percent } = self.limits.learning {
            if !(0.0..=100.0).contains(&percent) {
                return Err(invalid("limits.learning.percent", "must be in 0..=100"));
            }
        }
        if !(1..=3).contains(&self.electrical.phases) {
            return Err(invalid("electrical.phases", "must be 1, 2 or 3"));
        }
        if self.electrical.voltage_v <= 0.0 || self.electrical.main_fuse_a <= 0.0 {
            return Err(invalid("electrical", "voltage and main fuse must be > 0"));
        }
        if let Some(battery) = &self.battery {
            if battery.capacity_wh <= 0.0 {
                return Err(invalid("battery.capacity_wh", "must be > 0"));
            }
            if battery.max_charge_w < 0.0 || battery.max_discharge_w < 0.0 {
                return Err(invalid("battery", "charge/discharge rates must be >= 0"));
            }
            if !(0.0..=100.0).contains(&battery.soc_buffer_percent) {
                return Err(invalid("battery.soc_buffer_percent", "must be in 0..=100"));
            }
            if let Some(balancing) = &battery.balancing {
                if balancing.target_soc_percent < balancing.trigger_soc_percent
                    || balancing.target_soc_percent > 100.0
                {
                    return Err(invalid(
                        "battery.balancing",
                        "requires trigger <= target <= 100",
                    ));
                }
                if balancing.hold_hours <= 0.0 {
                    return Err(invalid("battery.balancing.hold_hours", "must be > 0"));
                }
                if balancing.window.start_hour >= balancing.window.end_hour
                    || balancing.window.end_hour > 24
                {
                    return Err(invalid(
                        "battery.balancing.window",
                        "requires start_hour < end_hour <= 24",
                    ));
                }
            }
            if let Some(forecast) = &battery.forecast {
                if !(0.0..=100.0).contains(&forecast.buffer_percent) {
                    return Err(invalid("battery.forecast.buffer_percent", "must be in 0..=100"));
                }
                if forecast.time_based.assumed_peak_w <= 0.0 {
                    return Err(invalid(
                        "battery.forecast.time_based.assumed_peak_w",
                        "must be > 0",
                    ));
                }
            }
        }
        if self.downtime_trigger_hours == 0 {
            return Err(invalid("downtime_trigger_hours", "must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub days: u32,
    pub seed: u64,
    /// Seconds between grid-power samples fed to the engine.
    pub sample_seconds: u32,
    /// Simulation start, `YYYY-MM-DD`.
    pub start_date: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            days: 35,
            seed: 42,
            sample_seconds: 60,
            start_date: "2026-01-05".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    pub csv_path: Option<PathBuf>,
    pub state_path: Option<PathBuf>,
}

/// Top-level configuration: engine parameters plus the harness knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    pub const PRESETS: &'static [&'static str] = &["sweden-monthly", "belgium-annual"];

    /// Swedish monthly effekttariff: average of the top 3 daily peaks,
    /// November through March, weekdays 07-20, night discount.
    pub fn sweden_monthly() -> Self {
        Self {
            engine: EngineConfig {
                billing: BillingMode::RankedAverage { peak_count: 3, one_peak_per_day: true },
                peak_hours: PeakHours { start_hour: 7, end_hour: 20, weekdays_only: true },
                season: Some(SeasonWindow { start_month: 11, end_month: 3 }),
                night_discount: true,
                interval_minutes: MeasureInterval::Min60,
                limits: LimitConfig {
                    min_floor_w: 2_000.0,
                    headroom_w: 300.0,
                    dynamic_headroom: vec![
                        HeadroomRule { soc_below: 30.0, headroom_w: 800.0 },
                        HeadroomRule { soc_below: 60.0, headroom_w: 500.0 },
                        HeadroomRule { soc_below: 100.0, headroom_w: 300.0 },
                    ],
                    learning: LearningPolicy::CarryoverPercentage { percent: 80.0 },
                },
                electrical: ElectricalConfig { phases: 3, voltage_v: 230.0, main_fuse_a: 20.0 },
                battery: Some(BatteryConfig {
                    capacity_wh: 10_000.0,
                    max_charge_w: 5_000.0,
                    max_discharge_w: 5_000.0,
                    soc_buffer_percent: 20.0,
                    balancing: Some(BalancingConfig {
                        trigger_soc_percent: 85.0,
                        target_soc_percent: 100.0,
                        hold_hours: 2.0,
                        window: HourWindow { start_hour: 0, end_hour: 6 },
                    }),
                    forecast: Some(ForecastConfig {
                        source: ForecastSource::Historical,
                        buffer_percent: 15.0,
                        time_based: TimeBasedForecast::default(),
                    }),
                }),
                downtime_trigger_hours: 2,
            },
            simulation: SimulationConfig::default(),
            report: ReportConfig::default(),
        }
    }

    /// Belgian capaciteitstarief: single monthly peak on a 15-minute grid,
    /// rolling 12-month average, all hours, no season or night discount.
    pub fn belgium_annual() -> Self {
        Self {
            engine: EngineConfig {
                billing: BillingMode::SinglePeak { rolling_months: Some(12) },
                peak_hours: PeakHours { start_hour: 0, end_hour: 24, weekdays_only: false },
                season: None,
                night_discount: false,
                interval_minutes: MeasureInterval::Min15,
                limits: LimitConfig {
                    min_floor_w: 2_500.0,
                    headroom_w: 250.0,
                    dynamic_headroom: Vec::new(),
                    learning: LearningPolicy::FixedMinimum,
                },
                electrical: ElectricalConfig { phases: 1, voltage_v: 230.0, main_fuse_a: 40.0 },
                battery: None,
                downtime_trigger_hours: 2,
            },
            simulation: SimulationConfig::default(),
            report: ReportConfig::default(),
        }
    }

    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "sweden-monthly" => Ok(Self::sweden_monthly()),
            "belgium-annual" => Ok(Self::belgium_annual()),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }

    /// Loads the configuration: preset defaults, overridden by
    /// `config/default.toml` when present, overridden by
    /// `CAPACITY_GUARD__`-prefixed environment variables.
    pub fn load(preset: &str) -> Result<Self, ConfigError> {
        let defaults = Self::from_preset(preset)?;
        let config: Self = Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("CAPACITY_GUARD__").split("__"))
            .extract()
            .map_err(Box::new)?;
        config.engine.validate()?;
        Ok(config)
    }
}
