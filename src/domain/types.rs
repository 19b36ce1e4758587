use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// Length of one measurement period on the billing grid.
///
/// Capacity tariffs are settled on 15, 30, or 60 minute averages depending
/// on the grid operator; no other lengths occur in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum MeasureInterval {
    Min15,
    Min30,
    Min60,
}

#[derive(Debug, Error)]
#[error("invalid measurement interval: {0} minutes (expected 15, 30 or 60)")]
pub struct InvalidInterval(pub u32);

impl TryFrom<u32> for MeasureInterval {
    type Error = InvalidInterval;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        match minutes {
            15 => Ok(Self::Min15),
            30 => Ok(Self::Min30),
            60 => Ok(Self::Min60),
            other => Err(InvalidInterval(other)),
        }
    }
}

impl From<MeasureInterval> for u32 {
    fn from(interval: MeasureInterval) -> u32 {
        interval.minutes()
    }
}

impl MeasureInterval {
    pub fn minutes(self) -> u32 {
        match self {
            Self::Min15 => 15,
            Self::Min30 => 30,
            Self::Min60 => 60,
        }
    }

    pub fn as_hours(self) -> f64 {
        f64::from(self.minutes()) / 60.0
    }
}

/// A billing-relevant peak: one completed measurement period that is (or was)
/// a candidate for the capacity charge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakEntry {
    pub date: NaiveDate,
    pub hour: u32,
    /// Measured average power for the period.
    pub raw_w: f64,
    /// Billing value after night-discount adjustment; equals `raw_w` unless
    /// the discount applied.
    pub effective_w: f64,
}

/// Emitted by the aggregator when the measurement period rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletedPeriod {
    pub date: NaiveDate,
    pub hour: u32,
    /// Slot index within the hour (always 0 for 60-minute periods).
    pub slot: u32,
    pub average_w: f64,
    pub was_night_hour: bool,
    pub effective_w: f64,
}

/// A gap in the measurement stream, detected from consecutive hour markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowntimeEvent {
    pub from_hour: u32,
    pub to_hour: u32,
    pub missed_hours: u32,
}

/// Live battery telemetry supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    pub soc_percent: f64,
    pub min_soc_percent: f64,
}

impl BatteryReading {
    /// Telemetry is usable only with a finite state of charge.
    pub fn is_valid(&self) -> bool {
        self.soc_percent.is_finite() && self.min_soc_percent.is_finite()
    }
}

/// What the peak registry did with a submitted period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum RecordDecision {
    /// New entry appended to the ranked list (or first peak of the period).
    Added,
    /// Replaced an existing same-date entry with a higher value.
    Updated,
    /// An equal or higher entry already existed.
    Kept,
    /// The period fell outside peak hours or peak season.
    Skipped,
}

/// Which branch produced the current target limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum LimitReason {
    /// Not enough peak history; no numeric target.
    Learning,
    /// Learning phase, limiting against a percentage of last period's average.
    Carryover,
    /// The computed target was clamped up to the configured floor.
    MinimumFloor,
    /// Data-driven target from the protected peak.
    Computed,
}

/// Which branch of the battery state machine fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum BatteryReason {
    NoBatteryData,
    PeakDischarge,
    BudgetedDischarge,
    PeriodBudgetExhausted,
    OutsideForecastPeriod,
    BelowLimit,
    AtSocFloor,
    Balancing,
    BalancingHold,
    AnticipatoryCharge,
    Idle,
}

/// Uniform battery recommendation returned by the scheduler.
///
/// `charge_rate_w` is signed grid-side power: positive = charging,
/// negative = discharging, zero = idle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryAction {
    pub charge_rate_w: f64,
    pub charging: bool,
    pub reason: BatteryReason,
    pub target_soc_percent: Option<f64>,
    pub current_soc_percent: Option<f64>,
    pub min_soc_percent: Option<f64>,
    pub hours_until_peak: Option<f64>,
    pub balancing_active: bool,
    /// Index into the active forecast's period list, when a budgeted
    /// discharge is running; the caller records energy spend under it.
    pub forecast_period: Option<usize>,
}

impl BatteryAction {
    /// The no-op result for missing or non-numeric telemetry.
    pub fn no_data() -> Self {
        Self {
            charge_rate_w: 0.0,
            charging: false,
            reason: BatteryReason::NoBatteryData,
            target_soc_percent: None,
            current_soc_percent: None,
            min_soc_percent: None,
            hours_until_peak: None,
            balancing_active: false,
            forecast_period: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_minutes() {
        assert_eq!(MeasureInterval::try_from(15).unwrap(), MeasureInterval::Min15);
        assert_eq!(MeasureInterval::try_from(60).unwrap(), MeasureInterval::Min60);
        assert!(MeasureInterval::try_from(45).is_err());
    }

    #[test]
    fn test_interval_hours() {
        assert_eq!(MeasureInterval::Min15.as_hours(), 0.25);
        assert_eq!(MeasureInterval::Min60.as_hours(), 1.0);
    }

    #[test]
    fn test_reading_validity() {
        let ok = BatteryReading { soc_percent: 55.0, min_soc_percent: 20.0 };
        assert!(ok.is_valid());
        let bad = BatteryReading { soc_percent: f64::NAN, min_soc_percent: 20.0 };
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(BatteryReason::NoBatteryData.to_string(), "no_battery_data");
        assert_eq!(BatteryReason::PeriodBudgetExhausted.to_string(), "period_budget_exhausted");
        assert_eq!(LimitReason::MinimumFloor.to_string(), "minimum_floor");
    }
}
