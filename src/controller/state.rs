//! The caller-owned engine state. Created empty once, mutated in place by
//! every call, and persisted between invocations by the caller; the whole
//! structure round-trips through serde unchanged.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::PeakEntry;
use crate::forecast::{DayForecast, ExternalForecast, HourlyHistory};

/// Identifier of one measurement period on the interval grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodId {
    pub date: NaiveDate,
    pub hour: u32,
    /// Slot within the hour: minute-of-hour floored to the interval grid.
    pub slot: u32,
}

/// Running sum for the current, not yet completed, measurement period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    pub period: Option<PeriodId>,
    pub sum_w: f64,
    pub samples: u32,
}

impl Accumulator {
    pub fn average_w(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sum_w / f64::from(self.samples)
        }
    }
}

/// One month's billing peak in the rolling annual history, most recent
/// first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPeak {
    /// Billing month key, `YYYY-MM`.
    pub month: String,
    pub peak_w: f64,
}

/// Balancing sub-state: whether a health cycle is running and how long the
/// full battery has been held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BalancingState {
    pub active: bool,
    /// Set when the target SOC is first reached; the hold timer measures
    /// wall-clock time from here.
    pub hold_started_at: Option<DateTime<FixedOffset>>,
    /// Makes the cycle one-shot per qualifying window.
    pub last_completed_on: Option<NaiveDate>,
}

/// Forecast sub-state: the active day forecast, per-period energy spend,
/// and the incrementally learned hourly history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastState {
    pub active: Option<DayForecast>,
    /// Energy already discharged per forecast period, indexed like the
    /// active forecast's period list.
    pub spent_wh: Vec<f64>,
    pub generated_on: Option<NaiveDate>,
    pub history: HourlyHistory,
    /// Caller-supplied external payload, consumed at the next regeneration.
    pub external: Option<ExternalForecast>,
}

/// Complete engine state. See the field groups for which subsystem owns
/// what; nothing outside [`crate::controller`] mutates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    /// Billing month marker, `YYYY-MM`; a differing sample month triggers
    /// rollover.
    pub billing_month: Option<String>,
    /// Ranked-average mode: billing peaks sorted descending by effective
    /// value.
    pub ranked_peaks: Vec<PeakEntry>,
    /// Single-peak mode: the month's highest measurement.
    pub month_peak: Option<PeakEntry>,
    /// Outgoing average snapshotted at the last rollover, for carryover.
    pub previous_period_average_w: Option<f64>,
    /// Rolling annual history of monthly peaks, most recent first.
    pub monthly_history: Vec<MonthlyPeak>,
    pub accumulator: Accumulator,
    /// Last emitted output current, for change detection.
    pub last_output_a: Option<f64>,
    /// Hour marker of the previous sample, for downtime detection.
    pub last_hour: Option<u32>,
    pub balancing: BalancingState,
    pub forecast: ForecastState,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }
}
