//! The capacity controller: one synchronous, deterministic pass per grid
//! sample. The caller owns the [`EngineState`] and persists it; every entry
//! point runs to completion and never blocks.

pub mod aggregator;
pub mod limit;
pub mod peaks;
pub mod scheduler;
pub mod state;

use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{BillingMode, ConfigError, EngineConfig};
use crate::domain::{
    calendar, BatteryAction, BatteryReading, CompletedPeriod, DowntimeEvent, LimitReason,
    PeakEntry, RecordDecision,
};
use crate::forecast::ExternalForecast;

pub use state::EngineState;

/// Everything the host learns from one processed sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleOutcome {
    /// A billing-period rollover happened during this call.
    pub month_reset: bool,
    /// The measurement period that completed, if the grid rolled over.
    pub completed: Option<CompletedPeriod>,
    /// What the registry did with the completed period.
    pub record_decision: Option<RecordDecision>,
    pub downtime: Option<DowntimeEvent>,
    pub in_peak_season: bool,
    pub in_peak_hours: bool,
    pub is_learning: bool,
    pub using_carryover: bool,
    /// Running average of the current, incomplete period.
    pub current_average_w: f64,
    pub target_limit_w: Option<f64>,
    pub limit_reason: LimitReason,
    pub output_limit_a: f64,
    pub output_changed: bool,
    /// Billing average of the period so far (top-N mean or single peak).
    pub peak_average_w: Option<f64>,
    /// Ranked-average mode: current peak list, highest first.
    pub ranked_peaks: Vec<PeakEntry>,
    /// Single-peak mode: the month's record so far.
    pub current_month_peak: Option<PeakEntry>,
    /// Rolling annual average, when the history is in use.
    pub rolling_average_w: Option<f64>,
}

/// The engine facade. Owns the immutable configuration; all mutable state
/// lives in the caller's [`EngineState`].
#[derive(Debug, Clone)]
pub struct CapacityController {
    config: EngineConfig,
}

impl CapacityController {
    /// Validates the configuration and builds the controller.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Processes one instantaneous grid-power reading.
    ///
    /// The optional battery reading only feeds the dynamic-headroom rule
    /// table here; battery steering is [`Self::battery_status`].
    pub fn process_sample(
        &self,
        state: &mut EngineState,
        power_w: f64,
        timestamp: DateTime<FixedOffset>,
        battery: Option<&BatteryReading>,
    ) -> SampleOutcome {
        let config = &self.config;
        let sample_w = power_w.max(0.0);

        let completed = aggregator::accumulate(state, config, sample_w, timestamp);
        let downtime = aggregator::detect_downtime(state, config, timestamp);

        // The completed period is judged by its own calendar position, and
        // recorded before any rollover so the final interval of a month is
        // credited to that month.
        let record_decision = completed.as_ref().map(|period| {
            state.forecast.history.update(period.date.weekday(), period.hour, period.average_w);
            let qualifies = calendar::in_peak_season(period.date.month(), config.season.as_ref())
                && calendar::in_peak_hours(period.hour, period.date.weekday(), &config.peak_hours);
            if qualifies {
                peaks::record(state, config, period)
            } else {
                RecordDecision::Skipped
            }
        });

        let month_key = format!("{:04}-{:02}", timestamp.year(), timestamp.month());
        let mut month_reset = false;
        if state.billing_month.as_deref() != Some(month_key.as_str()) {
            if let Some(outgoing) = state.billing_month.take() {
                peaks::rollover(state, config, &outgoing);
                month_reset = true;
            }
            state.billing_month = Some(month_key);
        }

        let in_peak_season = calendar::in_peak_season(timestamp.month(), config.season.as_ref());
        let in_peak_hours =
            calendar::in_peak_hours(timestamp.hour(), timestamp.weekday(), &config.peak_hours);

        let soc_percent = battery.filter(|reading| reading.is_valid()).map(|r| r.soc_percent);
        let decision = limit::target_limit(state, config, soc_percent);

        // Outside the billed window there is nothing to protect: the limit
        // opens up to the main fuse.
        let output_limit_a = if in_peak_season && in_peak_hours {
            limit::to_output_current(decision.target_w, config)
        } else {
            config.electrical.main_fuse_a
        };
        let output_changed = state.last_output_a != Some(output_limit_a);
        state.last_output_a = Some(output_limit_a);
        if output_changed {
            info!(
                output_limit_a,
                target_limit_w = decision.target_w,
                reason = %decision.reason,
                "output limit changed"
            );
        }

        let (ranked_peaks, current_month_peak, rolling_average_w) = match &config.billing {
            BillingMode::RankedAverage { .. } => (state.ranked_peaks.clone(), None, None),
            BillingMode::SinglePeak { rolling_months } => (
                Vec::new(),
                state.month_peak,
                rolling_months.and_then(|_| peaks::rolling_average(state)),
            ),
        };

        SampleOutcome {
            month_reset,
            completed,
            record_decision,
            downtime,
            in_peak_season,
            in_peak_hours,
            is_learning: decision.is_learning,
            using_carryover: decision.using_carryover,
            current_average_w: state.accumulator.average_w(),
            target_limit_w: decision.target_w,
            limit_reason: decision.reason,
            output_limit_a,
            output_changed,
            peak_average_w: peaks::peak_average(state, config),
            ranked_peaks,
            current_month_peak,
            rolling_average_w,
        }
    }

    /// Battery charge/discharge recommendation for this sample. `None` when
    /// no battery is configured.
    pub fn battery_status(
        &self,
        state: &mut EngineState,
        battery: Option<&BatteryReading>,
        sample_w: f64,
        timestamp: DateTime<FixedOffset>,
    ) -> Option<BatteryAction> {
        scheduler::battery_status(state, &self.config, battery, sample_w, timestamp)
    }

    /// Accumulates discharged energy against a forecast period's budget.
    /// The caller invokes this with the energy actually moved since the
    /// previous sample, under the period index reported in
    /// [`BatteryAction::forecast_period`].
    pub fn record_budget_spend(&self, state: &mut EngineState, period: usize, energy_wh: f64) {
        if let Some(spent) = state.forecast.spent_wh.get_mut(period) {
            *spent += energy_wh.max(0.0);
        }
    }

    /// Stores an externally supplied forecast payload; consumed at the next
    /// daily regeneration when the external source is configured.
    pub fn set_external_forecast(&self, state: &mut EngineState, payload: ExternalForecast) {
        state.forecast.external = Some(payload);
    }
}
