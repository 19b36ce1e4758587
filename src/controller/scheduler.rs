//! Battery scheduling: one decision per invocation, in priority order
//! peak-hours discharge, balancing, anticipatory charge, idle.

use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use tracing::{debug, info};

use super::state::EngineState;
use crate::config::{BalancingConfig, BatteryConfig, EngineConfig};
use crate::domain::{calendar, BatteryAction, BatteryReading, BatteryReason};
use crate::forecast::{budget, generate_forecast};

/// Computes the battery recommendation for this sample. `None` when no
/// battery is configured; missing or non-numeric telemetry yields the
/// "no battery data" no-op.
pub fn battery_status(
    state: &mut EngineState,
    config: &EngineConfig,
    battery: Option<&BatteryReading>,
    sample_w: f64,
    now: DateTime<FixedOffset>,
) -> Option<BatteryAction> {
    let battery_config = config.battery.as_ref()?;
    let Some(reading) = battery.filter(|reading| reading.is_valid()) else {
        return Some(BatteryAction::no_data());
    };
    let sample_w = sample_w.max(0.0);
    let soc = reading.soc_percent;
    let min_soc = reading.min_soc_percent;
    let target_soc = (min_soc + battery_config.soc_buffer_percent).min(100.0);

    let in_peak = calendar::in_peak_season(now.month(), config.season.as_ref())
        && calendar::in_peak_hours(now.hour(), now.weekday(), &config.peak_hours);

    if in_peak {
        if state.balancing.active {
            // Peak shaving outranks battery health; abandon the cycle.
            state.balancing.active = false;
            state.balancing.hold_started_at = None;
            info!("balancing interrupted by peak hours");
        }
        return Some(discharge(state, config, battery_config, sample_w, soc, min_soc, now));
    }

    if let Some(balancing_config) = &battery_config.balancing {
        if let Some(action) = balancing(state, balancing_config, battery_config, soc, min_soc, now)
        {
            return Some(action);
        }
    }

    let hours_until_peak = calendar::hours_until_peak_start(now, &config.peak_hours);
    if soc < target_soc {
        // Spread the deficit over the time left before the window opens.
        let deficit_wh = (target_soc - soc) / 100.0 * battery_config.capacity_wh;
        let rate_w = (deficit_wh / hours_until_peak).min(battery_config.max_charge_w);
        let rate_w = (rate_w / 10.0).round() * 10.0;
        debug!(rate_w, hours_until_peak, "anticipatory charge");
        return Some(BatteryAction {
            charge_rate_w: rate_w,
            charging: rate_w > 0.0,
            reason: BatteryReason::AnticipatoryCharge,
            target_soc_percent: Some(target_soc),
            current_soc_percent: Some(soc),
            min_soc_percent: Some(min_soc),
            hours_until_peak: Some(hours_until_peak),
            balancing_active: false,
            forecast_period: None,
        });
    }

    Some(BatteryAction {
        charge_rate_w: 0.0,
        charging: false,
        reason: BatteryReason::Idle,
        target_soc_percent: Some(target_soc),
        current_soc_percent: Some(soc),
        min_soc_percent: Some(min_soc),
        hours_until_peak: Some(hours_until_peak),
        balancing_active: false,
        forecast_period: None,
    })
}

/// Peak-hours discharge: forecast-budgeted when a forecast source is
/// configured, greedy otherwise.
fn discharge(
    state: &mut EngineState,
    config: &EngineConfig,
    battery_config: &BatteryConfig,
    sample_w: f64,
    soc: f64,
    min_soc: f64,
    now: DateTime<FixedOffset>,
) -> BatteryAction {
    let mut action = BatteryAction {
        charge_rate_w: 0.0,
        charging: false,
        reason: BatteryReason::BelowLimit,
        target_soc_percent: None,
        current_soc_percent: Some(soc),
        min_soc_percent: Some(min_soc),
        hours_until_peak: None,
        balancing_active: false,
        forecast_period: None,
    };

    if battery_config.forecast.is_some() {
        ensure_forecast(state, config, battery_config, soc, min_soc, now);
        if let Some(forecast) = &state.forecast.active {
            let result = budget::budgeted_discharge(
                battery_config,
                config.interval_minutes,
                config.limits.min_floor_w,
                forecast,
                &state.forecast.spent_wh,
                now,
                sample_w,
                soc,
                min_soc,
            );
            action.charge_rate_w = -result.rate_w;
            action.reason = result.reason;
            action.forecast_period = result.period;
            return action;
        }
    }

    let excess_w = sample_w - config.limits.min_floor_w;
    if excess_w <= 0.0 {
        return action;
    }
    if soc <= min_soc {
        action.reason = BatteryReason::AtSocFloor;
        return action;
    }
    let available_wh = (soc - min_soc) / 100.0 * battery_config.capacity_wh;
    let rate_w = battery_config
        .max_discharge_w
        .min(available_wh / config.interval_minutes.as_hours())
        .min(excess_w);
    action.charge_rate_w = -rate_w;
    action.reason = BatteryReason::PeakDischarge;
    action
}

/// Regenerates the day's forecast when the date changed, allocating the
/// discharge budget from the energy currently above the SOC floor and
/// clearing the per-period spend.
fn ensure_forecast(
    state: &mut EngineState,
    config: &EngineConfig,
    battery_config: &BatteryConfig,
    soc: f64,
    min_soc: f64,
    now: DateTime<FixedOffset>,
) {
    let Some(forecast_config) = &battery_config.forecast else {
        return;
    };
    let today = now.date_naive();
    if state.forecast.generated_on == Some(today) && state.forecast.active.is_some() {
        return;
    }
    let mut forecast = generate_forecast(
        forecast_config,
        &config.peak_hours,
        &state.forecast.history,
        now,
        state.forecast.external.as_ref(),
    );
    let usable_wh = (soc - min_soc).max(0.0) / 100.0 * battery_config.capacity_wh;
    budget::allocate_budget(&mut forecast, usable_wh, forecast_config.buffer_percent);
    info!(
        date = %today,
        periods = forecast.periods.len(),
        usable_wh,
        "daily forecast generated"
    );
    state.forecast.spent_wh = vec![0.0; forecast.periods.len()];
    state.forecast.generated_on = Some(today);
    state.forecast.active = Some(forecast);
}

/// The balancing sub-machine. Returns `None` when balancing is not running
/// and should not start, or when a completed cycle falls through to the
/// normal off-peak logic.
fn balancing(
    state: &mut EngineState,
    balancing_config: &BalancingConfig,
    battery_config: &BatteryConfig,
    soc: f64,
    min_soc: f64,
    now: DateTime<FixedOffset>,
) -> Option<BatteryAction> {
    let today = now.date_naive();
    if !state.balancing.active {
        let in_window = balancing_config.window.contains(now.hour());
        let completed_today = state.balancing.last_completed_on == Some(today);
        if soc < balancing_config.trigger_soc_percent || !in_window || completed_today {
            return None;
        }
        state.balancing.active = true;
        state.balancing.hold_started_at = None;
        info!(soc_percent = soc, "balancing cycle started");
    }

    if soc < balancing_config.target_soc_percent {
        state.balancing.hold_started_at = None;
        return Some(BatteryAction {
            charge_rate_w: battery_config.max_charge_w,
            charging: true,
            reason: BatteryReason::Balancing,
            target_soc_percent: Some(balancing_config.target_soc_percent),
            current_soc_percent: Some(soc),
            min_soc_percent: Some(min_soc),
            hours_until_peak: None,
            balancing_active: true,
            forecast_period: None,
        });
    }

    let hold_started = *state.balancing.hold_started_at.get_or_insert(now);
    let held_hours = (now - hold_started).num_seconds() as f64 / 3600.0;
    if held_hours < balancing_config.hold_hours {
        return Some(BatteryAction {
            charge_rate_w: 0.0,
            charging: false,
            reason: BatteryReason::BalancingHold,
            target_soc_percent: Some(balancing_config.target_soc_percent),
            current_soc_percent: Some(soc),
            min_soc_percent: Some(min_soc),
            hours_until_peak: None,
            balancing_active: true,
            forecast_period: None,
        });
    }

    state.balancing.active = false;
    state.balancing.hold_started_at = None;
    state.balancing.last_completed_on = Some(today);
    info!(held_hours, "balancing cycle complete");
    None
}
