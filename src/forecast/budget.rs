//! Budget allocation over forecast periods and the throttled discharge rate
//! derived from it.

use chrono::{DateTime, FixedOffset, Timelike};

use super::DayForecast;
use crate::config::BatteryConfig;
use crate::domain::{BatteryReason, MeasureInterval};

/// Outcome of a budgeted-discharge evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetedDischarge {
    /// Discharge magnitude, watts (zero when nothing should be spent).
    pub rate_w: f64,
    /// Index of the containing forecast period, when there is one.
    pub period: Option<usize>,
    pub reason: BatteryReason,
}

/// Distributes the day's usable battery energy across the forecast periods.
///
/// `buffer_percent` of the usable capacity is held back; the remainder is
/// split proportional to period weight, or equally when all weights are
/// zero.
pub fn allocate_budget(forecast: &mut DayForecast, usable_wh: f64, buffer_percent: f64) {
    let period_count = forecast.periods.len();
    if period_count == 0 {
        return;
    }
    let budget_wh = (usable_wh * (1.0 - buffer_percent / 100.0)).max(0.0);
    let total_weight: f64 = forecast.periods.iter().map(|p| p.weight).sum();
    for period in &mut forecast.periods {
        period.budget_wh = if total_weight > 0.0 {
            budget_wh * period.weight / total_weight
        } else {
            budget_wh / period_count as f64
        };
    }
}

/// Discharge rate for the current forecast period: remaining budget spread
/// over the hours left in the period, capped by the excess over the minimum
/// floor, the battery's discharge rating, and the energy available above the
/// SOC floor.
#[allow(clippy::too_many_arguments)]
pub fn budgeted_discharge(
    battery: &BatteryConfig,
    interval: MeasureInterval,
    min_floor_w: f64,
    forecast: &DayForecast,
    spent_wh: &[f64],
    now: DateTime<FixedOffset>,
    sample_w: f64,
    soc_percent: f64,
    min_soc_percent: f64,
) -> BudgetedDischarge {
    let hour = now.hour();
    let Some(index) = forecast.periods.iter().position(|p| p.contains_hour(hour)) else {
        return BudgetedDischarge {
            rate_w: 0.0,
            period: None,
            reason: BatteryReason::OutsideForecastPeriod,
        };
    };
    let period = &forecast.periods[index];

    let remaining_wh = period.budget_wh - spent_wh.get(index).copied().unwrap_or(0.0);
    if remaining_wh <= 0.0 {
        return BudgetedDischarge {
            rate_w: 0.0,
            period: Some(index),
            reason: BatteryReason::PeriodBudgetExhausted,
        };
    }

    let excess_w = sample_w - min_floor_w;
    if excess_w <= 0.0 {
        return BudgetedDischarge {
            rate_w: 0.0,
            period: Some(index),
            reason: BatteryReason::BelowLimit,
        };
    }
    if soc_percent <= min_soc_percent {
        return BudgetedDischarge {
            rate_w: 0.0,
            period: Some(index),
            reason: BatteryReason::AtSocFloor,
        };
    }

    let now_frac = f64::from(now.hour())
        + f64::from(now.minute()) / 60.0
        + f64::from(now.second()) / 3600.0;
    let hours_left = (f64::from(period.end_hour) - now_frac).max(1.0 / 60.0);
    let target_rate_w = remaining_wh / hours_left;

    let available_wh = (soc_percent - min_soc_percent) / 100.0 * battery.capacity_wh;
    let available_rate_w = available_wh / interval.as_hours();

    let rate_w = target_rate_w
        .min(excess_w)
        .min(battery.max_discharge_w)
        .min(available_rate_w);

    BudgetedDischarge { rate_w, period: Some(index), reason: BatteryReason::BudgetedDischarge }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ForecastPeriod;
    use chrono::{NaiveDate, TimeZone};

    fn battery() -> BatteryConfig {
        BatteryConfig {
            capacity_wh: 10_000.0,
            max_charge_w: 5_000.0,
            max_discharge_w: 4_000.0,
            soc_buffer_percent: 20.0,
            balancing: None,
            forecast: None,
        }
    }

    fn forecast(budgets: &[(u32, u32, f64)]) -> DayForecast {
        DayForecast {
            date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            periods: budgets
                .iter()
                .map(|&(start_hour, end_hour, budget_wh)| ForecastPeriod {
                    start_hour,
                    end_hour,
                    expected_peak_w: 3_000.0,
                    weight: 1.0,
                    budget_wh,
                })
                .collect(),
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2026, 1, 5, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_allocation_proportional_to_weight() {
        let mut forecast = forecast(&[(7, 9, 0.0), (17, 21, 0.0)]);
        forecast.periods[0].weight = 1.0;
        forecast.periods[1].weight = 3.0;
        allocate_budget(&mut forecast, 8_000.0, 25.0);
        // 6000 Wh after the 25 % buffer, split 1:3.
        assert!((forecast.periods[0].budget_wh - 1_500.0).abs() < 1e-9);
        assert!((forecast.periods[1].budget_wh - 4_500.0).abs() < 1e-9);
    }

    #[test]
    fn test_allocation_equal_split_on_zero_weights() {
        let mut forecast = forecast(&[(7, 9, 0.0), (17, 21, 0.0)]);
        forecast.periods[0].weight = 0.0;
        forecast.periods[1].weight = 0.0;
        allocate_budget(&mut forecast, 4_000.0, 0.0);
        assert!((forecast.periods[0].budget_wh - 2_000.0).abs() < 1e-9);
        assert!((forecast.periods[1].budget_wh - 2_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_discharge_outside_any_period() {
        let result = budgeted_discharge(
            &battery(),
            MeasureInterval::Min60,
            2_000.0,
            &forecast(&[(17, 21, 2_000.0)]),
            &[0.0],
            at(12, 0),
            5_000.0,
            80.0,
            20.0,
        );
        assert_eq!(result.rate_w, 0.0);
        assert_eq!(result.reason, BatteryReason::OutsideForecastPeriod);
        assert_eq!(result.period, None);
    }

    #[test]
    fn test_discharge_budget_exhausted() {
        let result = budgeted_discharge(
            &battery(),
            MeasureInterval::Min60,
            2_000.0,
            &forecast(&[(17, 21, 2_000.0)]),
            &[2_000.0],
            at(18, 0),
            5_000.0,
            80.0,
            20.0,
        );
        assert_eq!(result.rate_w, 0.0);
        assert_eq!(result.reason, BatteryReason::PeriodBudgetExhausted);
        assert_eq!(result.period, Some(0));
    }

    #[test]
    fn test_discharge_rate_spreads_budget() {
        // 2000 Wh left, 2 hours left in the period: 1000 W target.
        let result = budgeted_discharge(
            &battery(),
            MeasureInterval::Min60,
            2_000.0,
            &forecast(&[(17, 21, 2_000.0)]),
            &[0.0],
            at(19, 0),
            5_000.0,
            80.0,
            20.0,
        );
        assert_eq!(result.reason, BatteryReason::BudgetedDischarge);
        assert!((result.rate_w - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_discharge_capped_by_excess() {
        // Target rate would be 2000 W, but the sample only exceeds the
        // floor by 500 W.
        let result = budgeted_discharge(
            &battery(),
            MeasureInterval::Min60,
            2_000.0,
            &forecast(&[(17, 21, 2_000.0)]),
            &[0.0],
            at(20, 0),
            2_500.0,
            80.0,
            20.0,
        );
        assert!((result.rate_w - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_discharge_capped_by_available_energy() {
        // 2 % above the floor on a 10 kWh pack = 200 Wh = 200 W for an hour.
        let result = budgeted_discharge(
            &battery(),
            MeasureInterval::Min60,
            2_000.0,
            &forecast(&[(17, 21, 4_000.0)]),
            &[0.0],
            at(20, 0),
            8_000.0,
            22.0,
            20.0,
        );
        assert!((result.rate_w - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_discharge_below_floor_is_noop() {
        let result = budgeted_discharge(
            &battery(),
            MeasureInterval::Min60,
            2_000.0,
            &forecast(&[(17, 21, 2_000.0)]),
            &[0.0],
            at(18, 0),
            1_500.0,
            80.0,
            20.0,
        );
        assert_eq!(result.rate_w, 0.0);
        assert_eq!(result.reason, BatteryReason::BelowLimit);
    }

    #[test]
    fn test_discharge_at_soc_floor_is_noop() {
        let result = budgeted_discharge(
            &battery(),
            MeasureInterval::Min60,
            2_000.0,
            &forecast(&[(17, 21, 2_000.0)]),
            &[0.0],
            at(18, 0),
            5_000.0,
            20.0,
            20.0,
        );
        assert_eq!(result.rate_w, 0.0);
        assert_eq!(result.reason, BatteryReason::AtSocFloor);
    }
}
