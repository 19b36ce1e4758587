//! The peak registry: the ranked set of billing-relevant peaks for the
//! current billing period, and the rollover bookkeeping that feeds the
//! carryover target and the rolling annual history.

use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use tracing::{debug, info};

use super::state::{EngineState, MonthlyPeak};
use crate::config::{BillingMode, EngineConfig};
use crate::domain::{CompletedPeriod, PeakEntry, RecordDecision};

/// Records a completed period as a billing peak candidate. The caller has
/// already checked the peak-hours/peak-season predicates.
pub fn record(
    state: &mut EngineState,
    config: &EngineConfig,
    period: &CompletedPeriod,
) -> RecordDecision {
    let entry = PeakEntry {
        date: period.date,
        hour: period.hour,
        raw_w: period.average_w,
        effective_w: period.effective_w,
    };
    let decision = match &config.billing {
        BillingMode::RankedAverage { peak_count, one_peak_per_day } => {
            record_ranked(state, *peak_count, *one_peak_per_day, entry)
        }
        BillingMode::SinglePeak { .. } => record_single(state, entry),
    };
    match decision {
        RecordDecision::Added | RecordDecision::Updated => {
            info!(
                date = %entry.date,
                hour = entry.hour,
                effective_w = entry.effective_w,
                decision = %decision,
                "billing peak recorded"
            );
        }
        _ => debug!(date = %entry.date, hour = entry.hour, decision = %decision, "peak not recorded"),
    }
    decision
}

fn record_ranked(
    state: &mut EngineState,
    peak_count: usize,
    one_peak_per_day: bool,
    entry: PeakEntry,
) -> RecordDecision {
    let peaks = &mut state.ranked_peaks;
    let decision = if one_peak_per_day {
        match peaks.iter_mut().find(|p| p.date == entry.date) {
            // Same-day entry is only displaced by a strictly higher value.
            Some(existing) if entry.effective_w > existing.effective_w => {
                *existing = entry;
                RecordDecision::Updated
            }
            Some(_) => return RecordDecision::Kept,
            None => {
                peaks.push(entry);
                RecordDecision::Added
            }
        }
    } else {
        peaks.push(entry);
        RecordDecision::Added
    };
    peaks.sort_by_key(|p| Reverse(OrderedFloat(p.effective_w)));
    // Bound memory: entries past 3N can never re-enter the top N.
    peaks.truncate(3 * peak_count);
    decision
}

fn record_single(state: &mut EngineState, entry: PeakEntry) -> RecordDecision {
    match &state.month_peak {
        None => {
            state.month_peak = Some(entry);
            RecordDecision::Added
        }
        Some(current) if entry.effective_w > current.effective_w => {
            state.month_peak = Some(entry);
            RecordDecision::Updated
        }
        Some(_) => RecordDecision::Kept,
    }
}

/// The billing average of the current period: mean of the top-N effective
/// values (ranked mode) or the single peak's effective value.
pub fn peak_average(state: &EngineState, config: &EngineConfig) -> Option<f64> {
    match &config.billing {
        BillingMode::RankedAverage { peak_count, .. } => {
            if state.ranked_peaks.is_empty() {
                return None;
            }
            let top = &state.ranked_peaks[..state.ranked_peaks.len().min(*peak_count)];
            Some(top.iter().map(|p| p.effective_w).sum::<f64>() / top.len() as f64)
        }
        BillingMode::SinglePeak { .. } => state.month_peak.map(|p| p.effective_w),
    }
}

/// The peak the limit must protect: the Nth-ranked effective value, or the
/// single current peak. `None` while still learning.
pub fn worst_protected_peak(state: &EngineState, config: &EngineConfig) -> Option<f64> {
    match &config.billing {
        BillingMode::RankedAverage { peak_count, .. } => {
            (state.ranked_peaks.len() >= *peak_count)
                .then(|| state.ranked_peaks[peak_count - 1].effective_w)
        }
        BillingMode::SinglePeak { .. } => state.month_peak.map(|p| p.effective_w),
    }
}

/// Rolling annual average of monthly peaks, when the history is in use.
pub fn rolling_average(state: &EngineState) -> Option<f64> {
    if state.monthly_history.is_empty() {
        return None;
    }
    let sum: f64 = state.monthly_history.iter().map(|m| m.peak_w).sum();
    Some(sum / state.monthly_history.len() as f64)
}

/// Billing-period rollover: snapshot the outgoing average for carryover,
/// extend the rolling annual history, then clear the registry.
pub fn rollover(state: &mut EngineState, config: &EngineConfig, outgoing_month: &str) {
    let outgoing_average = peak_average(state, config);
    if let Some(average_w) = outgoing_average {
        state.previous_period_average_w = Some(average_w);
    }
    if let BillingMode::SinglePeak { rolling_months: Some(months) } = &config.billing {
        if let Some(peak) = &state.month_peak {
            state.monthly_history.insert(
                0,
                MonthlyPeak { month: outgoing_month.to_string(), peak_w: peak.effective_w },
            );
            state.monthly_history.truncate(*months);
        }
    }
    info!(
        month = outgoing_month,
        outgoing_average_w = outgoing_average,
        "billing period rolled over"
    );
    state.ranked_peaks.clear();
    state.month_peak = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn ranked_config(peak_count: usize, one_peak_per_day: bool) -> EngineConfig {
        let mut config = Config::sweden_monthly().engine;
        config.billing = BillingMode::RankedAverage { peak_count, one_peak_per_day };
        config
    }

    fn single_config(rolling_months: Option<usize>) -> EngineConfig {
        let mut config = Config::belgium_annual().engine;
        config.billing = BillingMode::SinglePeak { rolling_months };
        config
    }

    fn period(day: u32, hour: u32, watts: f64) -> CompletedPeriod {
        CompletedPeriod {
            date: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            hour,
            slot: 0,
            average_w: watts,
            was_night_hour: false,
            effective_w: watts,
        }
    }

    #[test]
    fn test_ranked_sorted_descending() {
        let config = ranked_config(3, false);
        let mut state = EngineState::new();
        for (day, watts) in [(5, 2_000.0), (6, 5_000.0), (7, 3_000.0)] {
            record(&mut state, &config, &period(day, 8, watts));
        }
        let values: Vec<f64> = state.ranked_peaks.iter().map(|p| p.effective_w).collect();
        assert_eq!(values, vec![5_000.0, 3_000.0, 2_000.0]);
    }

    #[test]
    fn test_one_peak_per_day_replacement() {
        let config = ranked_config(3, true);
        let mut state = EngineState::new();
        assert_eq!(record(&mut state, &config, &period(5, 8, 2_000.0)), RecordDecision::Added);
        assert_eq!(record(&mut state, &config, &period(5, 9, 3_000.0)), RecordDecision::Updated);
        assert_eq!(record(&mut state, &config, &period(5, 10, 3_000.0)), RecordDecision::Kept);
        assert_eq!(state.ranked_peaks.len(), 1);
        assert_eq!(state.ranked_peaks[0].hour, 9);
        assert_eq!(state.ranked_peaks[0].effective_w, 3_000.0);
    }

    #[test]
    fn test_ranked_list_trimmed() {
        let config = ranked_config(2, false);
        let mut state = EngineState::new();
        for day in 1..=20 {
            record(&mut state, &config, &period(day, 8, f64::from(day) * 100.0));
        }
        assert_eq!(state.ranked_peaks.len(), 6);
        assert_eq!(state.ranked_peaks[0].effective_w, 2_000.0);
    }

    #[test]
    fn test_single_peak_strict_improvement() {
        let config = single_config(None);
        let mut state = EngineState::new();
        assert_eq!(record(&mut state, &config, &period(5, 8, 5_000.0)), RecordDecision::Added);
        assert_eq!(record(&mut state, &config, &period(6, 9, 4_000.0)), RecordDecision::Kept);
        assert_eq!(state.month_peak.unwrap().effective_w, 5_000.0);
    }

    #[test]
    fn test_peak_average_uses_top_n() {
        let config = ranked_config(2, false);
        let mut state = EngineState::new();
        for (day, watts) in [(5, 1_000.0), (6, 4_000.0), (7, 2_000.0)] {
            record(&mut state, &config, &period(day, 8, watts));
        }
        // Top 2 of {4000, 2000, 1000}.
        assert_eq!(peak_average(&state, &config), Some(3_000.0));
    }

    #[test]
    fn test_peak_average_with_fewer_than_n() {
        let config = ranked_config(3, false);
        let mut state = EngineState::new();
        record(&mut state, &config, &period(5, 8, 4_000.0));
        assert_eq!(peak_average(&state, &config), Some(4_000.0));
    }

    #[test]
    fn test_worst_protected_peak_needs_full_rank() {
        let config = ranked_config(3, false);
        let mut state = EngineState::new();
        record(&mut state, &config, &period(5, 8, 4_000.0));
        record(&mut state, &config, &period(6, 8, 3_000.0));
        assert_eq!(worst_protected_peak(&state, &config), None);
        record(&mut state, &config, &period(7, 8, 5_000.0));
        assert_eq!(worst_protected_peak(&state, &config), Some(3_000.0));
    }

    #[test]
    fn test_rollover_snapshots_average_and_clears() {
        let config = ranked_config(2, false);
        let mut state = EngineState::new();
        record(&mut state, &config, &period(5, 8, 4_000.0));
        record(&mut state, &config, &period(6, 8, 2_000.0));
        rollover(&mut state, &config, "2026-01");
        assert_eq!(state.previous_period_average_w, Some(3_000.0));
        assert!(state.ranked_peaks.is_empty());
    }

    #[test]
    fn test_rollover_without_peaks_keeps_previous_average() {
        let config = ranked_config(2, false);
        let mut state = EngineState::new();
        state.previous_period_average_w = Some(3_500.0);
        rollover(&mut state, &config, "2026-01");
        assert_eq!(state.previous_period_average_w, Some(3_500.0));
    }

    #[test]
    fn test_rollover_extends_rolling_history() {
        let config = single_config(Some(3));
        let mut state = EngineState::new();
        for (month, watts) in [("2026-01", 4_000.0), ("2026-02", 2_000.0), ("2026-03", 3_000.0), ("2026-04", 5_000.0)] {
            record(&mut state, &config, &period(5, 8, watts));
            rollover(&mut state, &config, month);
        }
        // Truncated to 3 months, most recent first; 2026-01 dropped.
        assert_eq!(state.monthly_history.len(), 3);
        assert_eq!(state.monthly_history[0].month, "2026-04");
        assert_eq!(state.monthly_history[2].month, "2026-02");
        assert_eq!(rolling_average(&state), Some(10_000.0 / 3.0));
    }

    proptest! {
        #[test]
        fn prop_ranked_list_is_non_increasing(watts in prop::collection::vec(0.0_f64..20_000.0, 1..40)) {
            let config = ranked_config(3, false);
            let mut state = EngineState::new();
            for (index, value) in watts.iter().enumerate() {
                let day = (index % 28 + 1) as u32;
                record(&mut state, &config, &period(day, 8, *value));
            }
            prop_assert!(state
                .ranked_peaks
                .windows(2)
                .all(|pair| pair[0].effective_w >= pair[1].effective_w));
            prop_assert!(state.ranked_peaks.len() <= 9);
        }

        #[test]
        fn prop_one_peak_per_day_keeps_daily_maximum(watts in prop::collection::vec(0.0_f64..20_000.0, 1..30)) {
            let config = ranked_config(10, true);
            let mut state = EngineState::new();
            for value in &watts {
                record(&mut state, &config, &period(5, 8, *value));
            }
            let maximum = watts.iter().copied().fold(f64::MIN, f64::max);
            prop_assert_eq!(state.ranked_peaks.len(), 1);
            prop_assert_eq!(state.ranked_peaks[0].effective_w, maximum);
        }
    }
}
