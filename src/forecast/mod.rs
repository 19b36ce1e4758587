//! Forecast generation: turns learned or supplied load expectations into the
//! day's discrete peak windows, so battery discharge can be budgeted across
//! them instead of spent greedily on the first spike.

pub mod budget;

use chrono::{DateTime, Datelike, FixedOffset, Weekday};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ForecastConfig, ForecastSource, PeakHours, TimeBasedForecast};

/// Hours above this share of the day's maximum form a forecast period.
const PERIOD_THRESHOLD: f64 = 0.6;

/// Running-mean sample cap; bounds the influence of stale history so a
/// changed household routine overrides it within about a week.
const HISTORY_SAMPLE_CAP: u32 = 8;

/// One expected peak window of the day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPeriod {
    /// Start hour, inclusive.
    pub start_hour: u32,
    /// End hour, exclusive.
    pub end_hour: u32,
    pub expected_peak_w: f64,
    /// Relative share of the day's discharge budget.
    pub weight: f64,
    /// Energy allocated by [`budget::allocate_budget`].
    pub budget_wh: f64,
}

impl ForecastPeriod {
    pub fn contains_hour(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.end_hour
    }
}

/// A day's forecast, regenerated once per calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayForecast {
    pub date: chrono::NaiveDate,
    pub periods: Vec<ForecastPeriod>,
}

/// Externally supplied forecast payload, in any of the three accepted
/// shapes. All are normalized to periods; anything malformed falls back to
/// the time-based source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalForecast {
    /// Flat array of 24 expected hourly watts.
    Hourly(Vec<f64>),
    /// Sparse hour/expectation points.
    Points(Vec<HourPoint>),
    /// Pre-computed periods.
    Periods(Vec<ExternalPeriod>),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourPoint {
    pub hour: u32,
    pub expected_w: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExternalPeriod {
    pub start_hour: u32,
    pub end_hour: u32,
    pub expected_peak_w: f64,
    pub weight: f64,
}

/// Incrementally learned hourly load averages, keyed by weekday.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlyHistory {
    days: [[HourStat; 24]; 7],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HourStat {
    pub mean_w: f64,
    pub samples: u32,
}

impl HourlyHistory {
    /// Folds a completed period's average into the running mean for its
    /// weekday/hour slot.
    pub fn update(&mut self, weekday: Weekday, hour: u32, average_w: f64) {
        let stat = &mut self.days[weekday.num_days_from_monday() as usize][hour as usize % 24];
        if stat.samples < HISTORY_SAMPLE_CAP {
            stat.samples += 1;
        }
        stat.mean_w += (average_w - stat.mean_w) / f64::from(stat.samples);
    }

    pub fn day(&self, weekday: Weekday) -> &[HourStat; 24] {
        &self.days[weekday.num_days_from_monday() as usize]
    }

    /// Number of hour slots with at least one sample for the weekday.
    pub fn learned_hours(&self, weekday: Weekday) -> usize {
        self.day(weekday).iter().filter(|stat| stat.samples > 0).count()
    }
}

/// Produces the day's forecast from the configured source. Unusable inputs
/// (thin history, malformed external payload) silently fall back to the
/// time-based source.
pub fn generate_forecast(
    config: &ForecastConfig,
    peak_hours: &PeakHours,
    history: &HourlyHistory,
    now: DateTime<FixedOffset>,
    external: Option<&ExternalForecast>,
) -> DayForecast {
    let date = now.date_naive();
    let periods = match config.source {
        ForecastSource::TimeBased => time_based_periods(&config.time_based),
        ForecastSource::Historical => {
            historical_periods(history, date.weekday(), peak_hours).unwrap_or_else(|| {
                debug!(weekday = %date.weekday(), "insufficient history, using time-based forecast");
                time_based_periods(&config.time_based)
            })
        }
        ForecastSource::External => external
            .and_then(|payload| normalize_external(payload, peak_hours))
            .unwrap_or_else(|| {
                debug!("no usable external forecast, using time-based forecast");
                time_based_periods(&config.time_based)
            }),
    };
    DayForecast { date, periods }
}

/// Two fixed windows weighted by their configured share of the assumed
/// daily peak.
fn time_based_periods(config: &TimeBasedForecast) -> Vec<ForecastPeriod> {
    vec![
        ForecastPeriod {
            start_hour: config.morning.start_hour,
            end_hour: config.morning.end_hour,
            expected_peak_w: config.assumed_peak_w * config.morning_share_percent / 100.0,
            weight: config.morning_share_percent,
            budget_wh: 0.0,
        },
        ForecastPeriod {
            start_hour: config.evening.start_hour,
            end_hour: config.evening.end_hour,
            expected_peak_w: config.assumed_peak_w * config.evening_share_percent / 100.0,
            weight: config.evening_share_percent,
            budget_wh: 0.0,
        },
    ]
}

fn historical_periods(
    history: &HourlyHistory,
    weekday: Weekday,
    peak_hours: &PeakHours,
) -> Option<Vec<ForecastPeriod>> {
    if history.learned_hours(weekday) < 24 {
        return None;
    }
    let means: Vec<f64> = history.day(weekday).iter().map(|stat| stat.mean_w).collect();
    let periods = periods_from_hourly(&means, peak_hours);
    (!periods.is_empty()).then_some(periods)
}

fn normalize_external(
    payload: &ExternalForecast,
    peak_hours: &PeakHours,
) -> Option<Vec<ForecastPeriod>> {
    let periods = match payload {
        ExternalForecast::Periods(periods) => periods
            .iter()
            .filter(|p| p.start_hour < p.end_hour && p.end_hour <= 24)
            .map(|p| ForecastPeriod {
                start_hour: p.start_hour,
                end_hour: p.end_hour,
                expected_peak_w: p.expected_peak_w,
                weight: p.weight,
                budget_wh: 0.0,
            })
            .collect(),
        ExternalForecast::Hourly(hours) => {
            if hours.len() != 24 {
                return None;
            }
            periods_from_hourly(hours, peak_hours)
        }
        ExternalForecast::Points(points) => {
            if points.is_empty() {
                return None;
            }
            let mut hours = vec![0.0; 24];
            for point in points {
                if point.hour < 24 {
                    hours[point.hour as usize] = point.expected_w;
                }
            }
            periods_from_hourly(&hours, peak_hours)
        }
    };
    (!periods.is_empty()).then_some(periods)
}

/// Contiguous hours above 60 % of the day maximum, inside the peak-hours
/// window, grouped into discrete periods. Expected peak is the group's
/// highest hour; weight is the group's summed expectation.
fn periods_from_hourly(hours: &[f64], peak_hours: &PeakHours) -> Vec<ForecastPeriod> {
    let day_max = hours.iter().copied().fold(0.0_f64, f64::max);
    if day_max <= 0.0 {
        return Vec::new();
    }
    let threshold = PERIOD_THRESHOLD * day_max;

    let mut periods = Vec::new();
    let qualifying = hours.iter().copied().enumerate().map(|(index, mean)| {
        let hour = index as u32;
        let inside = peak_hours.start_hour <= hour && hour < peak_hours.end_hour;
        (hour, mean, inside && mean >= threshold)
    });
    for (qualifies, group) in &qualifying.chunk_by(|&(_, _, qualifies)| qualifies) {
        if !qualifies {
            continue;
        }
        let members: Vec<(u32, f64, bool)> = group.collect();
        let start_hour = members[0].0;
        let end_hour = members[members.len() - 1].0 + 1;
        let expected_peak_w = members.iter().map(|&(_, mean, _)| mean).fold(0.0, f64::max);
        let weight = members.iter().map(|&(_, mean, _)| mean).sum();
        periods.push(ForecastPeriod { start_hour, end_hour, expected_peak_w, weight, budget_wh: 0.0 });
    }
    periods
}
