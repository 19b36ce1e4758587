//! Measurement aggregation: raw power samples accumulate into the current
//! interval; the completed average is emitted when the grid rolls over.
//! Also detects gaps in the measurement stream.

use chrono::{DateTime, FixedOffset, Timelike};
use tracing::warn;

use super::state::{EngineState, PeriodId};
use crate::config::EngineConfig;
use crate::domain::{calendar, CompletedPeriod, DowntimeEvent, MeasureInterval};

/// Folds one sample into the current period. Returns the completed period
/// when the identifier rolls over; the accumulator restarts on the new one.
pub fn accumulate(
    state: &mut EngineState,
    config: &EngineConfig,
    sample_w: f64,
    timestamp: DateTime<FixedOffset>,
) -> Option<CompletedPeriod> {
    // Export-only readings are excluded from billing.
    let sample_w = sample_w.max(0.0);
    let id = PeriodId {
        date: timestamp.date_naive(),
        hour: timestamp.hour(),
        slot: timestamp.minute() / config.interval_minutes.minutes(),
    };

    let accumulator = &mut state.accumulator;
    match accumulator.period {
        None => {
            accumulator.period = Some(id);
            accumulator.sum_w = sample_w;
            accumulator.samples = 1;
            None
        }
        Some(previous) if previous == id => {
            accumulator.sum_w += sample_w;
            accumulator.samples += 1;
            None
        }
        Some(previous) => {
            let average_w = accumulator.average_w();
            let was_night_hour = calendar::is_night_hour(previous.hour);
            let effective_w = if config.night_discount && was_night_hour {
                average_w * 0.5
            } else {
                average_w
            };
            accumulator.period = Some(id);
            accumulator.sum_w = sample_w;
            accumulator.samples = 1;
            Some(CompletedPeriod {
                date: previous.date,
                hour: previous.hour,
                slot: previous.slot,
                average_w,
                was_night_hour,
                effective_w,
            })
        }
    }
}

/// Compares consecutive hour markers and reports a gap at or above the
/// configured trigger. Only meaningful on the hourly grid; detection never
/// blocks processing and missed hours are never back-filled.
pub fn detect_downtime(
    state: &mut EngineState,
    config: &EngineConfig,
    timestamp: DateTime<FixedOffset>,
) -> Option<DowntimeEvent> {
    let hour = timestamp.hour();
    let previous = state.last_hour.replace(hour);
    if config.interval_minutes != MeasureInterval::Min60 {
        return None;
    }
    let from_hour = previous?;
    if from_hour == hour {
        return None;
    }
    let gap = calendar::hour_gap(from_hour, hour);
    if gap < config.downtime_trigger_hours {
        return None;
    }
    let event = DowntimeEvent { from_hour, to_hour: hour, missed_hours: gap - 1 };
    warn!(
        from_hour = event.from_hour,
        to_hour = event.to_hour,
        missed_hours = event.missed_hours,
        "measurement downtime detected"
    );
    Some(event)
}
