//! The engine state is an opaque snapshot for the caller's persistence
//! provider: it must round-trip unchanged and resume mid-period without
//! altering behavior.

use capacity_guard::config::{BillingMode, Config, LearningPolicy, PeakHours};
use capacity_guard::controller::{CapacityController, EngineState};
use capacity_guard::domain::BatteryReading;
use chrono::{DateTime, Duration, FixedOffset, TimeZone};

fn at(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2026, 1, day, hour, minute, 0).unwrap()
}

fn controller() -> CapacityController {
    let mut config = Config::sweden_monthly().engine;
    config.billing = BillingMode::RankedAverage { peak_count: 3, one_peak_per_day: true };
    config.season = None;
    config.peak_hours = PeakHours { start_hour: 7, end_hour: 21, weekdays_only: false };
    config.limits.learning = LearningPolicy::CarryoverPercentage { percent: 80.0 };
    CapacityController::new(config).unwrap()
}

#[test]
fn state_round_trips_through_json() {
    let controller = controller();
    let mut state = EngineState::new();
    let reading = BatteryReading { soc_percent: 60.0, min_soc_percent: 20.0 };

    // Populate every sub-state: peaks, accumulator, forecast, balancing.
    let mut now = at(5, 6, 0);
    for step in 0..(10 * 4) {
        let watts = f64::from(step % 5) * 1_500.0;
        controller.process_sample(&mut state, watts, now, Some(&reading));
        controller.battery_status(&mut state, Some(&reading), watts, now);
        now += Duration::minutes(15);
    }

    let snapshot = serde_json::to_string(&state).expect("state serializes");
    let restored: EngineState = serde_json::from_str(&snapshot).expect("state deserializes");
    assert_eq!(restored, state);
}

#[test]
fn restored_state_continues_identically() {
    let controller = controller();
    let mut state = EngineState::new();
    let mut now = at(5, 7, 0);
    for _ in 0..90 {
        controller.process_sample(&mut state, 3_200.0, now, None);
        now += Duration::minutes(1);
    }

    // Save, reload, and run both copies forward in lockstep.
    let snapshot = serde_json::to_string(&state).unwrap();
    let mut restored: EngineState = serde_json::from_str(&snapshot).unwrap();

    for step in 0..120 {
        let watts = 2_800.0 + f64::from(step % 3) * 400.0;
        let original = controller.process_sample(&mut state, watts, now, None);
        let resumed = controller.process_sample(&mut restored, watts, now, None);
        assert_eq!(original, resumed);
        now += Duration::minutes(1);
    }
    assert_eq!(state, restored);
}
