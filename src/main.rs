use anyhow::{Context, Result};
use capacity_guard::config::Config;
use capacity_guard::controller::{CapacityController, EngineState};
use capacity_guard::domain::BatteryReading;
use capacity_guard::simulation::{HouseSimulator, HouseSimulatorConfig};
use capacity_guard::telemetry::init_tracing;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct ReportRow {
    date: NaiveDate,
    hour: u32,
    slot: u32,
    average_w: f64,
    effective_w: f64,
    decision: String,
    target_limit_w: Option<f64>,
    limit_reason: String,
    output_limit_a: f64,
    peak_average_w: Option<f64>,
    battery_soc_percent: f64,
    battery_rate_w: f64,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let preset = std::env::args().nth(1).unwrap_or_else(|| "sweden-monthly".to_string());
    let config = Config::load(&preset)?;
    info!(preset, days = config.simulation.days, "starting capacity-guard simulation");

    let controller = CapacityController::new(config.engine.clone())?;
    let mut state = EngineState::new();

    let start: NaiveDate = config
        .simulation
        .start_date
        .parse()
        .with_context(|| format!("invalid simulation.start_date \"{}\"", config.simulation.start_date))?;
    let offset = FixedOffset::east_opt(3600).context("fixed offset")?;
    let mut now: DateTime<FixedOffset> = offset
        .from_local_datetime(&start.and_hms_opt(0, 0, 0).context("midnight")?)
        .single()
        .context("unambiguous start timestamp")?;
    let step = Duration::seconds(i64::from(config.simulation.sample_seconds.max(1)));
    let end = now + Duration::days(i64::from(config.simulation.days));

    let mut house = HouseSimulator::new(HouseSimulatorConfig {
        seed: config.simulation.seed,
        ..HouseSimulatorConfig::default()
    });

    // The harness doubles as the battery-telemetry reader: it integrates the
    // recommended rates into a simulated state of charge.
    let battery_configured = config.engine.battery.is_some();
    let capacity_wh =
        config.engine.battery.as_ref().map_or(0.0, |battery| battery.capacity_wh);
    let mut soc_percent = 50.0;
    let min_soc_percent = 20.0;
    let dt_hours = f64::from(config.simulation.sample_seconds.max(1)) / 3600.0;

    let mut rows: Vec<ReportRow> = Vec::new();
    let mut downtime_events = 0_u32;
    let mut month_resets = 0_u32;

    while now < end {
        let sample_w = house.load_w(now);
        let reading = battery_configured
            .then_some(BatteryReading { soc_percent, min_soc_percent });

        let outcome = controller.process_sample(&mut state, sample_w, now, reading.as_ref());
        if outcome.downtime.is_some() {
            downtime_events += 1;
        }
        if outcome.month_reset {
            month_resets += 1;
        }

        let mut battery_rate_w = 0.0;
        if let Some(action) = controller.battery_status(&mut state, reading.as_ref(), sample_w, now)
        {
            battery_rate_w = action.charge_rate_w;
            if capacity_wh > 0.0 && battery_rate_w != 0.0 {
                soc_percent = (soc_percent + battery_rate_w * dt_hours / capacity_wh * 100.0)
                    .clamp(0.0, 100.0);
            }
            if let Some(period) = action.forecast_period {
                if battery_rate_w < 0.0 {
                    controller.record_budget_spend(&mut state, period, -battery_rate_w * dt_hours);
                }
            }
        }

        if let Some(completed) = &outcome.completed {
            rows.push(ReportRow {
                date: completed.date,
                hour: completed.hour,
                slot: completed.slot,
                average_w: completed.average_w,
                effective_w: completed.effective_w,
                decision: outcome
                    .record_decision
                    .map_or_else(String::new, |decision| decision.to_string()),
                target_limit_w: outcome.target_limit_w,
                limit_reason: outcome.limit_reason.to_string(),
                output_limit_a: outcome.output_limit_a,
                peak_average_w: outcome.peak_average_w,
                battery_soc_percent: soc_percent,
                battery_rate_w,
            });
        }

        now += step;
    }

    info!(
        periods = rows.len(),
        month_resets,
        downtime_events,
        peak_average_w = state.ranked_peaks.first().map(|p| p.effective_w),
        previous_period_average_w = state.previous_period_average_w,
        "simulation finished"
    );

    if let Some(path) = &config.report.csv_path {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("cannot create report \"{}\"", path.display()))?;
        for row in &rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        info!(path = %path.display(), "report written");
    } else {
        warn!("no report.csv_path configured, skipping CSV report");
    }

    if let Some(path) = &config.report.state_path {
        let snapshot = serde_json::to_string_pretty(&state)?;
        std::fs::write(path, snapshot)
            .with_context(|| format!("cannot write state snapshot \"{}\"", path.display()))?;
        info!(path = %path.display(), "state snapshot written");
    }

    Ok(())
}
