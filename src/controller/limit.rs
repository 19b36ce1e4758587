//! Limit calculation: from the protected peak (or a learning-phase stand-in)
//! to a target power ceiling, and from there to the output current handed to
//! the load-steering hardware.

use super::peaks;
use super::state::EngineState;
use crate::config::{EngineConfig, LearningPolicy, LimitConfig};
use crate::domain::LimitReason;

/// Which branch fired, plus the numeric target when one exists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetDecision {
    pub target_w: Option<f64>,
    pub reason: LimitReason,
    pub is_learning: bool,
    pub using_carryover: bool,
}

/// Headroom under the protected peak. With dynamic rules configured and a
/// finite SOC available, the first rule whose threshold exceeds the SOC
/// wins; the rule with the largest threshold is the catch-all. An empty pack
/// needs more margin than a full one, hence the larger headroom at low SOC.
pub fn dynamic_headroom(limits: &LimitConfig, soc_percent: Option<f64>) -> f64 {
    if limits.dynamic_headroom.is_empty() {
        return limits.headroom_w;
    }
    let Some(soc) = soc_percent.filter(|soc| soc.is_finite()) else {
        return limits.headroom_w;
    };
    limits
        .dynamic_headroom
        .iter()
        .find(|rule| soc < rule.soc_below)
        .map_or(limits.headroom_w, |rule| rule.headroom_w)
}

/// The target power ceiling for the current billing period.
pub fn target_limit(
    state: &EngineState,
    config: &EngineConfig,
    soc_percent: Option<f64>,
) -> TargetDecision {
    let headroom_w = dynamic_headroom(&config.limits, soc_percent);
    let floor_w = config.limits.min_floor_w;

    let Some(worst_w) = peaks::worst_protected_peak(state, config) else {
        // Learning phase: no data-driven peak to protect yet.
        if let LearningPolicy::CarryoverPercentage { percent } = config.limits.learning {
            if let Some(previous_w) = state.previous_period_average_w {
                let target_w = (previous_w * percent / 100.0 - headroom_w).max(floor_w);
                return TargetDecision {
                    target_w: Some(target_w),
                    reason: LimitReason::Carryover,
                    is_learning: true,
                    using_carryover: true,
                };
            }
        }
        return TargetDecision {
            target_w: None,
            reason: LimitReason::Learning,
            is_learning: true,
            using_carryover: false,
        };
    };

    let raw_target_w = worst_w - headroom_w;
    let target_w = raw_target_w.max(floor_w);
    let reason =
        if raw_target_w < floor_w { LimitReason::MinimumFloor } else { LimitReason::Computed };
    TargetDecision { target_w: Some(target_w), reason, is_learning: false, using_carryover: false }
}

/// Converts a target in watts to the output current, capped at the main
/// fuse and rounded to 0.1 A. With no numeric target (plain learning) the
/// minimum floor is converted instead.
pub fn to_output_current(target_w: Option<f64>, config: &EngineConfig) -> f64 {
    let watts = target_w.unwrap_or(config.limits.min_floor_w);
    let amps = watts / (f64::from(config.electrical.phases) * config.electrical.voltage_v);
    let capped = amps.clamp(0.0, config.electrical.main_fuse_a);
    (capped * 10.0).round() / 10.0
}
