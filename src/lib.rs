//! Capacity-tariff peak shaving: computes a billing-aware current limit from
//! a stream of grid-power readings and coordinates an optional battery.
//!
//! The core is [`controller::CapacityController`]: synchronous, driven
//! entirely by caller-supplied timestamps, with all mutable state in the
//! caller-owned [`controller::EngineState`].

pub mod config;
pub mod controller;
pub mod domain;
pub mod forecast;
pub mod simulation;
pub mod telemetry;

pub use config::{Config, EngineConfig};
pub use controller::{CapacityController, EngineState, SampleOutcome};
pub use domain::{BatteryAction, BatteryReading};
