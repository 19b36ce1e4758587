//! # Household Load Simulation
//!
//! Drives the engine with a synthetic but realistic grid-power stream so a
//! whole billing period can be replayed in milliseconds. Deterministic for a
//! fixed seed, which the harness relies on for reproducible reports.

pub mod house;

pub use house::{HouseSimulator, HouseSimulatorConfig};
