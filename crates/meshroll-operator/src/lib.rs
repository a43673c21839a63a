//! meshroll operator wiring: configuration and controller construction

pub mod config;
pub mod controller_runner;
