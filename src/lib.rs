//! Open Energy Manager: shares the current and power a grid connection can
//! deliver among the EV charging points behind it.

pub mod broker;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod market;
pub mod optimizer;
pub mod telemetry;

pub use controller::EnergyManager;
pub use error::{EnergyManagerError, Result};
