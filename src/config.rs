use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};
use validator::Validate;

use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub energy_manager: EnergyManagerConfig,
    #[serde(default)]
    pub input: InputConfig,
}

/// When a charging session may move between 1-phase and 3-phase operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum SwitchPhasesMode {
    #[default]
    Never,
    /// Only 3ph to 1ph once charging started.
    Oneway,
    Both,
}

/// Phase count forced once a session used up its allowed switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum SwitchesExceededMode {
    SinglePhase,
    ThreePhase,
    #[default]
    DontChange,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EnergyManagerConfig {
    /// Nominal AC voltage between phase and neutral (V)
    #[validate(range(exclusive_min = 0.0))]
    pub nominal_ac_voltage: f64,
    /// Seconds between optimization passes
    #[validate(range(min = 1))]
    pub update_interval: u64,
    /// Minutes between generated schedule grid points
    #[validate(range(min = 1))]
    pub schedule_interval_duration: u32,
    /// Hours covered by the generated schedule grid
    #[validate(range(min = 1))]
    pub schedule_total_duration: u32,
    /// Current claimed per trading round (A)
    #[validate(range(exclusive_min = 0.0))]
    pub slice_ampere: f64,
    /// Power claimed per trading round when only a watt ceiling exists (W)
    #[validate(range(exclusive_min = 0.0))]
    pub slice_watt: f64,
    /// Log every offer and trade
    pub debug: bool,
    pub switch_3ph_1ph_while_charging_mode: SwitchPhasesMode,
    /// 0 disables the limit
    pub max_nr_of_switches_per_session: u32,
    pub switch_3ph_1ph_max_nr_of_switches_exceeded_mode: SwitchesExceededMode,
    /// Seconds 1ph must have stayed non-optimal before going back to 3ph
    pub switch_3ph_1ph_time_hysteresis_s: u32,
    #[serde(rename = "switch_3ph_1ph_power_hysteresis_W")]
    #[validate(range(min = 0.0))]
    pub switch_3ph_1ph_power_hysteresis_w: f64,
    #[validate(range(min = 1))]
    pub max_trading_rounds: u32,
}

impl Default for EnergyManagerConfig {
    fn default() -> Self {
        Self {
            nominal_ac_voltage: 230.0,
            update_interval: 1,
            schedule_interval_duration: 60,
            schedule_total_duration: 1,
            slice_ampere: 0.5,
            slice_watt: 500.0,
            debug: false,
            switch_3ph_1ph_while_charging_mode: SwitchPhasesMode::Never,
            max_nr_of_switches_per_session: 0,
            switch_3ph_1ph_max_nr_of_switches_exceeded_mode: SwitchesExceededMode::DontChange,
            switch_3ph_1ph_time_hysteresis_s: 600,
            switch_3ph_1ph_power_hysteresis_w: 200.0,
            max_trading_rounds: 100,
        }
    }
}

impl EnergyManagerConfig {
    pub fn update_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.update_interval)
    }

    pub fn schedule_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.schedule_interval_duration))
    }

    pub fn schedule_horizon(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.schedule_total_duration))
    }

    /// How long published limits stay valid: ten pass intervals.
    pub fn limits_validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.update_interval as i64 * 10)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    /// JSON energy flow request fed to the manager at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_file: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("OEM__").split("__"));
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }
}
