//! # 1ph/3ph Switching
//!
//! Picks the phase count a slot is charged with. Going down to the minimum
//! phase count happens as soon as the power ceiling no longer allows the
//! minimum current on all phases. Going back up needs the ceiling to clear a
//! power band and, for the slot active now, 1ph to have been unnecessary for
//! a configured time. A session that used up its allowed switches is pinned
//! to the configured fallback.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::BrokerContext;
use crate::config::{EnergyManagerConfig, SwitchPhasesMode, SwitchesExceededMode};
use crate::domain::LimitsReq;

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSwitchPolicy {
    pub mode: SwitchPhasesMode,
    /// 0 disables the limit
    pub max_switches_per_session: u32,
    pub exceeded_mode: SwitchesExceededMode,
    pub time_hysteresis: chrono::Duration,
    pub power_hysteresis_w: f64,
}

impl Default for PhaseSwitchPolicy {
    fn default() -> Self {
        Self::from(&EnergyManagerConfig::default())
    }
}

impl From<&EnergyManagerConfig> for PhaseSwitchPolicy {
    fn from(cfg: &EnergyManagerConfig) -> Self {
        Self {
            mode: cfg.switch_3ph_1ph_while_charging_mode,
            max_switches_per_session: cfg.max_nr_of_switches_per_session,
            exceeded_mode: cfg.switch_3ph_1ph_max_nr_of_switches_exceeded_mode,
            time_hysteresis: chrono::Duration::seconds(i64::from(cfg.switch_3ph_1ph_time_hysteresis_s)),
            power_hysteresis_w: cfg.switch_3ph_1ph_power_hysteresis_w,
        }
    }
}

impl PhaseSwitchPolicy {
    pub fn is_enabled(&self) -> bool {
        self.mode != SwitchPhasesMode::Never
    }

    /// Phase count for one import slot, or `None` if the offer carries no
    /// phase information.
    ///
    /// `now` is the pass start when `limits` belong to the slot active now;
    /// only that slot feeds and obeys the time hysteresis.
    pub fn decide(
        &self,
        limits: &LimitsReq,
        nominal_ac_voltage: f64,
        context: &mut BrokerContext,
        now: Option<DateTime<Utc>>,
    ) -> Option<i32> {
        let max_phases = limits.ac_max_phase_count.as_ref()?.value;
        let min_phases = limits.ac_min_phase_count.as_ref().map_or(1, |p| p.value).min(max_phases);
        if min_phases == max_phases {
            return Some(max_phases);
        }

        let active = limits
            .ac_number_of_active_phases
            .or(context.last_active_phases)
            .unwrap_or(max_phases)
            .clamp(min_phases, max_phases);

        if limits.ac_supports_changing_phases_during_charging == Some(false) && context.last_active_phases.is_some() {
            return Some(active);
        }

        if context.switches_exceeded(self.max_switches_per_session) {
            let pinned = match self.exceeded_mode {
                SwitchesExceededMode::SinglePhase => min_phases,
                SwitchesExceededMode::ThreePhase => max_phases,
                SwitchesExceededMode::DontChange => active,
            };
            debug!(switches = context.number_of_switches, phases = pinned, "phase switches exhausted");
            return Some(pinned);
        }

        let min_current = limits.ac_min_current_a.as_ref().map_or(0.0, |c| c.value);
        let min_power_3ph = min_current * f64::from(max_phases) * nominal_ac_voltage;
        let watt = limits.total_power_w.as_ref().map(|p| p.value);

        let optimal = match watt {
            Some(w) if w < min_power_3ph => min_phases,
            w if self.mode == SwitchPhasesMode::Both
                && w.map_or(true, |w| w > min_power_3ph + self.power_hysteresis_w) =>
            {
                max_phases
            }
            _ => active,
        };

        let Some(now) = now else {
            return Some(optimal);
        };
        if optimal == min_phases {
            context.ts_1ph_optimal = Some(now);
        } else if optimal > active && context.ts_1ph_optimal.is_some_and(|t| now - t < self.time_hysteresis) {
            debug!(active, optimal, "holding phase count within time hysteresis");
            return Some(active);
        }
        Some(optimal)
    }
}
