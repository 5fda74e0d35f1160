use chrono::{DateTime, Utc};

/// Memory of one charging session that survives across optimization passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerContext {
    /// 1ph/3ph transitions since the session started
    pub number_of_switches: u32,
    pub last_active_phases: Option<i32>,
    /// Last pass start at which 1ph was the best choice
    pub ts_1ph_optimal: Option<DateTime<Utc>>,
}

impl BrokerContext {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Remember the phase count now in use, counting a switch if it changed.
    pub fn record_active_phases(&mut self, phases: i32) {
        if self.last_active_phases.is_some_and(|last| last != phases) {
            self.number_of_switches += 1;
        }
        self.last_active_phases = Some(phases);
    }

    pub fn switches_exceeded(&self, max_switches: u32) -> bool {
        max_switches > 0 && self.number_of_switches >= max_switches
    }
}
