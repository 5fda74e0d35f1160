use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LimitsRes, ScheduleResEntry};

/// Final bound for one leaf, produced once per optimization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcedLimits {
    pub uuid: String,
    pub valid_until: DateTime<Utc>,
    /// Same deadline as `valid_until`, in seconds from the pass start.
    pub valid_for: i64,
    pub limits_root_side: LimitsRes,
    pub schedule: Vec<ScheduleResEntry>,
}

impl EnforcedLimits {
    pub fn max_current_a(&self) -> Option<f64> {
        self.limits_root_side.ac_max_current_a.as_ref().map(|n| n.value)
    }

    pub fn total_power_w(&self) -> Option<f64> {
        self.limits_root_side.total_power_w.as_ref().map(|n| n.value)
    }
}
