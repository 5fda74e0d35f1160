use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LimitsReq, LimitsRes};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePerKwh {
    pub value: f64,
    #[serde(default)]
    pub currency: String,
}

/// One time slot of a request schedule.
///
/// The slot is valid from `timestamp` until the next entry's timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleReqEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub limits_to_root: LimitsReq,
    #[serde(default)]
    pub limits_to_leaves: LimitsReq,
    /// Root to leaf conversion efficiency in (0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_efficiency: Option<f64>,
    #[serde(rename = "price_per_kWh", default, skip_serializing_if = "Option::is_none")]
    pub price_per_kwh: Option<PricePerKwh>,
}

impl ScheduleReqEntry {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            limits_to_root: LimitsReq::default(),
            limits_to_leaves: LimitsReq::default(),
            conversion_efficiency: None,
            price_per_kwh: None,
        }
    }
}

/// One time slot of a committed schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleResEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub limits_to_root: LimitsRes,
    #[serde(rename = "price_per_kWh", default, skip_serializing_if = "Option::is_none")]
    pub price_per_kwh: Option<PricePerKwh>,
}

impl ScheduleResEntry {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            limits_to_root: LimitsRes::default(),
            price_per_kwh: None,
        }
    }
}

/// A point of a frequency-watt curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyWattPoint {
    #[serde(rename = "frequency_Hz")]
    pub frequency_hz: f64,
    #[serde(rename = "total_power_W")]
    pub total_power_w: f64,
}

/// A charging (positive) or discharging (negative) target.
///
/// Only one kind is honoured, in order: current, power, frequency table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetpointType {
    pub source: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(rename = "ac_current_A", default, skip_serializing_if = "Option::is_none")]
    pub ac_current_a: Option<f64>,
    #[serde(rename = "total_power_W", default, skip_serializing_if = "Option::is_none")]
    pub total_power_w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_table: Option<Vec<FrequencyWattPoint>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSetpointEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<SetpointType>,
}

/// Index of the entry covering `t`: the latest entry at or before `t`,
/// clamped to the first entry when `t` precedes the whole schedule.
///
/// Entries must be sorted by timestamp. Returns `None` only for an empty slice.
pub fn covering_index<T>(entries: &[T], t: DateTime<Utc>, timestamp: impl Fn(&T) -> DateTime<Utc>) -> Option<usize> {
    if entries.is_empty() {
        return None;
    }
    let after = entries.partition_point(|e| timestamp(e) <= t);
    Some(after.saturating_sub(1))
}
