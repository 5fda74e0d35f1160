use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric limit tagged with the name of whoever imposed it.
///
/// Deserializes from `{"value": .., "source": ..}` or from a bare number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WithSourceRepr<f64>")]
pub struct NumberWithSource {
    pub value: f64,
    #[serde(default)]
    pub source: String,
}

impl NumberWithSource {
    pub fn new(value: f64, source: impl Into<String>) -> Self {
        Self {
            value,
            source: source.into(),
        }
    }
}

impl From<f64> for NumberWithSource {
    fn from(value: f64) -> Self {
        Self::new(value, "")
    }
}

impl fmt::Display for NumberWithSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "{:.2}", self.value)
        } else {
            write!(f, "{:.2} ({})", self.value, self.source)
        }
    }
}

/// Integer limit (phase counts) tagged with its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WithSourceRepr<i32>")]
pub struct IntegerWithSource {
    pub value: i32,
    #[serde(default)]
    pub source: String,
}

impl IntegerWithSource {
    pub fn new(value: i32, source: impl Into<String>) -> Self {
        Self {
            value,
            source: source.into(),
        }
    }
}

impl From<i32> for IntegerWithSource {
    fn from(value: i32) -> Self {
        Self::new(value, "")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WithSourceRepr<T> {
    Plain(T),
    Tagged {
        value: T,
        #[serde(default)]
        source: String,
    },
}

impl From<WithSourceRepr<f64>> for NumberWithSource {
    fn from(repr: WithSourceRepr<f64>) -> Self {
        match repr {
            WithSourceRepr::Plain(value) => value.into(),
            WithSourceRepr::Tagged { value, source } => Self::new(value, source),
        }
    }
}

impl From<WithSourceRepr<i32>> for IntegerWithSource {
    fn from(repr: WithSourceRepr<i32>) -> Self {
        match repr {
            WithSourceRepr::Plain(value) => value.into(),
            WithSourceRepr::Tagged { value, source } => Self::new(value, source),
        }
    }
}

/// Requested bounds for one node in one time slot.
///
/// Every field is optional: an absent cap means "unbounded", an absent floor
/// means "no minimum".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitsReq {
    #[serde(rename = "total_power_W", default, skip_serializing_if = "Option::is_none")]
    pub total_power_w: Option<NumberWithSource>,
    #[serde(rename = "ac_max_current_A", default, skip_serializing_if = "Option::is_none")]
    pub ac_max_current_a: Option<NumberWithSource>,
    #[serde(rename = "ac_min_current_A", default, skip_serializing_if = "Option::is_none")]
    pub ac_min_current_a: Option<NumberWithSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ac_max_phase_count: Option<IntegerWithSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ac_min_phase_count: Option<IntegerWithSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ac_supports_changing_phases_during_charging: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ac_number_of_active_phases: Option<i32>,
}

impl LimitsReq {
    /// A limit that permits nothing: zero current and zero power.
    pub fn zero() -> Self {
        Self {
            total_power_w: Some(0.0.into()),
            ac_max_current_a: Some(0.0.into()),
            ..Default::default()
        }
    }

    /// True when either ceiling is present and exactly zero.
    pub fn is_blocked(&self) -> bool {
        let zero = |n: &Option<NumberWithSource>| n.as_ref().is_some_and(|n| n.value == 0.0);
        zero(&self.total_power_w) || zero(&self.ac_max_current_a)
    }
}

/// Committed bounds for one leaf in one time slot.
///
/// Values are signed: positive for import (charging), negative for export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitsRes {
    #[serde(rename = "total_power_W", default, skip_serializing_if = "Option::is_none")]
    pub total_power_w: Option<NumberWithSource>,
    #[serde(rename = "ac_max_current_A", default, skip_serializing_if = "Option::is_none")]
    pub ac_max_current_a: Option<NumberWithSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ac_max_phase_count: Option<IntegerWithSource>,
}

impl LimitsRes {
    pub fn zero() -> Self {
        Self {
            total_power_w: Some(0.0.into()),
            ac_max_current_a: Some(0.0.into()),
            ac_max_phase_count: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_power_w.is_none() && self.ac_max_current_a.is_none()
    }
}

/// Smaller of two optional limits. An absent side never wins over a present one.
pub fn min_optional(a: Option<NumberWithSource>, b: Option<NumberWithSource>) -> Option<NumberWithSource> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if a.value < b.value { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Larger of two optional limits. An absent side never wins over a present one.
pub fn max_optional(a: Option<NumberWithSource>, b: Option<NumberWithSource>) -> Option<NumberWithSource> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if a.value > b.value { a } else { b }),
        (a, b) => a.or(b),
    }
}

pub fn min_optional_int(
    a: Option<IntegerWithSource>,
    b: Option<IntegerWithSource>,
) -> Option<IntegerWithSource> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if a.value < b.value { a } else { b }),
        (a, b) => a.or(b),
    }
}

pub fn max_optional_int(
    a: Option<IntegerWithSource>,
    b: Option<IntegerWithSource>,
) -> Option<IntegerWithSource> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if a.value > b.value { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Replace `base` with `limit` if `base` is unset or larger.
pub fn apply_limit_if_smaller(base: &mut Option<NumberWithSource>, limit: f64, source: &str) {
    if base.as_ref().map_or(true, |b| b.value > limit) {
        *base = Some(NumberWithSource::new(limit, source));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: f64, s: &str) -> Option<NumberWithSource> {
        Some(NumberWithSource::new(v, s))
    }

    #[test]
    fn test_min_optional_prefers_present_value() {
        assert_eq!(min_optional(None, None), None);
        assert_eq!(min_optional(n(3.0, "a"), None), n(3.0, "a"));
        assert_eq!(min_optional(None, n(2.0, "b")), n(2.0, "b"));
        assert_eq!(min_optional(n(3.0, "a"), n(2.0, "b")), n(2.0, "b"));
    }

    #[test]
    fn test_max_optional_keeps_source_of_winner() {
        assert_eq!(max_optional(n(6.0, "evse"), n(8.0, "grid")), n(8.0, "grid"));
        assert_eq!(max_optional(n(6.0, "evse"), None), n(6.0, "evse"));
    }

    #[test]
    fn test_apply_limit_if_smaller() {
        let mut base = n(16.0, "evse");
        apply_limit_if_smaller(&mut base, 20.0, "ocpp");
        assert_eq!(base, n(16.0, "evse"));
        apply_limit_if_smaller(&mut base, 10.0, "ocpp");
        assert_eq!(base, n(10.0, "ocpp"));

        let mut unset = None;
        apply_limit_if_smaller(&mut unset, 4.0, "ocpp");
        assert_eq!(unset, n(4.0, "ocpp"));
    }

    #[test]
    fn test_limits_json_field_names() {
        let json = r#"{"ac_max_current_A":{"value":32.0,"source":"evse"},"ac_max_phase_count":{"value":3,"source":"evse"}}"#;
        let limits: LimitsReq = serde_json::from_str(json).unwrap();
        assert_eq!(limits.ac_max_current_a, n(32.0, "evse"));
        assert_eq!(limits.ac_max_phase_count.map(|p| p.value), Some(3));
        assert!(limits.total_power_w.is_none());
    }

    #[test]
    fn test_bare_numbers_have_no_source() {
        let json = r#"{"ac_max_current_A":32,"ac_min_current_A":6.5,"ac_min_phase_count":1}"#;
        let limits: LimitsReq = serde_json::from_str(json).unwrap();
        assert_eq!(limits.ac_max_current_a, n(32.0, ""));
        assert_eq!(limits.ac_min_current_a, n(6.5, ""));
        assert_eq!(limits.ac_min_phase_count, Some(IntegerWithSource::new(1, "")));
    }

    #[test]
    fn test_zero_limits_are_blocked() {
        assert!(LimitsReq::zero().is_blocked());
        assert!(!LimitsReq::default().is_blocked());
    }
}
