use chrono::{DateTime, DurationRound, Utc};
use itertools::Itertools;

use crate::domain::{covering_index, EnergyFlowRequest, LimitsReq, ScheduleReqEntry, ScheduleResEntry};
use crate::error::{EnergyManagerError, Result};

/// Everything shared by all nodes during one optimization pass.
///
/// Built once per pass and passed by reference into the capacity tree, the
/// offer builder and the brokers.
#[derive(Debug, Clone)]
pub struct PassContext {
    pub start_time: DateTime<Utc>,
    pub interval: chrono::Duration,
    /// Current claimed per trading round (A)
    pub slice_ampere: f64,
    /// Power claimed per trading round when only a watt ceiling exists (W)
    pub slice_watt: f64,
    pub debug: bool,
    timestamps: Vec<DateTime<Utc>>,
}

impl PassContext {
    /// Build the schedule grid for a pass starting at `start_time`.
    ///
    /// The grid holds `horizon / interval` evenly spaced points starting at the
    /// interval boundary at or before `start_time` (at least one), plus every
    /// timestamp found anywhere in `request`, sorted and de-duplicated.
    /// `chrono` does not model leap seconds, so no leap offset is applied.
    pub fn new(
        start_time: DateTime<Utc>,
        interval: chrono::Duration,
        horizon: chrono::Duration,
        request: &EnergyFlowRequest,
    ) -> Result<Self> {
        if interval <= chrono::Duration::zero() {
            return Err(EnergyManagerError::InvalidGrid(format!(
                "interval must be positive, got {interval}"
            )));
        }

        let aligned = start_time
            .duration_trunc(interval)
            .map_err(|e| EnergyManagerError::InvalidGrid(e.to_string()))?;

        let slots = (horizon.num_milliseconds() / interval.num_milliseconds()).max(1);
        let mut timestamps = Vec::with_capacity(slots as usize);
        let mut t = aligned;
        for _ in 0..slots {
            timestamps.push(t);
            t = t
                .checked_add_signed(interval)
                .ok_or_else(|| EnergyManagerError::InvalidGrid("schedule horizon overflows".to_string()))?;
        }

        timestamps.extend(request.iter().flat_map(|node| {
            node.schedule_import
                .iter()
                .chain(&node.schedule_export)
                .map(|e| e.timestamp)
                .chain(node.schedule_setpoints.iter().map(|s| s.timestamp))
        }));

        let timestamps = timestamps.into_iter().sorted().dedup().collect();

        Ok(Self {
            start_time,
            interval,
            slice_ampere: 0.5,
            slice_watt: 500.0,
            debug: false,
            timestamps,
        })
    }

    pub fn with_slices(mut self, slice_ampere: f64, slice_watt: f64) -> Self {
        self.slice_ampere = slice_ampere;
        self.slice_watt = slice_watt;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Number of slots every schedule in this pass has.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Slot that is active at the pass start time.
    pub fn active_slot(&self) -> usize {
        covering_index(&self.timestamps, self.start_time, |t| *t).unwrap_or(0)
    }

    /// Request schedule with every limit unset.
    pub fn empty_schedule_req(&self) -> Vec<ScheduleReqEntry> {
        self.timestamps.iter().map(|t| ScheduleReqEntry::new(*t)).collect()
    }

    /// Request schedule that permits nothing.
    pub fn zero_schedule_req(&self) -> Vec<ScheduleReqEntry> {
        self.timestamps
            .iter()
            .map(|t| ScheduleReqEntry {
                limits_to_root: LimitsReq::zero(),
                ..ScheduleReqEntry::new(*t)
            })
            .collect()
    }

    /// Committed schedule with nothing committed.
    pub fn empty_schedule_res(&self) -> Vec<ScheduleResEntry> {
        self.timestamps.iter().map(|t| ScheduleResEntry::new(*t)).collect()
    }
}
