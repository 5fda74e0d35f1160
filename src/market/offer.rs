use std::fmt;

use tracing::error;

use super::{Direction, MarketId, MarketTree, PassContext};
use crate::domain::{
    max_optional, max_optional_int, min_optional, min_optional_int, OptimizerTarget, ScheduleReqEntry,
};

/// Schedule one leaf may trade against in the current round.
///
/// Every bound is already tightened by the remaining headroom of each
/// ancestor, so accepting any part of it keeps the whole path feasible.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub import_offer: Vec<ScheduleReqEntry>,
    pub export_offer: Vec<ScheduleReqEntry>,
    /// Goal of the session, taken from the node closest to the leaf
    pub optimizer_target: Option<OptimizerTarget>,
}

impl Offer {
    pub fn new(tree: &MarketTree<'_>, leaf: MarketId, ctx: &PassContext) -> Self {
        let mut offer = Self {
            import_offer: ctx.empty_schedule_req(),
            export_offer: ctx.empty_schedule_req(),
            optimizer_target: None,
        };

        for id in tree.path_from_root(leaf) {
            if let Some(target) = &tree.request(id).optimizer_target {
                offer.optimizer_target = Some(target.clone());
            }
            merge_limits(&mut offer.import_offer, &tree.available_energy(id, Direction::Import));
            merge_limits(&mut offer.export_offer, &tree.available_energy(id, Direction::Export));
        }
        offer
    }

    pub fn len(&self) -> usize {
        self.import_offer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.import_offer.is_empty()
    }
}

/// Intersect `offer` with `available` slot by slot.
///
/// Caps take the minimum, floors the maximum. Advisory fields follow the node
/// closest to the leaf.
pub fn merge_limits(offer: &mut [ScheduleReqEntry], available: &[ScheduleReqEntry]) {
    if offer.len() != available.len() {
        error!(
            offer = offer.len(),
            available = available.len(),
            "merge_limits: schedules are not of the same size"
        );
        return;
    }

    for (entry, available) in offer.iter_mut().zip(available) {
        let (limits, node) = (&mut entry.limits_to_root, &available.limits_to_root);

        limits.ac_max_current_a = min_optional(limits.ac_max_current_a.take(), node.ac_max_current_a.clone());
        limits.total_power_w = min_optional(limits.total_power_w.take(), node.total_power_w.clone());
        limits.ac_min_current_a = max_optional(limits.ac_min_current_a.take(), node.ac_min_current_a.clone());
        limits.ac_max_phase_count =
            min_optional_int(limits.ac_max_phase_count.take(), node.ac_max_phase_count.clone());
        limits.ac_min_phase_count =
            max_optional_int(limits.ac_min_phase_count.take(), node.ac_min_phase_count.clone());

        if node.ac_supports_changing_phases_during_charging.is_some() {
            limits.ac_supports_changing_phases_during_charging = node.ac_supports_changing_phases_during_charging;
        }
        if node.ac_number_of_active_phases.is_some() {
            limits.ac_number_of_active_phases = node.ac_number_of_active_phases;
        }
        if available.price_per_kwh.is_some() {
            entry.price_per_kwh = available.price_per_kwh.clone();
        }
    }
}

impl fmt::Display for Offer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |n: &Option<crate::domain::NumberWithSource>| match n {
            Some(n) => n.to_string(),
            None => "-".to_string(),
        };
        for (import, export) in self.import_offer.iter().zip(&self.export_offer) {
            writeln!(
                f,
                "{} import {}A {}W export {}A {}W",
                import.timestamp.format("%H:%M:%S"),
                show(&import.limits_to_root.ac_max_current_a),
                show(&import.limits_to_root.total_power_w),
                show(&export.limits_to_root.ac_max_current_a),
                show(&export.limits_to_root.total_power_w),
            )?;
        }
        Ok(())
    }
}
