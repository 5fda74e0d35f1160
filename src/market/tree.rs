//! # Capacity Tree
//!
//! One [`MarketNode`] per request node, stored in an arena and addressed by
//! [`MarketId`]. Each node knows the most it may ever carry per slot
//! (`max_available`) and how much has been committed below it so far (`sold`).
//! A trade at a leaf is added to the leaf and every ancestor, which is how one
//! leaf's claim shrinks the headroom seen by its siblings.

use tracing::{error, trace};

use super::setpoints::{apply_setpoints, resample_setpoints};
use super::PassContext;
use crate::domain::{
    covering_index, max_optional, max_optional_int, min_optional, min_optional_int, EnergyFlowRequest, NodeType,
    NumberWithSource, ScheduleReqEntry, ScheduleResEntry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarketId(usize);

impl MarketId {
    pub const ROOT: MarketId = MarketId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Import,
    Export,
}

impl Direction {
    /// Sign of committed values flowing in this direction.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Import => 1.0,
            Direction::Export => -1.0,
        }
    }
}

#[derive(Debug)]
struct MarketNode<'a> {
    request: &'a EnergyFlowRequest,
    parent: Option<MarketId>,
    children: Vec<MarketId>,
    import_max_available: Vec<ScheduleReqEntry>,
    export_max_available: Vec<ScheduleReqEntry>,
    sold: Vec<ScheduleResEntry>,
}

#[derive(Debug)]
pub struct MarketTree<'a> {
    nodes: Vec<MarketNode<'a>>,
    nominal_ac_voltage: f64,
}

impl<'a> MarketTree<'a> {
    /// Build one market per request node, depth-first, root first.
    pub fn new(request: &'a EnergyFlowRequest, nominal_ac_voltage: f64, ctx: &PassContext) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            nominal_ac_voltage,
        };
        tree.build(request, None, ctx);
        tree
    }

    fn build(&mut self, request: &'a EnergyFlowRequest, parent: Option<MarketId>, ctx: &PassContext) -> MarketId {
        let mut import_max_available = max_available_energy(ctx, &request.schedule_import);
        let mut export_max_available = max_available_energy(ctx, &request.schedule_export);

        if !request.schedule_setpoints.is_empty() {
            let setpoints = resample_setpoints(ctx, &request.schedule_setpoints);
            apply_setpoints(
                &mut import_max_available,
                &mut export_max_available,
                &setpoints,
                request.measured_frequency(),
            );
        }

        assert_eq!(import_max_available.len(), ctx.len(), "import schedule of {} off grid", request.uuid);
        assert_eq!(export_max_available.len(), ctx.len(), "export schedule of {} off grid", request.uuid);

        let id = MarketId(self.nodes.len());
        trace!(uuid = %request.uuid, node = id.0, "create market");
        self.nodes.push(MarketNode {
            request,
            parent,
            children: Vec::with_capacity(request.children.len()),
            import_max_available,
            export_max_available,
            sold: ctx.empty_schedule_res(),
        });

        for child in &request.children {
            let child_id = self.build(child, Some(id), ctx);
            self.nodes[id.0].children.push(child_id);
        }
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nominal_ac_voltage(&self) -> f64 {
        self.nominal_ac_voltage
    }

    pub fn request(&self, id: MarketId) -> &'a EnergyFlowRequest {
        self.nodes[id.0].request
    }

    pub fn parent(&self, id: MarketId) -> Option<MarketId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: MarketId) -> &[MarketId] {
        &self.nodes[id.0].children
    }

    pub fn is_root(&self, id: MarketId) -> bool {
        self.nodes[id.0].parent.is_none()
    }

    /// Nodes from the root down to `id`, both included.
    pub fn path_from_root(&self, id: MarketId) -> Vec<MarketId> {
        let mut path: Vec<MarketId> = std::iter::successors(Some(id), |n| self.parent(*n)).collect();
        path.reverse();
        path
    }

    /// All EVSE nodes anywhere in the tree, in depth-first order.
    pub fn evses(&self) -> Vec<MarketId> {
        (0..self.nodes.len())
            .map(MarketId)
            .filter(|id| self.nodes[id.0].request.node_type == NodeType::Evse)
            .collect()
    }

    pub fn max_available(&self, id: MarketId, direction: Direction) -> &[ScheduleReqEntry] {
        let node = &self.nodes[id.0];
        match direction {
            Direction::Import => &node.import_max_available,
            Direction::Export => &node.export_max_available,
        }
    }

    /// Net committed schedule at this node: the sum of every trade below it.
    pub fn sold_energy(&self, id: MarketId) -> &[ScheduleResEntry] {
        &self.nodes[id.0].sold
    }

    /// Headroom left at this node for `direction`.
    ///
    /// Commitments in the same direction use up capacity, commitments in the
    /// opposite direction free it: `max_available - net_sold`, where
    /// `net_sold` is signed so that this direction counts positive.
    ///
    /// Netting is unclamped: power fed back below a node lets it
    /// draw that much more. See "Export frees import headroom" in DESIGN.md.
    pub fn available_energy(&self, id: MarketId, direction: Direction) -> Vec<ScheduleReqEntry> {
        let node = &self.nodes[id.0];
        let sign = direction.sign();
        let mut available = self.max_available(id, direction).to_vec();

        for (slot, sold) in available.iter_mut().zip(&node.sold) {
            let sold = &sold.limits_to_root;
            let limits = &mut slot.limits_to_root;
            if let (Some(cap), Some(sold)) = (limits.ac_max_current_a.as_mut(), sold.ac_max_current_a.as_ref()) {
                cap.value -= sign * sold.value;
            }
            if let (Some(cap), Some(sold)) = (limits.total_power_w.as_mut(), sold.total_power_w.as_ref()) {
                cap.value -= sign * sold.value;
            }
        }
        available
    }

    /// Commit `traded` at `id` and every ancestor up to the root.
    pub fn trade(&mut self, id: MarketId, traded: &[ScheduleResEntry]) {
        let mut next = Some(id);
        while let Some(current) = next {
            schedule_add(&mut self.nodes[current.0].sold, traded);
            next = self.nodes[current.0].parent;
        }
    }
}

/// Resample `request` onto the pass grid and fold leaf side limits onto the
/// root side. Nodes without a schedule get nothing.
pub fn max_available_energy(ctx: &PassContext, request: &[ScheduleReqEntry]) -> Vec<ScheduleReqEntry> {
    if request.is_empty() {
        return ctx.zero_schedule_req();
    }

    ctx.timestamps()
        .iter()
        .map(|t| {
            let mut available = ScheduleReqEntry::new(*t);
            let Some(i) = covering_index(request, *t, |e| e.timestamp) else {
                return available;
            };
            let r = &request[i];
            let (root, leaves) = (&r.limits_to_root, &r.limits_to_leaves);
            let limits = &mut available.limits_to_root;

            let efficiency = r.conversion_efficiency.unwrap_or(1.0);
            let leaves_power = leaves
                .total_power_w
                .clone()
                .map(|p| NumberWithSource::new(p.value / efficiency, p.source));
            limits.total_power_w = min_optional(leaves_power, root.total_power_w.clone());
            limits.ac_max_current_a = min_optional(leaves.ac_max_current_a.clone(), root.ac_max_current_a.clone());
            limits.ac_min_current_a = max_optional(root.ac_min_current_a.clone(), leaves.ac_min_current_a.clone());
            limits.ac_max_phase_count =
                min_optional_int(root.ac_max_phase_count.clone(), leaves.ac_max_phase_count.clone());
            limits.ac_min_phase_count =
                max_optional_int(root.ac_min_phase_count.clone(), leaves.ac_min_phase_count.clone());
            limits.ac_supports_changing_phases_during_charging = root
                .ac_supports_changing_phases_during_charging
                .or(leaves.ac_supports_changing_phases_during_charging);
            limits.ac_number_of_active_phases = root.ac_number_of_active_phases.or(leaves.ac_number_of_active_phases);

            available.price_per_kwh = r.price_per_kwh.clone();
            available
        })
        .collect()
}

fn add_with_source(a: &mut Option<NumberWithSource>, b: &Option<NumberWithSource>) {
    let Some(b) = b else { return };
    let (sum, source) = match a.take() {
        Some(a) if b.value == 0.0 => (a.value, a.source),
        Some(a) => (a.value + b.value, b.source.clone()),
        None => (b.value, b.source.clone()),
    };
    *a = Some(NumberWithSource::new(sum, source));
}

/// Per slot sum of current and power; phase count keeps the largest seen
/// and the latest price wins.
fn schedule_add(a: &mut [ScheduleResEntry], b: &[ScheduleResEntry]) {
    if a.len() != b.len() {
        error!(a = a.len(), b = b.len(), "schedule_add: schedules are not of the same size");
        return;
    }

    for (a, b) in a.iter_mut().zip(b) {
        if b.price_per_kwh.is_some() {
            a.price_per_kwh = b.price_per_kwh.clone();
        }
        let (a, b) = (&mut a.limits_to_root, &b.limits_to_root);
        add_with_source(&mut a.ac_max_current_a, &b.ac_max_current_a);
        add_with_source(&mut a.total_power_w, &b.total_power_w);
        a.ac_max_phase_count = max_optional_int(a.ac_max_phase_count.take(), b.ac_max_phase_count.clone());
    }
}
