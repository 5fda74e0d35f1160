use tracing::{error, info};

use super::{BrokerContext, PhaseSwitchPolicy};
use crate::domain::{IntegerWithSource, LimitsReq, LimitsRes, NumberWithSource};
use crate::market::{Direction, MarketId, MarketTree, Offer, PassContext};

const PHASE_DECISION_SOURCE: &str = "EnergyManager";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotType {
    Undecided,
    Import,
    Export,
}

/// Charge as fast as the offer allows and only discharge when charging is
/// not possible at all in a slot.
#[derive(Debug)]
pub struct BrokerFastCharging {
    market: MarketId,
    policy: PhaseSwitchPolicy,
    slot_type: Vec<SlotType>,
    first_trade: Vec<bool>,
    phases: Vec<Option<i32>>,
}

/// What one claim is measured against.
struct Claim<'a> {
    limits: &'a LimitsReq,
    phases: i32,
    nominal_ac_voltage: f64,
    sign: f64,
}

impl BrokerFastCharging {
    pub fn new(market: MarketId, slots: usize, policy: PhaseSwitchPolicy) -> Self {
        Self {
            market,
            policy,
            slot_type: vec![SlotType::Undecided; slots],
            first_trade: vec![true; slots],
            phases: vec![None; slots],
        }
    }

    pub fn market(&self) -> MarketId {
        self.market
    }

    /// Claim from `offer` and commit the claim to the tree.
    ///
    /// Returns true if anything was claimed. The commit happens in either
    /// case so that an untouched slot still reports zero rather than nothing.
    pub fn trade(
        &mut self,
        tree: &mut MarketTree<'_>,
        offer: &Offer,
        ctx: &PassContext,
        context: &mut BrokerContext,
    ) -> bool {
        let uuid = &tree.request(self.market).uuid;
        if ctx.debug {
            info!(%uuid, "offer\n{offer}");
        }

        if offer.import_offer.len() != offer.export_offer.len() || offer.len() != self.slot_type.len() {
            error!(
                %uuid,
                import = offer.import_offer.len(),
                export = offer.export_offer.len(),
                slots = self.slot_type.len(),
                "import and export offer do not have the same size"
            );
            return false;
        }

        let mut trading = ctx.empty_schedule_res();
        for (entry, import) in trading.iter_mut().zip(&offer.import_offer) {
            entry.price_per_kwh = import.price_per_kwh.clone();
            let (committed, limits) = (&mut entry.limits_to_root, &import.limits_to_root);
            committed.ac_max_current_a = limits
                .ac_max_current_a
                .as_ref()
                .map(|c| NumberWithSource::new(0.0, c.source.clone()));
            committed.total_power_w = limits
                .total_power_w
                .as_ref()
                .map(|p| NumberWithSource::new(0.0, p.source.clone()));
        }

        let nominal_ac_voltage = tree.nominal_ac_voltage();
        let active_slot = ctx.active_slot();
        let mut traded = false;

        for (i, committed) in trading.iter_mut().enumerate() {
            let import = &offer.import_offer[i].limits_to_root;
            let export = &offer.export_offer[i].limits_to_root;

            if self.slot_type[i] == SlotType::Undecided {
                if !import.is_blocked() {
                    self.slot_type[i] = SlotType::Import;
                } else if !export.is_blocked() {
                    self.slot_type[i] = SlotType::Export;
                }
            }

            let bought = match self.slot_type[i] {
                SlotType::Import => {
                    let now = (i == active_slot).then_some(ctx.start_time);
                    self.trade_import(i, import, &mut committed.limits_to_root, ctx, nominal_ac_voltage, context, now)
                }
                SlotType::Export => {
                    let claim = Claim {
                        limits: export,
                        phases: export.ac_max_phase_count.as_ref().map_or(1, |p| p.value),
                        nominal_ac_voltage,
                        sign: Direction::Export.sign(),
                    };
                    self.trade_slot(i, &claim, &mut committed.limits_to_root, ctx)
                }
                SlotType::Undecided => false,
            };
            traded |= bought;
        }

        if ctx.debug {
            let first = trading.first().map(|e| &e.limits_to_root);
            info!(
                %uuid,
                traded,
                current_a = ?first.and_then(|l| l.ac_max_current_a.as_ref()).map(|n| n.value),
                power_w = ?first.and_then(|l| l.total_power_w.as_ref()).map(|n| n.value),
                "trade"
            );
        }

        tree.trade(self.market, &trading);
        traded
    }

    #[allow(clippy::too_many_arguments)]
    fn trade_import(
        &mut self,
        i: usize,
        limits: &LimitsReq,
        committed: &mut LimitsRes,
        ctx: &PassContext,
        nominal_ac_voltage: f64,
        context: &mut BrokerContext,
        now: Option<chrono::DateTime<chrono::Utc>>,
    ) -> bool {
        let mut phases = self.phases[i];
        if self.first_trade[i] && self.policy.is_enabled() {
            phases = self.policy.decide(limits, nominal_ac_voltage, context, now);
        }

        let mut claim = Claim {
            limits,
            phases: phases.unwrap_or_else(|| limits.ac_max_phase_count.as_ref().map_or(1, |p| p.value)),
            nominal_ac_voltage,
            sign: Direction::Import.sign(),
        };
        let mut bought = self.trade_slot(i, &claim, committed, ctx);

        // a session out of switches keeps its pinned phase count or gets nothing
        let pinned = context.switches_exceeded(self.policy.max_switches_per_session);
        let min_phases = limits.ac_min_phase_count.as_ref().map_or(1, |p| p.value);
        if !bought && !pinned && self.first_trade[i] && phases.is_some_and(|p| p > min_phases) {
            phases = Some(min_phases);
            claim.phases = min_phases;
            bought = self.trade_slot(i, &claim, committed, ctx);
        }

        if let (true, Some(p)) = (bought, phases) {
            if now.is_some() && self.phases[i].is_none() {
                if pinned {
                    context.last_active_phases = Some(p);
                } else {
                    context.record_active_phases(p);
                }
            }
            self.phases[i] = Some(p);
            committed.ac_max_phase_count = Some(IntegerWithSource::new(p, PHASE_DECISION_SOURCE));
        }
        bought
    }

    fn trade_slot(&mut self, i: usize, claim: &Claim<'_>, committed: &mut LimitsRes, ctx: &PassContext) -> bool {
        let limits = claim.limits;
        let bought = if limits.ac_max_current_a.is_some() {
            match limits.ac_min_current_a.as_ref().filter(|c| c.value > 0.0) {
                // the minimum current or nothing
                Some(min) if self.first_trade[i] => buy_ampere(claim, min.value, false, committed),
                _ => buy_ampere(claim, ctx.slice_ampere, true, committed),
            }
        } else if limits.total_power_w.is_some() {
            buy_watt(claim, ctx.slice_watt, true, committed)
        } else {
            false
        };

        if bought {
            self.first_trade[i] = false;
        }
        bought
    }
}

fn commit(committed: &mut LimitsRes, claim: &Claim<'_>, ampere: f64, ampere_source: &str, watt: Option<&str>) {
    committed.ac_max_current_a = Some(NumberWithSource::new(claim.sign * ampere, ampere_source));
    if let Some(watt_source) = watt {
        let watt = ampere * f64::from(claim.phases) * claim.nominal_ac_voltage;
        committed.total_power_w = Some(NumberWithSource::new(claim.sign * watt, watt_source));
    }
}

/// Claim `ampere` on every phase, or what is left of the current ceiling if
/// `allow_less`. A lower watt ceiling reduces the current and then names
/// itself as the source of the result.
fn buy_ampere(claim: &Claim<'_>, ampere: f64, allow_less: bool, committed: &mut LimitsRes) -> bool {
    let Some(max_current) = claim.limits.ac_max_current_a.as_ref() else {
        error!("buy_ampere called with only a watt limit available");
        return false;
    };
    let watt_per_ampere = f64::from(claim.phases) * claim.nominal_ac_voltage;
    let source = max_current.source.as_str();

    if max_current.value >= ampere {
        match claim.limits.total_power_w.as_ref() {
            Some(power) if power.value >= ampere * watt_per_ampere => {
                commit(committed, claim, ampere, source, Some(power.source.as_str()));
                return true;
            }
            Some(_) => {}
            None => {
                commit(committed, claim, ampere, source, None);
                return true;
            }
        }
    }

    if !allow_less || max_current.value <= 0.0 {
        return false;
    }

    match claim.limits.total_power_w.as_ref() {
        Some(power) if power.value <= 0.0 => false,
        Some(power) if power.value >= max_current.value * watt_per_ampere => {
            commit(committed, claim, max_current.value, source, Some(power.source.as_str()));
            true
        }
        Some(power) => {
            let reduced = power.value / watt_per_ampere;
            commit(committed, claim, reduced, &power.source, Some(power.source.as_str()));
            true
        }
        None => {
            commit(committed, claim, max_current.value, source, None);
            true
        }
    }
}

/// Claim `watt` against a node that only has a power ceiling. The matching
/// current is committed alongside so the leaf still gets an ampere limit.
fn buy_watt(claim: &Claim<'_>, watt: f64, allow_less: bool, committed: &mut LimitsRes) -> bool {
    let Some(power) = claim.limits.total_power_w.as_ref() else {
        error!("buy_watt called with no watt limit available");
        return false;
    };

    let watt = if power.value >= watt {
        watt
    } else if allow_less && power.value > 0.0 {
        power.value
    } else {
        return false;
    };

    let ampere = watt / (f64::from(claim.phases) * claim.nominal_ac_voltage);
    committed.total_power_w = Some(NumberWithSource::new(claim.sign * watt, power.source.clone()));
    committed.ac_max_current_a = Some(NumberWithSource::new(claim.sign * ampere, power.source.clone()));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwitchPhasesMode;
    use crate::domain::{EnergyFlowRequest, NodeType, ScheduleReqEntry};
    use chrono::{DateTime, Duration, Utc};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn evse(import: LimitsReq, export: Option<LimitsReq>) -> EnergyFlowRequest {
        let t = ts("2024-01-01T12:00:00Z");
        let mut evse = EnergyFlowRequest::new("evse", NodeType::Evse);
        evse.schedule_import = vec![ScheduleReqEntry {
            limits_to_root: import,
            ..ScheduleReqEntry::new(t)
        }];
        if let Some(export) = export {
            evse.schedule_export = vec![ScheduleReqEntry {
                limits_to_root: export,
                ..ScheduleReqEntry::new(t)
            }];
        }
        evse
    }

    fn ctx_for(request: &EnergyFlowRequest) -> PassContext {
        PassContext::new(ts("2024-01-01T12:00:00Z"), Duration::minutes(60), Duration::hours(1), request).unwrap()
    }

    fn n(value: f64, source: &str) -> Option<NumberWithSource> {
        Some(NumberWithSource::new(value, source))
    }

    /// Trade until nothing moves any more and return the committed slot 0.
    fn settle(request: &EnergyFlowRequest, policy: PhaseSwitchPolicy, context: &mut BrokerContext) -> LimitsRes {
        let ctx = ctx_for(request);
        let mut tree = MarketTree::new(request, 230.0, &ctx);
        let mut broker = BrokerFastCharging::new(MarketId::ROOT, ctx.len(), policy);
        for _ in 0..200 {
            let offer = Offer::new(&tree, MarketId::ROOT, &ctx);
            if !broker.trade(&mut tree, &offer, &ctx, context) {
                break;
            }
        }
        tree.sold_energy(MarketId::ROOT)[0].limits_to_root.clone()
    }

    fn amps(limits: &LimitsRes) -> f64 {
        limits.ac_max_current_a.as_ref().map_or(f64::NAN, |n| n.value)
    }

    #[test]
    fn test_claims_full_current_ceiling() {
        let request = evse(
            LimitsReq {
                ac_max_current_a: n(16.0, "evse"),
                ac_min_current_a: n(6.0, "evse"),
                ..Default::default()
            },
            None,
        );
        let sold = settle(&request, PhaseSwitchPolicy::default(), &mut BrokerContext::default());
        assert_eq!(amps(&sold), 16.0);
        assert!(sold.total_power_w.is_none());
    }

    #[test]
    fn test_watt_only_ceiling_sets_current() {
        let request = evse(
            LimitsReq {
                total_power_w: n(4000.0, "grid"),
                ..Default::default()
            },
            None,
        );
        let sold = settle(&request, PhaseSwitchPolicy::default(), &mut BrokerContext::default());
        assert!((amps(&sold) - 4000.0 / 230.0).abs() < 1e-6);
        assert!((sold.total_power_w.as_ref().unwrap().value - 4000.0).abs() < 1e-6);
        assert_eq!(sold.ac_max_current_a.as_ref().unwrap().source, "grid");
    }

    #[test]
    fn test_watt_ceiling_bounds_current_and_names_source() {
        let request = evse(
            LimitsReq {
                ac_max_current_a: n(32.0, "evse"),
                total_power_w: n(2350.0, "grid"),
                ..Default::default()
            },
            None,
        );
        let sold = settle(&request, PhaseSwitchPolicy::default(), &mut BrokerContext::default());
        assert!((amps(&sold) - 2350.0 / 230.0).abs() < 1e-9);
        assert_eq!(sold.ac_max_current_a.as_ref().unwrap().source, "grid");
    }

    #[test]
    fn test_minimum_current_or_nothing() {
        let request = evse(
            LimitsReq {
                ac_max_current_a: n(4.0, "grid"),
                ac_min_current_a: n(6.0, "evse"),
                ..Default::default()
            },
            None,
        );
        let sold = settle(&request, PhaseSwitchPolicy::default(), &mut BrokerContext::default());
        assert_eq!(amps(&sold), 0.0);
    }

    #[test]
    fn test_exports_when_import_is_closed() {
        let request = evse(
            LimitsReq::zero(),
            Some(LimitsReq {
                ac_max_current_a: n(8.0, "evse"),
                ..Default::default()
            }),
        );
        let sold = settle(&request, PhaseSwitchPolicy::default(), &mut BrokerContext::default());
        assert_eq!(amps(&sold), -8.0);
    }

    #[test]
    fn test_zero_offer_never_trades() {
        let request = evse(LimitsReq::zero(), None);
        let ctx = ctx_for(&request);
        let mut tree = MarketTree::new(&request, 230.0, &ctx);
        let mut broker = BrokerFastCharging::new(MarketId::ROOT, ctx.len(), PhaseSwitchPolicy::default());
        let mut context = BrokerContext::default();

        let offer = Offer::new(&tree, MarketId::ROOT, &ctx);
        assert!(!broker.trade(&mut tree, &offer, &ctx, &mut context));
        let first = tree.sold_energy(MarketId::ROOT).to_vec();
        for _ in 0..3 {
            let offer = Offer::new(&tree, MarketId::ROOT, &ctx);
            assert!(!broker.trade(&mut tree, &offer, &ctx, &mut context));
        }
        assert_eq!(tree.sold_energy(MarketId::ROOT), first.as_slice());
        assert_eq!(amps(&first[0].limits_to_root), 0.0);
    }

    #[test]
    fn test_falls_back_to_one_phase_when_three_do_not_fit() {
        let request = evse(
            LimitsReq {
                ac_max_current_a: n(32.0, "evse"),
                ac_min_current_a: n(6.0, "evse"),
                total_power_w: n(3000.0, "grid"),
                ac_max_phase_count: Some(IntegerWithSource::new(3, "evse")),
                ac_number_of_active_phases: Some(3),
                ..Default::default()
            },
            None,
        );
        let policy = PhaseSwitchPolicy {
            mode: SwitchPhasesMode::Both,
            ..Default::default()
        };
        let mut context = BrokerContext {
            last_active_phases: Some(3),
            ..Default::default()
        };
        let sold = settle(&request, policy, &mut context);

        assert_eq!(sold.ac_max_phase_count.as_ref().map(|p| p.value), Some(1));
        assert!((amps(&sold) - 3000.0 / 230.0).abs() < 1e-9);
        assert_eq!(context.number_of_switches, 1);
        assert_eq!(context.last_active_phases, Some(1));
    }
}
