use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::broker::{Broker, BrokerContext, BrokerFastCharging, PhaseSwitchPolicy};
use crate::config::EnergyManagerConfig;
use crate::domain::{EnergyFlowRequest, EnforcedLimits};
use crate::error::Result;
use crate::market::{MarketTree, Offer, PassContext};

/// Session memory of every leaf, keyed by leaf uuid.
pub type BrokerContexts = HashMap<String, BrokerContext>;

/// Round-robin allocator for one optimization pass.
///
/// Every round each EVSE gets a fresh offer and may claim from it. Rounds
/// repeat until nobody claims anything or the round cap is reached.
#[derive(Debug, Clone)]
pub struct TradingOptimizer {
    cfg: EnergyManagerConfig,
    policy: PhaseSwitchPolicy,
}

impl TradingOptimizer {
    pub fn new(cfg: EnergyManagerConfig) -> Self {
        let policy = PhaseSwitchPolicy::from(&cfg);
        Self { cfg, policy }
    }

    pub fn config(&self) -> &EnergyManagerConfig {
        &self.cfg
    }

    /// Run one pass starting at `start_time` and return a limit for every
    /// leaf that committed anything.
    pub fn run(
        &self,
        request: &EnergyFlowRequest,
        start_time: DateTime<Utc>,
        contexts: &mut BrokerContexts,
    ) -> Result<Vec<EnforcedLimits>> {
        let started = Instant::now();
        let ctx = PassContext::new(
            start_time,
            self.cfg.schedule_interval(),
            self.cfg.schedule_horizon(),
            request,
        )?
        .with_slices(self.cfg.slice_ampere, self.cfg.slice_watt)
        .with_debug(self.cfg.debug);

        let mut tree = MarketTree::new(request, self.cfg.nominal_ac_voltage, &ctx);

        let mut brokers: Vec<Broker> = tree
            .evses()
            .into_iter()
            .map(|id| Broker::FastCharging(BrokerFastCharging::new(id, ctx.len(), self.policy.clone())))
            .collect();

        let live: HashSet<&str> = brokers.iter().map(|b| tree.request(b.market()).uuid.as_str()).collect();
        contexts.retain(|uuid, _| {
            let keep = live.contains(uuid.as_str());
            if !keep {
                debug!(%uuid, "evse left the tree, dropping broker context");
            }
            keep
        });

        for broker in &brokers {
            let leaf = tree.request(broker.market());
            let context = contexts.entry(leaf.uuid.clone()).or_default();
            if leaf.evse_state.is_some_and(|s| s.ends_session()) {
                debug!(uuid = %leaf.uuid, state = ?leaf.evse_state, "session ended, clearing broker context");
                context.clear();
            }
        }

        let mut rounds = 0;
        loop {
            if rounds == self.cfg.max_trading_rounds {
                error!(rounds, "trading did not converge, using allocation so far");
                break;
            }
            rounds += 1;

            let mut traded = false;
            for broker in brokers.iter_mut() {
                let id = broker.market();
                let offer = Offer::new(&tree, id, &ctx);
                let context = contexts.entry(tree.request(id).uuid.clone()).or_default();
                traded |= broker.trade(&mut tree, &offer, &ctx, context);
            }
            if !traded {
                break;
            }
        }

        let validity = self.cfg.limits_validity();
        let valid_until = ctx.start_time + validity;
        let active_slot = ctx.active_slot();

        let limits: Vec<EnforcedLimits> = brokers
            .iter()
            .filter_map(|broker| {
                let sold = tree.sold_energy(broker.market());
                if sold.iter().all(|e| e.limits_to_root.is_empty()) {
                    return None;
                }
                Some(EnforcedLimits {
                    uuid: tree.request(broker.market()).uuid.clone(),
                    valid_until,
                    valid_for: validity.num_seconds(),
                    limits_root_side: sold[active_slot].limits_to_root.clone(),
                    schedule: sold.to_vec(),
                })
            })
            .collect();

        debug!(
            rounds,
            evses = brokers.len(),
            slots = ctx.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "optimization pass done"
        );
        Ok(limits)
    }
}

/// Convenience wrapper running a single pass with a fresh optimizer.
pub fn run_optimizer(
    request: &EnergyFlowRequest,
    start_time: DateTime<Utc>,
    cfg: &EnergyManagerConfig,
    contexts: &mut BrokerContexts,
) -> Result<Vec<EnforcedLimits>> {
    TradingOptimizer::new(cfg.clone()).run(request, start_time, contexts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EvseState, LimitsReq, NodeType, NumberWithSource, ScheduleReqEntry};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn node(uuid: &str, node_type: NodeType, max_a: f64) -> EnergyFlowRequest {
        let mut n = EnergyFlowRequest::new(uuid, node_type);
        n.schedule_import = vec![ScheduleReqEntry {
            limits_to_root: LimitsReq {
                ac_max_current_a: Some(NumberWithSource::new(max_a, uuid)),
                ..Default::default()
            },
            ..ScheduleReqEntry::new(ts("2024-01-01T12:00:00Z"))
        }];
        n
    }

    fn amps(limits: &EnforcedLimits) -> f64 {
        limits.max_current_a().unwrap_or(f64::NAN)
    }

    #[test]
    fn test_siblings_share_parent_round_robin() {
        let request = node("grid", NodeType::Generic, 20.0)
            .with_child(node("evse_1", NodeType::Evse, 16.0))
            .with_child(node("evse_2", NodeType::Evse, 16.0));
        let mut contexts = BrokerContexts::new();

        let limits =
            run_optimizer(&request, ts("2024-01-01T12:10:00Z"), &EnergyManagerConfig::default(), &mut contexts).unwrap();

        assert_eq!(limits.len(), 2);
        assert_eq!(amps(&limits[0]), 10.0);
        assert_eq!(amps(&limits[1]), 10.0);
        assert_eq!(limits[0].valid_until, ts("2024-01-01T12:10:10Z"));
        assert_eq!(limits[0].valid_for, 10);
        assert_eq!(contexts.len(), 2);
    }

    #[test]
    fn test_round_cap_keeps_partial_allocation() {
        let request = node("evse", NodeType::Evse, 16.0);
        let cfg = EnergyManagerConfig {
            max_trading_rounds: 3,
            ..Default::default()
        };
        let limits = run_optimizer(&request, ts("2024-01-01T12:00:00Z"), &cfg, &mut BrokerContexts::new()).unwrap();
        assert_eq!(amps(&limits[0]), 1.5);
    }

    #[test]
    fn test_tree_without_evse_yields_nothing() {
        let request = node("grid", NodeType::Generic, 32.0);
        let limits = run_optimizer(
            &request,
            ts("2024-01-01T12:00:00Z"),
            &EnergyManagerConfig::default(),
            &mut BrokerContexts::new(),
        )
        .unwrap();
        assert!(limits.is_empty());
    }

    #[test]
    fn test_finished_session_clears_context() {
        let mut request = node("evse", NodeType::Evse, 16.0);
        request.evse_state = Some(EvseState::Finished);
        let mut contexts = BrokerContexts::new();
        contexts.insert(
            "evse".to_string(),
            BrokerContext {
                number_of_switches: 4,
                last_active_phases: Some(1),
                ts_1ph_optimal: None,
            },
        );

        run_optimizer(&request, ts("2024-01-01T12:00:00Z"), &EnergyManagerConfig::default(), &mut contexts).unwrap();
        assert_eq!(contexts["evse"], BrokerContext::default());
    }

    #[test]
    fn test_context_of_removed_evse_is_dropped() {
        let request = node("grid", NodeType::Generic, 32.0).with_child(node("evse_1", NodeType::Evse, 16.0));
        let mut contexts = BrokerContexts::new();
        let session = BrokerContext {
            number_of_switches: 1,
            last_active_phases: Some(3),
            ts_1ph_optimal: None,
        };
        contexts.insert("evse_1".to_string(), session.clone());
        contexts.insert("evse_2".to_string(), session);

        run_optimizer(&request, ts("2024-01-01T12:00:00Z"), &EnergyManagerConfig::default(), &mut contexts).unwrap();

        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts["evse_1"].number_of_switches, 1);
        assert!(!contexts.contains_key("evse_2"));
    }
}
