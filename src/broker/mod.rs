//! Allocation strategies: how a leaf turns an offer into a claim.

pub mod context;
pub mod fast_charging;
pub mod phase;

pub use context::BrokerContext;
pub use fast_charging::BrokerFastCharging;
pub use phase::PhaseSwitchPolicy;

use crate::market::{MarketId, MarketTree, Offer, PassContext};

/// Strategy trading for one leaf during one pass.
#[derive(Debug)]
pub enum Broker {
    FastCharging(BrokerFastCharging),
}

impl Broker {
    pub fn market(&self) -> MarketId {
        match self {
            Broker::FastCharging(b) => b.market(),
        }
    }

    /// True if anything was claimed from `offer`.
    pub fn trade(
        &mut self,
        tree: &mut MarketTree<'_>,
        offer: &Offer,
        ctx: &PassContext,
        context: &mut BrokerContext,
    ) -> bool {
        match self {
            Broker::FastCharging(b) => b.trade(tree, offer, ctx, context),
        }
    }
}
