use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::broker::BrokerContext;
use crate::config::EnergyManagerConfig;
use crate::domain::{EnergyFlowRequest, EnforcedLimits};
use crate::error::Result;
use crate::optimizer::{BrokerContexts, TradingOptimizer};

#[derive(Debug, Default)]
struct ManagerState {
    request: Option<EnergyFlowRequest>,
    contexts: BrokerContexts,
}

/// Runs optimization passes on a fixed interval, or right away when a
/// request asks for priority, and hands the results to a callback.
///
/// Request updates and passes share one lock, so a pass always sees a
/// complete snapshot and never overlaps another pass.
#[derive(Clone)]
pub struct EnergyManager {
    optimizer: Arc<TradingOptimizer>,
    state: Arc<Mutex<ManagerState>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl EnergyManager {
    pub fn new(cfg: EnergyManagerConfig) -> Self {
        Self::with_cancellation(cfg, CancellationToken::new())
    }

    pub fn with_cancellation(cfg: EnergyManagerConfig, shutdown: CancellationToken) -> Self {
        Self {
            optimizer: Arc::new(TradingOptimizer::new(cfg)),
            state: Arc::new(Mutex::new(ManagerState::default())),
            wake: Arc::new(Notify::new()),
            shutdown,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Replace the request tree used by following passes.
    pub fn on_energy_flow_request(&self, request: EnergyFlowRequest) {
        let priority = request.has_priority_request();
        debug!(uuid = %request.uuid, priority, "energy flow request received");
        self.state.lock().request = Some(request);
        if priority {
            self.wake.notify_one();
        }
    }

    pub fn has_request(&self) -> bool {
        self.state.lock().request.is_some()
    }

    pub fn broker_context(&self, uuid: &str) -> Option<BrokerContext> {
        self.state.lock().contexts.get(uuid).cloned()
    }

    /// One pass at `now` over the current snapshot. Nothing is produced
    /// before the first request arrives.
    pub fn run_pass(&self, now: DateTime<Utc>) -> Result<Vec<EnforcedLimits>> {
        let mut state = self.state.lock();
        let ManagerState { request, contexts } = &mut *state;
        match request {
            Some(request) => self.optimizer.run(request, now, contexts),
            None => Ok(Vec::new()),
        }
    }

    /// Control loop; returns once the shutdown token is cancelled.
    pub async fn run<F>(&self, mut on_limits: F)
    where
        F: FnMut(Vec<EnforcedLimits>) + Send,
    {
        let interval = self.optimizer.config().update_interval();
        info!(interval_s = interval.as_secs(), "energy manager started");

        loop {
            if self.has_request() {
                match self.run_pass(Utc::now()) {
                    Ok(limits) => on_limits(limits),
                    Err(e) => error!(error = %e, "optimization pass failed"),
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.wake.notified() => debug!("priority request, optimizing now"),
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("energy manager stopped");
    }
}
