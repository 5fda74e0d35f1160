use anyhow::{Context, Result};
use open_energy_manager::{config, domain::EnergyFlowRequest, telemetry, EnergyManager};
use config::Config;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cfg = Config::load()?;
    init_tracing(cfg.energy_manager.debug);

    info!(
        nominal_ac_voltage = cfg.energy_manager.nominal_ac_voltage,
        update_interval_s = cfg.energy_manager.update_interval,
        phase_switching = %cfg.energy_manager.switch_3ph_1ph_while_charging_mode,
        "starting Open Energy Manager"
    );

    let manager = EnergyManager::new(cfg.energy_manager.clone());

    if let Some(path) = &cfg.input.request_file {
        let request = EnergyFlowRequest::from_json_file(path)
            .await
            .with_context(|| format!("loading request file {}", path.display()))?;
        manager.on_energy_flow_request(request);
    } else {
        warn!("no request file configured, waiting for energy flow requests");
    }

    let worker = manager.clone();
    let handle = tokio::spawn(async move {
        worker
            .run(|limits| {
                for l in limits {
                    match serde_json::to_string(&l) {
                        Ok(json) => info!(uuid = %l.uuid, limits = %json, "enforced limits"),
                        Err(e) => warn!(error = %e, uuid = %l.uuid, "could not serialize enforced limits"),
                    }
                }
            })
            .await
    });

    telemetry::shutdown_signal().await;
    manager.shutdown_token().cancel();
    handle.await?;

    warn!("shutdown complete");
    Ok(())
}
