//! pingwatch daemon: monitors the persisted host list and serves a JSON API.

use pingwatch::alerts;
use pingwatch::hosts::HostList;
use pingwatch::web::Server;
use pingwatch::{HostManager, ProbeChain, ServerConfig};

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pingwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting pingwatch on port {}...", cfg.http_port);
    tracing::info!("Using host list at {}", cfg.hosts_path.display());

    let prober = ProbeChain::for_mode(cfg.probe_mode, cfg.monitor.attempt_timeout)
        .with_budget(cfg.monitor.probe_timeout);
    tracing::info!("Probe strategies: {}", prober.strategy_names().join(", "));

    let (manager, updates) = HostManager::new(cfg.monitor.clone(), Arc::new(prober));
    let manager = Arc::new(manager);

    // Resume monitoring the saved targets
    let hosts = HostList::load(&cfg.hosts_path)?;
    tracing::info!("Loaded {} host(s)", hosts.len());
    for entry in hosts.entries() {
        manager.add_host(&entry.target, cfg.monitor.default_interval).await;
    }
    let hosts = Arc::new(Mutex::new(hosts));

    let status_log = tokio::spawn(alerts::run_status_log(updates, manager.clone()));

    let server = Server::new(cfg.clone(), manager.clone(), hosts.clone());
    let served = server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await;

    if let Err(e) = hosts.lock().await.save(&cfg.hosts_path) {
        tracing::error!("Failed to save host list: {}", e);
    }
    manager.stop_all().await;
    status_log.abort();
    tracing::info!("pingwatch stopped");

    served
}
