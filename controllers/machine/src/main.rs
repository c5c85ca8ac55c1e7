//! Libvirt Machine Controller
//!
//! Cluster-API machine actuator backed by libvirt:
//! - Creates a domain, its copy-on-write volume and bootstrap artifact per Machine
//! - Reports the domain UUID, power state and addresses in the Machine status
//! - Tears domains and their volumes down when a Machine is deleted
//!
//! Configuration comes from environment variables, see [`config::ActuatorConfig`].

mod actuator;
mod config;
mod controller;
mod error;
mod events;
mod metrics;
mod reconciler;
mod secrets;
mod status;
mod watcher;

#[cfg(test)]
mod test_utils;

use controller::Controller;
use crate::config::ActuatorConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting libvirt machine controller");

    let config = ActuatorConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("default"));
    info!("  Domain type: {}", config.domain_type);
    info!("  Restricted arch ignition: {:?}", config.restricted_ignition);
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
