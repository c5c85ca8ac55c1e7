//! Main controller implementation.
//!
//! Wires the Kubernetes client, the libvirt client builder and the actuator
//! together, then runs the Machine watcher next to the metrics endpoint.

use std::sync::Arc;

use crds::{JsonProviderCodec, Machine};
use kube::{Api, Client};
use libvirt_client::VirshClientBuilder;
use provisioner::RetryPolicy;
use tokio::task::JoinHandle;
use tracing::info;

use crate::actuator::{Actuator, ActuatorParams};
use crate::config::ActuatorConfig;
use crate::error::ActuatorError;
use crate::events::KubeEventSink;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::secrets::KubeSecretStore;
use crate::status::KubeStatusWriter;
use crate::watcher::watch_machines;

/// Main controller for libvirt-backed machines.
pub struct Controller {
    machine_watcher: JoinHandle<Result<(), ActuatorError>>,
    metrics_server: JoinHandle<Result<(), ActuatorError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ActuatorConfig) -> Result<Self, ActuatorError> {
        info!("Initializing libvirt machine controller");

        let kube_client = Client::try_default().await?;
        let ns = config.namespace.as_deref().unwrap_or("default");
        let machine_api: Api<Machine> = Api::namespaced(kube_client.clone(), ns);

        let metrics = Metrics::new().map_err(|e| ActuatorError::Metrics(e.to_string()))?;

        let clients = match &config.virsh {
            Some(path) => VirshClientBuilder::with_binary(path),
            None => VirshClientBuilder::new(),
        };

        let actuator = Actuator::new(ActuatorParams {
            clients: Arc::new(clients),
            codec: Arc::new(JsonProviderCodec::new()),
            secrets: Arc::new(KubeSecretStore::new(kube_client.clone())),
            events: Arc::new(KubeEventSink::new(kube_client.clone(), &config.event_reporter)),
            status: Arc::new(KubeStatusWriter::new(kube_client)),
            settings: config.domain_settings(),
            retry: RetryPolicy::default(),
            metrics: metrics.clone(),
        });
        let reconciler = Reconciler::new(Arc::new(actuator));

        let machine_watcher = tokio::spawn(watch_machines(machine_api, reconciler));
        let metrics_server = tokio::spawn(metrics::serve(config.metrics_addr, metrics));

        Ok(Self {
            machine_watcher,
            metrics_server,
        })
    }

    /// Run until the watcher or the metrics endpoint stops
    pub async fn run(mut self) -> Result<(), ActuatorError> {
        info!("Libvirt machine controller running");

        tokio::select! {
            result = &mut self.machine_watcher => {
                result.map_err(|e| ActuatorError::Watch(format!("Machine watcher panicked: {}", e)))?
                    .map_err(|e| ActuatorError::Watch(format!("Machine watcher error: {}", e)))?;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ActuatorError::Metrics(format!("Metrics server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
