//! Machine actuator.
//!
//! Implements the four machine operations the controller drives: create,
//! delete, update and exists. Every operation builds its own libvirt client
//! and closes it before returning. Create and delete failures are reported
//! as Kubernetes events as well as returned.

use std::sync::Arc;

use chrono::Utc;
use crds::{
    ConditionStatus, ConditionType, LibvirtMachineProviderConfig, Machine, MachineStatus, NodeAddress,
    NodeAddressType, ProviderCodec,
};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use libvirt_client::{ClientBuilder, Domain, LibvirtClientTrait};
use provisioner::{
    DomainBuilder, DomainRequest, DomainSettings, NetworkIdentity, PoolLocks, ProvisionError, ReservedLeases,
    RetryPolicy, SecretStore, VolumeManager, VolumeRequest, cloud_init_volume_name, delete_domain, domain_exists,
    domain_state_string, ignition_volume_name, lookup_domain, lookup_hostname_by_lease, node_addresses,
};
use tracing::{debug, error, info, warn};

use crate::error::{ActuatorError, FailureReason};
use crate::events::{EventSink, actions, reasons};
use crate::metrics::Metrics;
use crate::status::MachineStatusWriter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Format of the primary volume
const VOLUME_FORMAT: &str = "qcow2";

/// Reason and message of the `MachineCreated` condition after a successful create
const CREATED_REASON: &str = "MachineCreationSucceeded";
const CREATED_MESSAGE: &str = "machine successfully created";

/// Collaborators of an [`Actuator`]
pub struct ActuatorParams {
    /// Builds one hypervisor client per operation
    pub clients: Arc<dyn ClientBuilder>,
    /// Provider config and status codec
    pub codec: Arc<dyn ProviderCodec>,
    /// Bootstrap secrets
    pub secrets: Arc<dyn SecretStore>,
    /// Machine events
    pub events: Arc<dyn EventSink>,
    /// Machine status persistence
    pub status: Arc<dyn MachineStatusWriter>,
    /// Domain build settings
    pub settings: DomainSettings,
    /// Pool refresh retries
    pub retry: RetryPolicy,
    /// Operation counters
    pub metrics: Metrics,
}

/// Creates, deletes and refreshes libvirt-backed machines
pub struct Actuator {
    clients: Arc<dyn ClientBuilder>,
    codec: Arc<dyn ProviderCodec>,
    secrets: Arc<dyn SecretStore>,
    events: Arc<dyn EventSink>,
    status: Arc<dyn MachineStatusWriter>,
    settings: DomainSettings,
    retry: RetryPolicy,
    metrics: Metrics,
    leases: ReservedLeases,
    locks: PoolLocks,
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator")
            .field("settings", &self.settings)
            .field("retry", &self.retry)
            .field("leases", &self.leases)
            .finish_non_exhaustive()
    }
}

struct MachineKey {
    namespace: String,
    name: String,
}

impl MachineKey {
    fn of(machine: &Machine) -> Self {
        Self {
            namespace: machine.namespace().unwrap_or_else(|| "default".to_string()),
            name: machine.name_any(),
        }
    }

    /// Wrap `source` with the machine's identity and log it
    fn error(&self, message: &str, reason: FailureReason, source: impl Into<BoxError>) -> ActuatorError {
        let err = ActuatorError::Machine {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            message: message.to_string(),
            reason,
            source: source.into(),
        };
        error!("{}", err);
        err
    }
}

impl Actuator {
    /// Actuator with an empty reserved lease set
    pub fn new(params: ActuatorParams) -> Self {
        Self {
            clients: params.clients,
            codec: params.codec,
            secrets: params.secrets,
            events: params.events,
            status: params.status,
            settings: params.settings,
            retry: params.retry,
            metrics: params.metrics,
            leases: ReservedLeases::new(),
            locks: PoolLocks::new(),
        }
    }

    /// Create the volume and domain of a machine and record its status
    pub async fn create(&self, machine: &Machine) -> Result<(), ActuatorError> {
        let key = MachineKey::of(machine);
        info!("Creating machine {}/{}", key.namespace, key.name);

        let result = self.try_create(&key, machine).await;
        match &result {
            Ok(()) => {
                self.metrics.record(actions::CREATE, "success");
                self.publish(machine, EventType::Normal, reasons::CREATED, actions::CREATE, format!("Created Machine {}", key.name))
                    .await;
            }
            Err(e) => {
                self.metrics.record(actions::CREATE, "error");
                self.publish_failure(machine, reasons::FAILED_CREATE, actions::CREATE, e).await;
            }
        }
        result
    }

    async fn try_create(&self, key: &MachineKey, machine: &Machine) -> Result<(), ActuatorError> {
        let config = self.decode_config(key, machine)?;
        let request = DomainRequest::from_config(&key.namespace, &key.name, &config)
            .map_err(|e| key.error("invalid machine spec", FailureReason::InvalidConfiguration, e))?;
        let volume = primary_volume_request(&request, &config)
            .map_err(|e| key.error("invalid machine spec", FailureReason::InvalidConfiguration, e))?;

        let client = self
            .clients
            .build(&config.uri, config.pool_name())
            .await
            .map_err(|e| key.error("error creating libvirt client", FailureReason::CreateError, e))?;

        let result = self.create_with_client(key, machine, &client, &config, &request, &volume).await;
        close_client(client.as_ref()).await;
        result
    }

    async fn create_with_client(
        &self,
        key: &MachineKey,
        machine: &Machine,
        client: &Arc<dyn LibvirtClientTrait>,
        config: &LibvirtMachineProviderConfig,
        request: &DomainRequest,
        volume: &VolumeRequest,
    ) -> Result<(), ActuatorError> {
        const MESSAGE: &str = "error creating libvirt machine";

        if let Some(network) = &request.network {
            NetworkIdentity::new(client.as_ref(), &self.leases)
                .load_leases(&network.network)
                .await
                .map_err(|e| key.error(MESSAGE, FailureReason::CreateError, e))?;
        }

        let volumes = VolumeManager::new(Arc::clone(client), self.locks.clone(), self.retry);
        volumes
            .create_volume(volume)
            .await
            .map_err(|e| key.error(MESSAGE, create_reason(&e), format!("error creating volume: {e}")))?;

        let builder = DomainBuilder::new(&volumes, self.secrets.as_ref(), &self.leases, &self.settings);
        if let Err(e) = builder.build_and_start(request).await {
            remove_volumes(&volumes, request).await;
            return Err(key.error(MESSAGE, create_reason(&e), format!("error creating domain: {e}")));
        }

        let domain = lookup_domain(client.as_ref(), &request.name)
            .await
            .map_err(|e| key.error(MESSAGE, FailureReason::CreateError, format!("error looking up libvirt machine: {e}")))?;

        self.update_status(machine, client.as_ref(), config, &domain, true)
            .await
            .map_err(|e| key.error("error updating machine status", FailureReason::CreateError, e))
    }

    /// Tear a machine down; a machine without a domain is already gone
    pub async fn delete(&self, machine: &Machine) -> Result<(), ActuatorError> {
        let key = MachineKey::of(machine);
        info!("Deleting machine {}/{}", key.namespace, key.name);

        match self.try_delete(&key, machine).await {
            Ok(true) => {
                self.metrics.record(actions::DELETE, "success");
                self.publish(machine, EventType::Normal, reasons::DELETED, actions::DELETE, format!("Deleted Machine {}", key.name))
                    .await;
                Ok(())
            }
            Ok(false) => {
                self.metrics.record(actions::DELETE, "absent");
                Ok(())
            }
            Err(e) => {
                self.metrics.record(actions::DELETE, "error");
                self.publish_failure(machine, reasons::FAILED_DELETE, actions::DELETE, &e).await;
                Err(e)
            }
        }
    }

    async fn try_delete(&self, key: &MachineKey, machine: &Machine) -> Result<bool, ActuatorError> {
        let config = self.decode_config(key, machine)?;
        let client = self
            .clients
            .build(&config.uri, config.pool_name())
            .await
            .map_err(|e| key.error("error creating libvirt client", FailureReason::DeleteError, e))?;

        let result = self.delete_with_client(key, machine, &client, &config).await;
        close_client(client.as_ref()).await;
        result
    }

    async fn delete_with_client(
        &self,
        key: &MachineKey,
        machine: &Machine,
        client: &Arc<dyn LibvirtClientTrait>,
        config: &LibvirtMachineProviderConfig,
    ) -> Result<bool, ActuatorError> {
        let exists = domain_exists(client.as_ref(), &key.name)
            .await
            .map_err(|e| key.error("error checking domain", FailureReason::DeleteError, e))?;
        if !exists {
            debug!("Domain {} does not exist, nothing to delete", key.name);
            return Ok(false);
        }

        match delete_domain(client.as_ref(), &key.name).await {
            Ok(()) | Err(ProvisionError::DomainNotFound) => {}
            Err(e) => return Err(key.error("error deleting domain", FailureReason::DeleteError, e)),
        }

        for address in machine
            .status
            .iter()
            .flat_map(|s| &s.addresses)
            .filter(|a| a.address_type == NodeAddressType::InternalIP)
        {
            if self.leases.release(&address.address) {
                debug!("Released reserved address {}", address.address);
            }
        }

        let volumes = VolumeManager::new(Arc::clone(client), self.locks.clone(), self.retry);
        let pool = config.pool_name();
        for volume in [
            primary_volume_name(config, &key.name),
            cloud_init_volume_name(&key.name),
            ignition_volume_name(&key.name),
        ] {
            match volumes.delete_volume(pool, &volume).await {
                Ok(()) | Err(ProvisionError::VolumeNotFound) => {}
                Err(e) => {
                    return Err(key.error(
                        "error deleting volume",
                        FailureReason::DeleteError,
                        format!("{volume}: {e}"),
                    ));
                }
            }
        }

        Ok(true)
    }

    /// Refresh the status of an existing machine; the domain itself is left as is
    pub async fn update(&self, machine: &Machine) -> Result<(), ActuatorError> {
        let key = MachineKey::of(machine);
        info!("Updating machine {}/{}", key.namespace, key.name);

        let config = self.decode_config(&key, machine)?;
        let client = self
            .clients
            .build(&config.uri, config.pool_name())
            .await
            .map_err(|e| key.error("error creating libvirt client", FailureReason::UpdateError, e))?;

        let result = async {
            let domain = lookup_domain(client.as_ref(), &key.name)
                .await
                .map_err(|e| key.error("failed to look up domain by name", FailureReason::UpdateError, e))?;
            self.update_status(machine, client.as_ref(), &config, &domain, false)
                .await
                .map_err(|e| key.error("error updating machine status", FailureReason::UpdateError, e))
        }
        .await;
        close_client(client.as_ref()).await;

        self.metrics
            .record(actions::UPDATE, if result.is_ok() { "success" } else { "error" });
        result
    }

    /// Whether the domain of a machine exists
    pub async fn exists(&self, machine: &Machine) -> Result<bool, ActuatorError> {
        let key = MachineKey::of(machine);
        debug!("Checking if machine {}/{} exists", key.namespace, key.name);

        let config = self.decode_config(&key, machine)?;
        let client = self
            .clients
            .build(&config.uri, config.pool_name())
            .await
            .map_err(|e| key.error("error creating libvirt client", FailureReason::UpdateError, e))?;

        let result = domain_exists(client.as_ref(), &key.name)
            .await
            .map_err(|e| key.error("error checking domain", FailureReason::UpdateError, e));
        close_client(client.as_ref()).await;
        result
    }

    fn decode_config(&self, key: &MachineKey, machine: &Machine) -> Result<LibvirtMachineProviderConfig, ActuatorError> {
        self.codec.decode_provider_config(&machine.spec.provider_spec).map_err(|e| {
            key.error(
                "error getting machineProviderConfig from spec",
                FailureReason::InvalidConfiguration,
                e,
            )
        })
    }

    /// Record the domain's identity, power state and addresses in the machine status.
    ///
    /// Nothing is written when the result equals the current status.
    async fn update_status(
        &self,
        machine: &Machine,
        client: &dyn LibvirtClientTrait,
        config: &LibvirtMachineProviderConfig,
        domain: &Domain,
        created: bool,
    ) -> Result<(), BoxError> {
        let current = machine.status.clone().unwrap_or_default();
        let now = Utc::now();

        let mut provider_status = self.codec.decode_provider_status(current.provider_status.as_ref())?;
        provider_status.instance_id = Some(domain.uuid.clone());
        let state = client.domain_state(&domain.name).await?;
        provider_status.instance_state = Some(domain_state_string(state).to_string());
        if created {
            provider_status.set_condition(
                ConditionType::MachineCreated,
                ConditionStatus::True,
                CREATED_REASON,
                CREATED_MESSAGE,
                now,
            );
        }

        let mut addresses = node_addresses(client, &domain.name).await?;
        if let Some(network) = config.network_interface_name.as_deref().filter(|n| !n.is_empty()) {
            if let Some(ip) = addresses.first().map(|a| a.address.clone()) {
                let hostname = lookup_hostname_by_lease(client, network, &ip).await?;
                if !hostname.is_empty() {
                    addresses.push(NodeAddress::hostname(hostname));
                }
            }
        }

        let desired = MachineStatus {
            addresses,
            provider_status: Some(self.codec.encode_provider_status(&provider_status)?),
            last_updated: current.last_updated,
        };
        if desired == current {
            debug!("Machine {} status is unchanged", domain.name);
            return Ok(());
        }

        info!("Machine {} status has changed, updating", domain.name);
        let mut updated = machine.clone();
        updated.status = Some(MachineStatus {
            last_updated: Some(now),
            ..desired
        });
        self.status.update_status(&updated).await?;
        Ok(())
    }

    async fn publish(&self, machine: &Machine, type_: EventType, reason: &str, action: &str, note: String) {
        self.events
            .publish(&machine.object_ref(&()), type_, reason, action, note)
            .await;
    }

    async fn publish_failure(&self, machine: &Machine, reason: &str, action: &str, err: &ActuatorError) {
        let note = err.reason().map_or_else(|| err.to_string(), |r| r.as_str().to_string());
        self.publish(machine, EventType::Warning, reason, action, note).await;
    }
}

/// Spec problems found while provisioning are configuration errors
fn create_reason(err: &ProvisionError) -> FailureReason {
    if err.is_invalid_config() {
        FailureReason::InvalidConfiguration
    } else {
        FailureReason::CreateError
    }
}

fn primary_volume_name(config: &LibvirtMachineProviderConfig, machine: &str) -> String {
    config
        .volume
        .as_ref()
        .and_then(|v| v.volume_name.clone())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| machine.to_string())
}

fn primary_volume_request(
    request: &DomainRequest,
    config: &LibvirtMachineProviderConfig,
) -> Result<VolumeRequest, crds::CodecError> {
    let volume = config.volume.as_ref();
    Ok(VolumeRequest {
        name: request.volume_name.clone(),
        pool: request.pool.clone(),
        base_volume: volume.and_then(|v| v.base_volume_id.clone()).filter(|b| !b.is_empty()),
        source: None,
        size: volume.map(crds::Volume::size_bytes).transpose()?.flatten(),
        format: Some(VOLUME_FORMAT.to_string()),
    })
}

/// Best-effort removal of the volumes a failed create may have left behind
async fn remove_volumes(volumes: &VolumeManager, request: &DomainRequest) {
    for volume in [
        request.volume_name.clone(),
        cloud_init_volume_name(&request.name),
        ignition_volume_name(&request.name),
    ] {
        match volumes.delete_volume(&request.pool, &volume).await {
            Ok(()) => info!("Removed volume {} after failed create", volume),
            Err(ProvisionError::VolumeNotFound) => {}
            Err(e) => error!("error cleaning up volume {}: {}", volume, e),
        }
    }
}

async fn close_client(client: &dyn LibvirtClientTrait) {
    if let Err(e) = client.close().await {
        warn!("error closing libvirt client {}: {}", client.uri(), e);
    }
}
