//! Provisioning engine for libvirt machines
//!
//! Turns a validated machine request into hypervisor objects: the primary
//! volume, the bootstrap artifact, the network identity and the running
//! domain. Every hypervisor call goes through
//! [`libvirt_client::LibvirtClientTrait`], so the whole engine runs against
//! the in-memory mock in tests.
//!
//! # Example
//!
//! ```no_run
//! use libvirt_client::{ClientBuilder, VirshClientBuilder};
//! use provisioner::{
//!     DomainBuilder, DomainRequest, DomainSettings, PoolLocks, ReservedLeases, RetryPolicy, SecretStore,
//!     VolumeManager, VolumeRequest,
//! };
//!
//! # async fn example(
//! #     config: crds::LibvirtMachineProviderConfig,
//! #     secrets: &dyn SecretStore,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let request = DomainRequest::from_config("default", "worker-0", &config)?;
//! let client = VirshClientBuilder::new().build(&config.uri, config.pool_name()).await?;
//! let volumes = VolumeManager::new(client, PoolLocks::new(), RetryPolicy::default());
//!
//! volumes
//!     .create_volume(&VolumeRequest {
//!         name: request.volume_name.clone(),
//!         pool: request.pool.clone(),
//!         base_volume: Some("coreos_base".to_string()),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! let leases = ReservedLeases::new();
//! let settings = DomainSettings::default();
//! let domain = DomainBuilder::new(&volumes, secrets, &leases, &settings)
//!     .build_and_start(&request)
//!     .await?;
//! println!("started {}", domain.uuid);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Copy-on-write volumes**: machine disks layered on a shared base image
//! - **Bootstrap**: Ignition through fw_cfg, a virtio disk or guestfish; cloud-init ISOs
//! - **Static DHCP**: per-process reserved address set with atomic allocation
//! - **test-util**: `MemorySecretStore`, an in-memory secret store

pub mod bootstrap;
pub mod capabilities;
pub mod cidr;
pub mod domain;
pub mod error;
pub mod image;
pub mod leases;
pub mod network;
pub mod pool_lock;
pub mod retry;
pub mod secrets;
pub mod volume;
pub mod xml;

pub use bootstrap::{BootstrapPlan, BootstrapSettings, cloud_init_volume_name, ignition_volume_name};
pub use bootstrap::guestfish::GuestfishSettings;
pub use bootstrap::ignition::RestrictedIgnition;
pub use cidr::Cidr;
pub use domain::{
    DEFAULT_DOMAIN_TYPE, DomainBuilder, DomainDef, DomainRequest, DomainSettings, delete_domain, domain_exists,
    domain_state_string, lookup_domain, node_addresses,
};
pub use error::ProvisionError;
pub use leases::ReservedLeases;
pub use network::{NetworkIdentity, NetworkRequest, lookup_hostname_by_lease};
pub use pool_lock::PoolLocks;
pub use retry::RetryPolicy;
#[cfg(any(test, feature = "test-util"))]
pub use secrets::MemorySecretStore;
pub use secrets::SecretStore;
pub use volume::{DEFAULT_VOLUME_SIZE, VolumeManager, VolumeRequest};
