//! LibvirtClient trait for mocking
//!
//! This trait is the capability boundary between the provisioning engine and
//! libvirt. The virsh-backed client implements it, and tests use the
//! in-memory mock.

use std::path::Path;

use crate::error::LibvirtError;
use crate::types::*;

/// Trait for libvirt hypervisor operations
///
/// Every call is a single libvirt request; sequencing and retries belong to
/// the caller. All async methods must be `Send` to work with Tokio's
/// work-stealing runtime.
#[async_trait::async_trait]
pub trait LibvirtClientTrait: Send + Sync {
    /// Connection URI this client talks to
    fn uri(&self) -> &str;

    /// Release the connection
    async fn close(&self) -> Result<(), LibvirtError>;

    /// Host capabilities XML
    async fn capabilities(&self) -> Result<String, LibvirtError>;

    // Domains
    async fn define_domain(&self, xml: &str) -> Result<Domain, LibvirtError>;
    async fn lookup_domain(&self, name: &str) -> Result<Domain, LibvirtError>;
    async fn domain_state(&self, name: &str) -> Result<DomainState, LibvirtError>;
    async fn set_autostart(&self, name: &str, autostart: bool) -> Result<(), LibvirtError>;
    async fn start_domain(&self, name: &str) -> Result<(), LibvirtError>;
    async fn destroy_domain(&self, name: &str) -> Result<(), LibvirtError>;
    async fn undefine_domain(&self, name: &str, flags: UndefineFlags) -> Result<(), LibvirtError>;
    async fn domain_interface_addresses(
        &self,
        name: &str,
        source: AddressSource,
    ) -> Result<Vec<DomainInterface>, LibvirtError>;

    // Storage
    async fn lookup_pool(&self, pool: &str) -> Result<StoragePool, LibvirtError>;
    async fn refresh_pool(&self, pool: &str) -> Result<(), LibvirtError>;
    async fn lookup_volume(&self, pool: &str, name: &str) -> Result<StorageVolume, LibvirtError>;
    async fn lookup_volume_by_key(&self, key: &str) -> Result<StorageVolume, LibvirtError>;
    async fn volume_xml(&self, volume: &StorageVolume) -> Result<String, LibvirtError>;
    async fn create_volume(&self, pool: &str, xml: &str) -> Result<StorageVolume, LibvirtError>;
    async fn delete_volume(&self, volume: &StorageVolume) -> Result<(), LibvirtError>;

    /// Upload exactly `length` bytes from `source` into `volume`
    async fn upload_volume(&self, volume: &StorageVolume, source: &Path, length: u64) -> Result<(), LibvirtError>;

    // Networks
    async fn network_xml(&self, network: &str) -> Result<String, LibvirtError>;
    async fn update_network(
        &self,
        network: &str,
        command: NetworkUpdateCommand,
        section: NetworkSection,
        xml: &str,
    ) -> Result<(), LibvirtError>;
    async fn network_dhcp_leases(&self, network: &str) -> Result<Vec<DhcpLease>, LibvirtError>;
}
