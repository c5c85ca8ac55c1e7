//! Mock libvirt client for unit testing
//!
//! This module provides an in-memory implementation of `LibvirtClientTrait`
//! that can be used in unit tests without a hypervisor.
//!
//! The mock is organized into domain-specific modules:
//! - `domains.rs` - domain definition, power state and interface addresses
//! - `storage.rs` - pools and volumes, including uploads
//! - `network.rs` - network XML, DHCP host entries and leases
//! - `helpers.rs` - lock and XML extraction helpers

mod domains;
mod helpers;
mod network;
mod storage;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::LibvirtError;
use crate::libvirt_trait::LibvirtClientTrait;
use crate::types::*;
use helpers::lock;

/// Host capabilities of an x86_64 KVM host
pub const X86_64_CAPABILITIES: &str = r"<capabilities>
  <host>
    <uuid>2c6f1e8a-6d47-4f3c-9a3e-0c1b2d3e4f50</uuid>
    <cpu>
      <arch>x86_64</arch>
    </cpu>
  </host>
  <guest>
    <os_type>hvm</os_type>
    <arch name='x86_64'>
      <wordsize>64</wordsize>
      <emulator>/usr/bin/qemu-system-x86_64</emulator>
      <machine maxCpus='255'>pc-i440fx-8.2</machine>
      <machine canonical='pc-i440fx-8.2' maxCpus='255'>pc</machine>
      <machine maxCpus='288'>pc-q35-8.2</machine>
      <machine canonical='pc-q35-8.2' maxCpus='288'>q35</machine>
      <domain type='qemu'/>
      <domain type='kvm'/>
    </arch>
  </guest>
</capabilities>
";

/// Host capabilities of an s390x KVM host
pub const S390X_CAPABILITIES: &str = r"<capabilities>
  <host>
    <uuid>7d0e4b1c-2f6a-4e59-8c3d-9a8b7c6d5e4f</uuid>
    <cpu>
      <arch>s390x</arch>
    </cpu>
  </host>
  <guest>
    <os_type>hvm</os_type>
    <arch name='s390x'>
      <wordsize>64</wordsize>
      <emulator>/usr/bin/qemu-system-s390x</emulator>
      <machine maxCpus='248'>s390-ccw-virtio-8.2</machine>
      <machine canonical='s390-ccw-virtio-8.2' maxCpus='248'>s390-ccw-virtio</machine>
      <domain type='qemu'/>
      <domain type='kvm'/>
    </arch>
  </guest>
</capabilities>
";

/// Produces the error returned by an injected failure
pub type FailureFn = Arc<dyn Fn() -> LibvirtError + Send + Sync>;

#[derive(Debug, Clone)]
pub(crate) struct MockDomain {
    pub(crate) uuid: String,
    pub(crate) xml: String,
    pub(crate) state: DomainState,
    pub(crate) autostart: bool,
    pub(crate) interfaces: Vec<DomainInterface>,
}

#[derive(Debug, Clone)]
pub(crate) struct MockVolume {
    pub(crate) volume: StorageVolume,
    pub(crate) xml: String,
    pub(crate) content: Option<Vec<u8>>,
}

/// A static DHCP host entry of a mock network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHost {
    /// MAC address
    pub mac: String,
    /// Hostname
    pub name: String,
    /// Reserved address
    pub ip: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockNetwork {
    pub(crate) xml: String,
    pub(crate) hosts: Vec<NetworkHost>,
    pub(crate) leases: Vec<DhcpLease>,
}

/// Mock libvirt client for testing
///
/// Clones share state, so a test can keep a handle for inspection while the
/// code under test owns another.
#[derive(Clone)]
pub struct MockLibvirtClient {
    pub(crate) uri: String,
    pub(crate) capabilities: Arc<Mutex<String>>,
    pub(crate) domains: Arc<Mutex<HashMap<String, MockDomain>>>,
    pub(crate) pools: Arc<Mutex<HashMap<String, HashMap<String, MockVolume>>>>,
    pub(crate) networks: Arc<Mutex<HashMap<String, MockNetwork>>>,
    pub(crate) nvram_unsupported: Arc<Mutex<bool>>,
    failures: Arc<Mutex<HashMap<String, FailureFn>>>,
    calls: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<usize>>,
}

impl MockLibvirtClient {
    /// Create a mock connected to `uri` with x86_64 capabilities and no pools
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            capabilities: Arc::new(Mutex::new(X86_64_CAPABILITIES.to_string())),
            domains: Arc::new(Mutex::new(HashMap::new())),
            pools: Arc::new(Mutex::new(HashMap::new())),
            networks: Arc::new(Mutex::new(HashMap::new())),
            nvram_unsupported: Arc::new(Mutex::new(false)),
            failures: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(0)),
        }
    }

    /// Replace the host capabilities XML (for test setup)
    pub fn set_capabilities(&self, xml: impl Into<String>) {
        *lock(&self.capabilities) = xml.into();
    }

    /// Add an empty storage pool (for test setup)
    pub fn add_pool(&self, pool: &str) {
        lock(&self.pools).entry(pool.to_string()).or_default();
    }

    /// Add an existing volume (for test setup)
    pub fn add_volume(&self, pool: &str, name: &str, capacity: u64, allocation: u64, format: &str) -> StorageVolume {
        let volume = storage::new_volume(pool, name, capacity, allocation);
        let xml = format!(
            "<volume type=\"file\">\n  <name>{name}</name>\n  <key>{key}</key>\n  <capacity unit=\"bytes\">{capacity}</capacity>\n  <allocation unit=\"bytes\">{allocation}</allocation>\n  <target>\n    <path>{path}</path>\n    <format type=\"{format}\"/>\n  </target>\n</volume>\n",
            key = volume.key,
            path = volume.path,
        );
        lock(&self.pools).entry(pool.to_string()).or_default().insert(
            name.to_string(),
            MockVolume {
                volume: volume.clone(),
                xml,
                content: None,
            },
        );
        volume
    }

    /// Add a network with the given XML (for test setup)
    pub fn add_network(&self, name: &str, xml: impl Into<String>) {
        lock(&self.networks).insert(
            name.to_string(),
            MockNetwork {
                xml: xml.into(),
                ..Default::default()
            },
        );
    }

    /// Add a DHCP lease to a network (for test setup)
    pub fn add_lease(&self, network: &str, lease: DhcpLease) {
        lock(&self.networks).entry(network.to_string()).or_default().leases.push(lease);
    }

    /// Set the interface addresses reported for a domain (for test setup)
    pub fn set_domain_interfaces(&self, name: &str, interfaces: Vec<DomainInterface>) {
        if let Some(domain) = lock(&self.domains).get_mut(name) {
            domain.interfaces = interfaces;
        }
    }

    /// Force the power state of a domain (for test setup)
    pub fn set_domain_state(&self, name: &str, state: DomainState) {
        if let Some(domain) = lock(&self.domains).get_mut(name) {
            domain.state = state;
        }
    }

    /// Reject `undefine --nvram` the way drivers without NVRAM support do
    pub fn set_nvram_unsupported(&self, unsupported: bool) {
        *lock(&self.nvram_unsupported) = unsupported;
    }

    /// Make every call of `operation` (a trait method name) fail
    pub fn fail_on(&self, operation: &str, failure: impl Fn() -> LibvirtError + Send + Sync + 'static) {
        lock(&self.failures).insert(operation.to_string(), Arc::new(failure));
    }

    /// Remove an injected failure
    pub fn clear_failure(&self, operation: &str) {
        lock(&self.failures).remove(operation);
    }

    /// Calls made so far, as `"<method> <first argument>"`
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Number of calls to `close`
    pub fn close_count(&self) -> usize {
        *lock(&self.closed)
    }

    /// Whether a domain with `name` is defined
    pub fn has_domain(&self, name: &str) -> bool {
        lock(&self.domains).contains_key(name)
    }

    /// XML a domain was defined with
    pub fn domain_xml(&self, name: &str) -> Option<String> {
        lock(&self.domains).get(name).map(|d| d.xml.clone())
    }

    /// Autostart flag of a domain
    pub fn domain_autostart(&self, name: &str) -> Option<bool> {
        lock(&self.domains).get(name).map(|d| d.autostart)
    }

    /// Names of the domains currently defined
    pub fn domain_names(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.domains).keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of the volumes in a pool, sorted
    pub fn volume_names(&self, pool: &str) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.pools)
            .get(pool)
            .map(|vols| vols.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// XML a volume was created with
    pub fn stored_volume_xml(&self, pool: &str, name: &str) -> Option<String> {
        lock(&self.pools).get(pool)?.get(name).map(|v| v.xml.clone())
    }

    /// Bytes uploaded into a volume
    pub fn uploaded(&self, pool: &str, name: &str) -> Option<Vec<u8>> {
        lock(&self.pools).get(pool)?.get(name)?.content.clone()
    }

    /// Static DHCP host entries of a network
    pub fn network_hosts(&self, network: &str) -> Vec<NetworkHost> {
        lock(&self.networks)
            .get(network)
            .map(|n| n.hosts.clone())
            .unwrap_or_default()
    }

    fn record(&self, operation: &str, subject: &str) -> Result<(), LibvirtError> {
        lock(&self.calls).push(format!("{operation} {subject}").trim_end().to_string());
        match lock(&self.failures).get(operation) {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl LibvirtClientTrait for MockLibvirtClient {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn close(&self) -> Result<(), LibvirtError> {
        *lock(&self.closed) += 1;
        self.record("close", "")
    }

    async fn capabilities(&self) -> Result<String, LibvirtError> {
        self.record("capabilities", "")?;
        Ok(lock(&self.capabilities).clone())
    }

    // Domains - delegated to domains module
    async fn define_domain(&self, xml: &str) -> Result<Domain, LibvirtError> {
        self.record("define_domain", "")?;
        domains::define_domain(self, xml)
    }

    async fn lookup_domain(&self, name: &str) -> Result<Domain, LibvirtError> {
        self.record("lookup_domain", name)?;
        domains::lookup_domain(self, name)
    }

    async fn domain_state(&self, name: &str) -> Result<DomainState, LibvirtError> {
        self.record("domain_state", name)?;
        domains::domain_state(self, name)
    }

    async fn set_autostart(&self, name: &str, autostart: bool) -> Result<(), LibvirtError> {
        self.record("set_autostart", name)?;
        domains::set_autostart(self, name, autostart)
    }

    async fn start_domain(&self, name: &str) -> Result<(), LibvirtError> {
        self.record("start_domain", name)?;
        domains::start_domain(self, name)
    }

    async fn destroy_domain(&self, name: &str) -> Result<(), LibvirtError> {
        self.record("destroy_domain", name)?;
        domains::destroy_domain(self, name)
    }

    async fn undefine_domain(&self, name: &str, flags: UndefineFlags) -> Result<(), LibvirtError> {
        self.record("undefine_domain", name)?;
        domains::undefine_domain(self, name, flags)
    }

    async fn domain_interface_addresses(
        &self,
        name: &str,
        source: AddressSource,
    ) -> Result<Vec<DomainInterface>, LibvirtError> {
        self.record("domain_interface_addresses", name)?;
        domains::interface_addresses(self, name, source)
    }

    // Storage - delegated to storage module
    async fn lookup_pool(&self, pool: &str) -> Result<StoragePool, LibvirtError> {
        self.record("lookup_pool", pool)?;
        storage::lookup_pool(self, pool)
    }

    async fn refresh_pool(&self, pool: &str) -> Result<(), LibvirtError> {
        self.record("refresh_pool", pool)?;
        storage::lookup_pool(self, pool).map(|_| ())
    }

    async fn lookup_volume(&self, pool: &str, name: &str) -> Result<StorageVolume, LibvirtError> {
        self.record("lookup_volume", name)?;
        storage::lookup_volume(self, pool, name)
    }

    async fn lookup_volume_by_key(&self, key: &str) -> Result<StorageVolume, LibvirtError> {
        self.record("lookup_volume_by_key", key)?;
        storage::lookup_volume_by_key(self, key)
    }

    async fn volume_xml(&self, volume: &StorageVolume) -> Result<String, LibvirtError> {
        self.record("volume_xml", &volume.name)?;
        storage::volume_xml(self, volume)
    }

    async fn create_volume(&self, pool: &str, xml: &str) -> Result<StorageVolume, LibvirtError> {
        self.record("create_volume", pool)?;
        storage::create_volume(self, pool, xml)
    }

    async fn delete_volume(&self, volume: &StorageVolume) -> Result<(), LibvirtError> {
        self.record("delete_volume", &volume.name)?;
        storage::delete_volume(self, volume)
    }

    async fn upload_volume(&self, volume: &StorageVolume, source: &Path, length: u64) -> Result<(), LibvirtError> {
        self.record("upload_volume", &volume.name)?;
        storage::upload_volume(self, volume, source, length).await
    }

    // Networks - delegated to network module
    async fn network_xml(&self, network: &str) -> Result<String, LibvirtError> {
        self.record("network_xml", network)?;
        network::network_xml(self, network)
    }

    async fn update_network(
        &self,
        network: &str,
        command: NetworkUpdateCommand,
        section: NetworkSection,
        xml: &str,
    ) -> Result<(), LibvirtError> {
        self.record("update_network", network)?;
        network::update_network(self, network, command, section, xml)
    }

    async fn network_dhcp_leases(&self, network: &str) -> Result<Vec<DhcpLease>, LibvirtError> {
        self.record("network_dhcp_leases", network)?;
        network::dhcp_leases(self, network)
    }
}
