//! Domain builder
//!
//! Assembles a domain definition from the host capabilities, the machine's
//! primary volume, its bootstrap artifact and its network interface, then
//! defines, configures and starts it.

use crds::{LibvirtMachineProviderConfig, NodeAddress, Nvram};
use libvirt_client::{AddressSource, Domain, DomainState, LibvirtClientTrait, LibvirtError, UndefineFlags};
use tracing::{debug, info, warn};

use crate::bootstrap::{BootstrapInjector, BootstrapPlan, BootstrapSettings, BootstrapTarget};
use crate::capabilities::{HostCapabilities, is_restricted_arch};
use crate::error::{LibvirtResultExt, ProvisionError};
use crate::leases::ReservedLeases;
use crate::network::{NetworkIdentity, NetworkRequest};
use crate::secrets::SecretStore;
use crate::volume::VolumeManager;
use crate::xml::XmlWriter;

/// Domain type used unless configured otherwise
pub const DEFAULT_DOMAIN_TYPE: &str = "kvm";

const OS_TYPE: &str = "hvm";
const DEFAULT_MEMORY_MIB: u64 = 512;
const CPU_MODE: &str = "host-passthrough";
const GUEST_AGENT_CHANNEL: &str = "org.qemu.guest_agent.0";
const QEMU_NAMESPACE: &str = "http://libvirt.org/schemas/domain/qemu/1.0";

/// Disk letter suffix for the disk at `index`: `a`..`z`, then `aa`, `ab`, ...
pub fn disk_letter(index: usize) -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

    let q = index / LETTERS.len();
    let letter = char::from(LETTERS[index % LETTERS.len()]);
    if q == 0 {
        letter.to_string()
    } else {
        format!("{}{letter}", disk_letter(q - 1))
    }
}

/// A file-backed disk or cdrom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    /// `disk` or `cdrom`
    pub device: String,
    /// Path of the backing file
    pub source: String,
    /// Guest device name
    pub target_dev: String,
    /// Guest bus
    pub target_bus: String,
    /// qemu driver format
    pub driver_type: String,
    /// Attached read-only
    pub readonly: bool,
    /// Serial reported to the guest
    pub serial: Option<String>,
}

impl Disk {
    /// qcow2 virtio disk at position `index`
    pub fn virtio(index: usize, path: impl Into<String>) -> Self {
        Self {
            device: "disk".to_string(),
            source: path.into(),
            target_dev: format!("vd{}", disk_letter(index)),
            target_bus: "virtio".to_string(),
            driver_type: "qcow2".to_string(),
            readonly: false,
            serial: None,
        }
    }

    /// Read-only raw disk the guest finds Ignition on by its serial
    pub fn ignition(path: impl Into<String>) -> Self {
        Self {
            driver_type: "raw".to_string(),
            readonly: true,
            serial: Some("ignition".to_string()),
            ..Self::virtio(1, path)
        }
    }

    /// IDE cdrom holding a raw ISO
    pub fn cdrom(path: impl Into<String>) -> Self {
        Self {
            device: "cdrom".to_string(),
            source: path.into(),
            target_dev: "hdd".to_string(),
            target_bus: "ide".to_string(),
            driver_type: "raw".to_string(),
            readonly: false,
            serial: None,
        }
    }

    fn write(&self, w: &mut XmlWriter) -> Result<(), ProvisionError> {
        w.start_element("disk", &[("type", "file"), ("device", &self.device)])?;
        w.write_empty_element("driver", &[("name", "qemu"), ("type", &self.driver_type)])?;
        w.write_empty_element("source", &[("file", &self.source)])?;
        w.write_empty_element("target", &[("dev", &self.target_dev), ("bus", &self.target_bus)])?;
        if self.readonly {
            w.write_empty_element("readonly", &[])?;
        }
        if let Some(serial) = &self.serial {
            w.write_text_element("serial", serial)?;
        }
        w.end_element("disk")
    }
}

/// A virtio interface on a libvirt network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// Network name
    pub network: String,
    /// MAC address
    pub mac: String,
}

impl Interface {
    fn write(&self, w: &mut XmlWriter) -> Result<(), ProvisionError> {
        w.start_element("interface", &[("type", "network")])?;
        w.write_empty_element("mac", &[("address", &self.mac)])?;
        w.write_empty_element("source", &[("network", &self.network)])?;
        w.write_empty_element("model", &[("type", "virtio")])?;
        w.end_element("interface")
    }
}

/// In-memory domain definition, rendered to XML once complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDef {
    /// Domain name
    pub name: String,
    /// Hypervisor type (`kvm`, `qemu`)
    pub domain_type: String,
    /// Memory in MiB
    pub memory_mib: u64,
    /// Virtual CPUs
    pub vcpu: u32,
    /// vCPU placement
    pub vcpu_placement: Option<String>,
    /// OS type
    pub os_type: String,
    /// Guest architecture
    pub arch: Option<String>,
    /// Canonical machine type
    pub machine: Option<String>,
    /// Emulator binary
    pub emulator: Option<String>,
    /// UEFI loader
    pub loader: Option<String>,
    /// UEFI variable store
    pub nvram: Option<Nvram>,
    /// CPU mode
    pub cpu_mode: Option<String>,
    /// Disks, primary first
    pub disks: Vec<Disk>,
    /// Network interfaces
    pub interfaces: Vec<Interface>,
    /// SPICE graphics
    pub graphics: bool,
    /// Extra qemu command line arguments
    pub qemu_args: Vec<String>,
}

impl DomainDef {
    /// Definition with the built-in defaults
    pub fn new(name: impl Into<String>, domain_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain_type: domain_type.into(),
            memory_mib: DEFAULT_MEMORY_MIB,
            vcpu: 1,
            vcpu_placement: Some("static".to_string()),
            os_type: OS_TYPE.to_string(),
            arch: None,
            machine: None,
            emulator: None,
            loader: None,
            nvram: None,
            cpu_mode: None,
            disks: Vec::new(),
            interfaces: Vec::new(),
            graphics: true,
            qemu_args: Vec::new(),
        }
    }

    /// Defaults completed with the host's architecture, emulator and machine type
    pub fn for_host(caps: &HostCapabilities, domain_type: &str) -> Result<Self, ProvisionError> {
        let mut def = Self::new(String::new(), domain_type);
        let arch = caps.arch();
        let guest = caps.guest(OS_TYPE, arch)?;
        let first_machine = guest.arch.machines.first().map(|m| m.name.as_str()).unwrap_or_default();

        def.machine = Some(caps.canonical_machine(OS_TYPE, arch, first_machine)?);
        def.emulator.clone_from(&guest.arch.emulator);
        def.graphics = !is_restricted_arch(arch);
        def.arch = Some(arch.to_string());
        Ok(def)
    }

    /// Apply the machine's identity, sizing and firmware
    pub fn init(&mut self, request: &DomainRequest) -> Result<(), ProvisionError> {
        validate_identity(&request.name, request.memory_mib, request.vcpu)?;
        self.name.clone_from(&request.name);
        self.memory_mib = request.memory_mib;
        self.vcpu = request.vcpu;
        self.vcpu_placement = None;
        self.cpu_mode = Some(CPU_MODE.to_string());

        if let Some(firmware) = request.firmware.as_ref().filter(|f| !f.is_empty()) {
            self.loader = Some(firmware.clone());
            self.nvram.clone_from(&request.nvram);
        }
        Ok(())
    }

    /// Render the `<domain>` document
    pub fn to_xml(&self) -> Result<String, ProvisionError> {
        let memory = self.memory_mib.to_string();
        let vcpu = self.vcpu.to_string();
        let mut w = XmlWriter::new();

        let mut root = vec![("type", self.domain_type.as_str())];
        if !self.qemu_args.is_empty() {
            root.push(("xmlns:qemu", QEMU_NAMESPACE));
        }
        w.start_element("domain", &root)?;
        w.write_text_element("name", &self.name)?;
        w.write_text_element_with_attrs("memory", &memory, &[("unit", "MiB")])?;
        match &self.vcpu_placement {
            Some(placement) => w.write_text_element_with_attrs("vcpu", &vcpu, &[("placement", placement)])?,
            None => w.write_text_element("vcpu", &vcpu)?,
        }

        w.start_element("os", &[])?;
        let mut os_type = Vec::new();
        if let Some(arch) = &self.arch {
            os_type.push(("arch", arch.as_str()));
        }
        if let Some(machine) = &self.machine {
            os_type.push(("machine", machine.as_str()));
        }
        w.write_text_element_with_attrs("type", &self.os_type, &os_type)?;
        if let Some(loader) = &self.loader {
            w.write_text_element_with_attrs(
                "loader",
                loader,
                &[("readonly", "yes"), ("type", "pflash"), ("secure", "no")],
            )?;
            if let Some(nvram) = &self.nvram {
                match &nvram.template {
                    Some(template) => w.write_text_element_with_attrs("nvram", &nvram.file, &[("template", template)])?,
                    None => w.write_text_element("nvram", &nvram.file)?,
                }
            }
        }
        w.end_element("os")?;

        w.start_element("features", &[])?;
        w.write_empty_element("pae", &[])?;
        w.write_empty_element("acpi", &[])?;
        w.write_empty_element("apic", &[])?;
        w.end_element("features")?;

        if let Some(mode) = &self.cpu_mode {
            w.write_empty_element("cpu", &[("mode", mode)])?;
        }

        w.start_element("devices", &[])?;
        if let Some(emulator) = &self.emulator {
            w.write_text_element("emulator", emulator)?;
        }
        for disk in &self.disks {
            disk.write(&mut w)?;
        }
        for interface in &self.interfaces {
            interface.write(&mut w)?;
        }
        w.start_element("channel", &[("type", "unix")])?;
        w.write_empty_element("target", &[("type", "virtio"), ("name", GUEST_AGENT_CHANNEL)])?;
        w.end_element("channel")?;
        w.start_element("rng", &[("model", "virtio")])?;
        w.write_text_element_with_attrs("backend", "/dev/urandom", &[("model", "random")])?;
        w.end_element("rng")?;
        w.start_element("console", &[("type", "pty")])?;
        w.write_empty_element("target", &[("type", "virtio"), ("port", "0")])?;
        w.end_element("console")?;
        if self.graphics {
            w.write_empty_element("graphics", &[("type", "spice"), ("autoport", "yes")])?;
        }
        w.end_element("devices")?;

        if !self.qemu_args.is_empty() {
            w.start_element("qemu:commandline", &[])?;
            for arg in &self.qemu_args {
                w.write_empty_element("qemu:arg", &[("value", arg)])?;
            }
            w.end_element("qemu:commandline")?;
        }

        w.end_element("domain")?;
        w.into_string()
    }
}

fn validate_identity(name: &str, memory_mib: u64, vcpu: u32) -> Result<(), ProvisionError> {
    if name.is_empty() {
        return Err(ProvisionError::config("machine does not have an name set"));
    }
    if memory_mib == 0 {
        return Err(ProvisionError::config("machine does not have an DomainMemory set"));
    }
    if vcpu == 0 {
        return Err(ProvisionError::config("machine does not have an DomainVcpu set"));
    }
    Ok(())
}

/// Everything needed to build one machine's domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRequest {
    /// Namespace of the machine
    pub namespace: String,
    /// Machine and domain name
    pub name: String,
    /// Memory in MiB
    pub memory_mib: u64,
    /// Virtual CPUs
    pub vcpu: u32,
    /// Pool of the primary and auxiliary volumes
    pub pool: String,
    /// Name of the primary volume
    pub volume_name: String,
    /// Bootstrap source
    pub bootstrap: BootstrapPlan,
    /// Network interface, if any
    pub network: Option<NetworkRequest>,
    /// Start with the host
    pub autostart: bool,
    /// UEFI loader
    pub firmware: Option<String>,
    /// UEFI variable store
    pub nvram: Option<Nvram>,
}

impl DomainRequest {
    /// Validate a provider config and turn it into a build request.
    ///
    /// Fails with `InvalidConfig` before anything touches the hypervisor.
    pub fn from_config(
        namespace: &str,
        name: &str,
        config: &LibvirtMachineProviderConfig,
    ) -> Result<Self, ProvisionError> {
        validate_identity(name, config.domain_memory, config.domain_vcpu)?;
        let bootstrap = BootstrapPlan::select(config)?;

        let network = match config.network_interface_name.as_deref().filter(|n| !n.is_empty()) {
            Some(network) => Some(NetworkRequest {
                network: network.to_string(),
                hostname: config
                    .network_interface_hostname
                    .clone()
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| name.to_string()),
                address_range: config
                    .network_interface_address
                    .as_deref()
                    .filter(|a| !a.is_empty())
                    .map(str::parse)
                    .transpose()?,
            }),
            None => None,
        };

        let volume_name = config
            .volume
            .as_ref()
            .and_then(|v| v.volume_name.clone())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| name.to_string());

        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            memory_mib: config.domain_memory,
            vcpu: config.domain_vcpu,
            pool: config.pool_name().to_string(),
            volume_name,
            bootstrap,
            network,
            autostart: config.autostart,
            firmware: config.firmware.clone(),
            nvram: config.nvram.clone(),
        })
    }
}

/// Settings shared by every build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSettings {
    /// Hypervisor type written into the definition
    pub domain_type: String,
    /// Bootstrap tooling
    pub bootstrap: BootstrapSettings,
}

impl Default for DomainSettings {
    fn default() -> Self {
        Self {
            domain_type: DEFAULT_DOMAIN_TYPE.to_string(),
            bootstrap: BootstrapSettings::default(),
        }
    }
}

/// Builds, defines and starts domains
pub struct DomainBuilder<'a> {
    volumes: &'a VolumeManager,
    secrets: &'a dyn SecretStore,
    leases: &'a ReservedLeases,
    settings: &'a DomainSettings,
}

impl std::fmt::Debug for DomainBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainBuilder")
            .field("volumes", self.volumes)
            .field("settings", self.settings)
            .finish_non_exhaustive()
    }
}

impl<'a> DomainBuilder<'a> {
    /// Builder working through `volumes`' client
    pub fn new(
        volumes: &'a VolumeManager,
        secrets: &'a dyn SecretStore,
        leases: &'a ReservedLeases,
        settings: &'a DomainSettings,
    ) -> Self {
        Self {
            volumes,
            secrets,
            leases,
            settings,
        }
    }

    /// Build the definition for `request`, define it and start the domain.
    ///
    /// The primary volume must already exist. Nothing is rolled back on
    /// failure; auxiliary volumes created on the way stay behind.
    pub async fn build_and_start(&self, request: &DomainRequest) -> Result<Domain, ProvisionError> {
        let client = self.volumes.client();

        let caps_xml = client
            .capabilities()
            .await
            .with_context(|| "Failed to get host capabilities")?;
        let caps = HostCapabilities::parse(&caps_xml)?;
        let mut def = DomainDef::for_host(&caps, &self.settings.domain_type)?;
        def.init(request)?;

        let volume = self.volumes.lookup_volume(&request.pool, &request.volume_name).await?;
        def.disks.push(Disk::virtio(0, volume.path));

        let target = BootstrapTarget {
            namespace: &request.namespace,
            machine: &request.name,
            pool: &request.pool,
            arch: caps.arch(),
        };
        BootstrapInjector::new(self.volumes, self.secrets, &self.settings.bootstrap)
            .apply(&request.bootstrap, target, &mut def)
            .await?;

        if let Some(network) = &request.network {
            let assignment = NetworkIdentity::new(client, self.leases).attach(network).await?;
            def.interfaces.push(assignment.interface);
        }

        let xml = def.to_xml()?;
        info!(domain = %request.name, uri = client.uri(), "Creating libvirt domain");
        debug!("Creating libvirt domain with XML:\n{}", xml);

        let domain = client
            .define_domain(&xml)
            .await
            .with_context(|| "error defining libvirt domain")?;
        client
            .set_autostart(&domain.name, request.autostart)
            .await
            .with_context(|| "error setting Autostart")?;
        client
            .start_domain(&domain.name)
            .await
            .with_context(|| "error creating libvirt domain")?;

        info!(domain = %domain.name, id = %domain.uuid, "Domain started");
        Ok(domain)
    }
}

/// Look a domain up by name; `DomainNotFound` when absent
pub async fn lookup_domain(client: &dyn LibvirtClientTrait, name: &str) -> Result<Domain, ProvisionError> {
    match client.lookup_domain(name).await {
        Ok(domain) => Ok(domain),
        Err(e) if e.is_not_found() => Err(ProvisionError::DomainNotFound),
        Err(e) => Err(e).with_context(|| format!("failed to look up domain {name}")),
    }
}

/// Whether a domain named `name` is defined
pub async fn domain_exists(client: &dyn LibvirtClientTrait, name: &str) -> Result<bool, ProvisionError> {
    match lookup_domain(client, name).await {
        Ok(_) => Ok(true),
        Err(ProvisionError::DomainNotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Stop (if needed) and undefine a domain; `DomainNotFound` when absent
pub async fn delete_domain(client: &dyn LibvirtClientTrait, name: &str) -> Result<(), ProvisionError> {
    debug!(domain = name, "Deleting domain");
    let state = match client.domain_state(name).await {
        Ok(state) => state,
        Err(e) if e.is_not_found() => return Err(ProvisionError::DomainNotFound),
        Err(e) => return Err(e).with_context(|| "Couldn't get info about domain"),
    };

    if matches!(state, DomainState::Running | DomainState::Paused) {
        client
            .destroy_domain(name)
            .await
            .with_context(|| "Couldn't destroy libvirt domain")?;
    }

    match client.undefine_domain(name, UndefineFlags { nvram: true }).await {
        Ok(()) => {}
        Err(LibvirtError::NoSupport(_) | LibvirtError::InvalidArg(_)) => {
            warn!(domain = name, "libvirt does not support undefine flags: will try again without flags");
            client
                .undefine_domain(name, UndefineFlags::default())
                .await
                .with_context(|| "Couldn't undefine libvirt domain")?;
        }
        Err(e) if e.is_not_found() => return Err(ProvisionError::DomainNotFound),
        Err(e) => return Err(e).with_context(|| "Couldn't undefine libvirt domain with flags"),
    }

    info!(domain = name, "Deleted domain");
    Ok(())
}

/// Instance state reported in the provider status
pub fn domain_state_string(state: DomainState) -> &'static str {
    match state {
        DomainState::NoState => "None",
        DomainState::Running => "Running",
        DomainState::Blocked => "Blocked",
        DomainState::Paused => "Paused",
        DomainState::Shutdown => "Shutdown",
        DomainState::Crashed => "Crashed",
        DomainState::PmSuspended => "Suspended",
        DomainState::Shutoff => "Shutoff",
        DomainState::Unknown => "Unknown",
    }
}

/// Lease-sourced addresses of a domain as `InternalIP` node addresses.
///
/// A domain that is not running has no addresses.
pub async fn node_addresses(client: &dyn LibvirtClientTrait, name: &str) -> Result<Vec<NodeAddress>, ProvisionError> {
    let interfaces = match client.domain_interface_addresses(name, AddressSource::Lease).await {
        Ok(interfaces) => interfaces,
        Err(LibvirtError::OperationInvalid(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to list interface addresses of {name}")),
    };

    Ok(interfaces
        .into_iter()
        .flat_map(|iface| iface.addrs)
        .map(|addr| NodeAddress::internal_ip(addr.addr))
        .collect())
}
