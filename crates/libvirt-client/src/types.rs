//! libvirt object handles and records

use std::fmt;

/// A defined domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    /// Domain name
    pub name: String,
    /// Domain UUID
    pub uuid: String,
}

/// Domain power state as reported by libvirt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    /// No state
    NoState,
    /// Running
    Running,
    /// Blocked on a resource
    Blocked,
    /// Paused by the user
    Paused,
    /// Being shut down
    Shutdown,
    /// Shut off
    Shutoff,
    /// Crashed
    Crashed,
    /// Suspended by guest power management
    PmSuspended,
    /// A state this client does not know
    Unknown,
}

impl DomainState {
    /// Parse the state names printed by `virsh domstate`
    pub fn from_virsh(state: &str) -> Self {
        match state.trim() {
            "no state" => Self::NoState,
            "running" => Self::Running,
            "idle" | "blocked" => Self::Blocked,
            "paused" => Self::Paused,
            "in shutdown" => Self::Shutdown,
            "shut off" => Self::Shutoff,
            "crashed" => Self::Crashed,
            "pmsuspended" => Self::PmSuspended,
            _ => Self::Unknown,
        }
    }

    /// Name printed by `virsh domstate`
    pub fn as_virsh(self) -> &'static str {
        match self {
            Self::NoState => "no state",
            Self::Running => "running",
            Self::Blocked => "idle",
            Self::Paused => "paused",
            Self::Shutdown => "in shutdown",
            Self::Shutoff => "shut off",
            Self::Crashed => "crashed",
            Self::PmSuspended => "pmsuspended",
            Self::Unknown => "unknown",
        }
    }
}

/// Flags for undefining a domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UndefineFlags {
    /// Also remove the domain's NVRAM file
    pub nvram: bool,
}

/// Source used when querying domain interface addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    /// DHCP leases of libvirt-managed networks
    Lease,
    /// Guest agent
    Agent,
    /// Host ARP table
    Arp,
}

impl AddressSource {
    /// Argument understood by `virsh domifaddr --source`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lease => "lease",
            Self::Agent => "agent",
            Self::Arp => "arp",
        }
    }
}

/// A guest network interface and its addresses
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomainInterface {
    /// Interface name on the host (e.g. `vnet0`)
    pub name: String,
    /// Hardware address
    pub hwaddr: String,
    /// Assigned addresses
    pub addrs: Vec<InterfaceAddress>,
}

/// One address of a guest interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    /// Address without prefix
    pub addr: String,
    /// Prefix length
    pub prefix: u8,
}

/// A storage pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePool {
    /// Pool name
    pub name: String,
}

/// A storage volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageVolume {
    /// Pool holding the volume
    pub pool: String,
    /// Volume name, unique within its pool
    pub name: String,
    /// Volume key, unique on the host
    pub key: String,
    /// Path of the volume on the host
    pub path: String,
    /// Capacity in bytes
    pub capacity: u64,
    /// Allocation in bytes
    pub allocation: u64,
}

/// DHCP lease handed out by a libvirt network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpLease {
    /// Leased address without prefix
    pub ipaddr: String,
    /// MAC address of the client
    pub mac: String,
    /// Hostname sent by the client, if any
    pub hostname: Option<String>,
}

/// Commands of `virNetworkUpdate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkUpdateCommand {
    /// Replace an existing entry
    Modify,
    /// Append a new entry
    AddLast,
    /// Remove an entry
    Delete,
}

impl NetworkUpdateCommand {
    /// Command name understood by `virsh net-update`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Modify => "modify",
            Self::AddLast => "add-last",
            Self::Delete => "delete",
        }
    }
}

/// Network sections touched by the actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSection {
    /// Static DHCP host entries
    IpDhcpHost,
}

impl NetworkSection {
    /// Section name understood by `virsh net-update`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IpDhcpHost => "ip-dhcp-host",
        }
    }
}

impl fmt::Display for StorageVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pool, self.name)
    }
}
