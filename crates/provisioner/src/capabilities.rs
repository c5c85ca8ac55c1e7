//! Host capabilities
//!
//! Reads the subset of `virsh capabilities` the domain builder needs: the
//! host architecture and, per guest architecture, the emulator, the machine
//! types and the supported domain types.

use serde::Deserialize;

use crate::error::ProvisionError;

#[derive(Debug, Clone, Deserialize)]
struct CapsDocument {
    host: CapsHost,
    #[serde(rename = "guest", default)]
    guests: Vec<Guest>,
}

#[derive(Debug, Clone, Deserialize)]
struct CapsHost {
    cpu: CapsHostCpu,
}

#[derive(Debug, Clone, Deserialize)]
struct CapsHostCpu {
    arch: String,
}

/// A guest type the host can run
#[derive(Debug, Clone, Deserialize)]
pub struct Guest {
    /// OS type, `hvm` for full virtualization
    pub os_type: String,
    /// Architecture details
    pub arch: GuestArch,
}

/// Guest architecture details
#[derive(Debug, Clone, Deserialize)]
pub struct GuestArch {
    /// Architecture name
    #[serde(rename = "@name")]
    pub name: String,
    /// Emulator binary
    #[serde(default)]
    pub emulator: Option<String>,
    /// Machine types, in the order libvirt lists them
    #[serde(rename = "machine", default)]
    pub machines: Vec<GuestMachine>,
    /// Supported domain types
    #[serde(rename = "domain", default)]
    pub domains: Vec<GuestDomain>,
}

/// A machine type
#[derive(Debug, Clone, Deserialize)]
pub struct GuestMachine {
    /// Versioned machine name this alias resolves to
    #[serde(rename = "@canonical", default)]
    pub canonical: Option<String>,
    /// Machine name
    #[serde(rename = "$text")]
    pub name: String,
}

/// A domain type such as `kvm` or `qemu`
#[derive(Debug, Clone, Deserialize)]
pub struct GuestDomain {
    /// Domain type
    #[serde(rename = "@type")]
    pub domain_type: String,
}

/// Parsed host capabilities
#[derive(Debug, Clone)]
pub struct HostCapabilities {
    arch: String,
    guests: Vec<Guest>,
}

impl HostCapabilities {
    /// Parse a capabilities document
    pub fn parse(xml: &str) -> Result<Self, ProvisionError> {
        let doc: CapsDocument =
            quick_xml::de::from_str(xml).map_err(|e| ProvisionError::Xml(format!("host capabilities: {e}")))?;
        Ok(Self {
            arch: doc.host.cpu.arch,
            guests: doc.guests,
        })
    }

    /// Host CPU architecture
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Guest for an OS type and architecture
    pub fn guest(&self, os_type: &str, arch: &str) -> Result<&Guest, ProvisionError> {
        self.guests
            .iter()
            .find(|g| g.arch.name == arch && g.os_type == os_type)
            .ok_or_else(|| {
                ProvisionError::Capabilities(format!(
                    "Could not find any guests for architecure type {os_type}/{arch}"
                ))
            })
    }

    /// Canonical name of `machine`, or the name itself when it has none
    pub fn canonical_machine(&self, os_type: &str, arch: &str, machine: &str) -> Result<String, ProvisionError> {
        let guest = self.guest(os_type, arch)?;
        guest
            .arch
            .machines
            .iter()
            .find(|m| m.name == machine)
            .map(|m| m.canonical.clone().unwrap_or_else(|| m.name.clone()))
            .ok_or_else(|| {
                let known: Vec<&str> = guest.arch.machines.iter().map(|m| m.name.as_str()).collect();
                ProvisionError::Capabilities(format!(
                    "Cannot find machine type {machine} for {os_type}/{arch} in {known:?}"
                ))
            })
    }
}

/// Architectures without the firmware configuration device and without SPICE
pub fn is_restricted_arch(arch: &str) -> bool {
    arch.starts_with("s390") || arch.starts_with("ppc64")
}
