//! Network identity
//!
//! Every domain gets one virtio interface with a random locally administered
//! MAC. On networks where libvirt runs DHCP, the machine's address is picked
//! from the configured range and pinned with a static host entry.

use libvirt_client::{LibvirtClientTrait, LibvirtError, NetworkSection, NetworkUpdateCommand};
use rand::RngCore;
use serde::Deserialize;
use tracing::{info, warn};

use crate::cidr::Cidr;
use crate::domain::Interface;
use crate::error::{LibvirtResultExt, ProvisionError};
use crate::leases::ReservedLeases;
use crate::xml::XmlWriter;

/// Host number of the first address handed out in a range
pub const WORKER_HOST_OFFSET: i64 = 51;

/// Random unicast, locally administered MAC address
pub fn random_mac() -> String {
    let mut buf = [0u8; 6];
    rand::rng().fill_bytes(&mut buf);

    // Locally administered, unicast
    buf[0] = (buf[0] | 0x02) & 0xfe;
    // fe: prefix is reserved for host-side tap devices
    if buf[0] == 0xfe {
        buf[0] = 0xee;
    }

    buf.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":")
}

#[derive(Debug, Default, Deserialize)]
struct NetworkXml {
    #[serde(default)]
    forward: Option<ForwardXml>,
}

#[derive(Debug, Default, Deserialize)]
struct ForwardXml {
    #[serde(rename = "@mode", default)]
    mode: String,
}

/// Whether libvirt serves DHCP on a network: forward modes nat and route, or a forward without mode
pub fn has_dhcp(network_xml: &str) -> Result<bool, ProvisionError> {
    let doc: NetworkXml =
        quick_xml::de::from_str(network_xml).map_err(|e| ProvisionError::Xml(format!("network: {e}")))?;
    Ok(doc
        .forward
        .is_some_and(|f| matches!(f.mode.as_str(), "nat" | "route" | "")))
}

/// A static DHCP host entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpHost {
    /// MAC address
    pub mac: String,
    /// Hostname
    pub name: String,
    /// Address
    pub ip: String,
}

impl DhcpHost {
    /// `<host mac=".." name=".." ip=".."/>`
    pub fn to_xml(&self) -> Result<String, ProvisionError> {
        let mut w = XmlWriter::new();
        w.write_empty_element("host", &[("mac", &self.mac), ("name", &self.name), ("ip", &self.ip)])?;
        w.into_string()
    }
}

/// Modify the host entry for `host.mac`, adding it when the network has none
pub async fn update_or_add_host(
    client: &dyn LibvirtClientTrait,
    network: &str,
    host: &DhcpHost,
) -> Result<(), ProvisionError> {
    let xml = host.to_xml()?;
    match client
        .update_network(network, NetworkUpdateCommand::Modify, NetworkSection::IpDhcpHost, &xml)
        .await
    {
        Ok(()) => Ok(()),
        Err(LibvirtError::OperationInvalid(_)) => client
            .update_network(network, NetworkUpdateCommand::AddLast, NetworkSection::IpDhcpHost, &xml)
            .await
            .with_context(|| format!("Error adding host {} to network {network}", host.name)),
        Err(e) => Err(e).with_context(|| format!("Error updating host {} in network {network}", host.name)),
    }
}

/// Hostname the network's DHCP server recorded for `ip`
pub async fn lookup_hostname_by_lease(
    client: &dyn LibvirtClientTrait,
    network: &str,
    ip: &str,
) -> Result<String, ProvisionError> {
    let leases = client
        .network_dhcp_leases(network)
        .await
        .with_context(|| format!("Failed to fetch dhcp leases for the network {network}"))?;
    leases
        .into_iter()
        .find(|l| l.ipaddr == ip)
        .map(|l| l.hostname.unwrap_or_default())
        .ok_or_else(|| ProvisionError::Tool(format!("Failed to find hostname for the DHCP lease with IP {ip}")))
}

/// Interface settings of a machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    /// libvirt network name
    pub network: String,
    /// Hostname registered with DHCP
    pub hostname: String,
    /// Range the static address is picked from
    pub address_range: Option<Cidr>,
}

/// The interface to attach and the address reserved for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAssignment {
    /// Interface definition
    pub interface: Interface,
    /// Address pinned in the network's DHCP host list
    pub reserved_ip: Option<String>,
}

/// Assigns MACs and static addresses
pub struct NetworkIdentity<'a> {
    client: &'a dyn LibvirtClientTrait,
    leases: &'a ReservedLeases,
}

impl std::fmt::Debug for NetworkIdentity<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkIdentity")
            .field("reserved", &self.leases.len())
            .finish_non_exhaustive()
    }
}

impl<'a> NetworkIdentity<'a> {
    /// Identity manager over `client`, reserving from `leases`
    pub fn new(client: &'a dyn LibvirtClientTrait, leases: &'a ReservedLeases) -> Self {
        Self { client, leases }
    }

    /// Seed the reserved set with the network's current leases, once per set
    pub async fn load_leases(&self, network: &str) -> Result<(), ProvisionError> {
        self.leases
            .ensure_loaded(|| async {
                let leases = self
                    .client
                    .network_dhcp_leases(network)
                    .await
                    .with_context(|| format!("Failed to fetch dhcp leases for the network {network}"))?;
                Ok::<_, ProvisionError>(leases.into_iter().map(|l| l.ipaddr).collect())
            })
            .await
    }

    /// Reserve the first free address of `range`, starting at the worker offset
    pub fn assign_address(&self, range: &Cidr) -> Result<String, ProvisionError> {
        self.leases.reserve_first(|attempt| {
            range
                .host_address(WORKER_HOST_OFFSET + i64::from(attempt))
                .map(|ip| ip.to_string())
                .map_err(|e| ProvisionError::config(format!("failed to generate ip: {e}")))
        })
    }

    /// Build the interface for `request`, pinning an address when the network serves DHCP
    pub async fn attach(&self, request: &NetworkRequest) -> Result<NetworkAssignment, ProvisionError> {
        let mac = random_mac();
        let network_xml = self
            .client
            .network_xml(&request.network)
            .await
            .with_context(|| format!("Can't retrieve network name {}", request.network))?;

        let mut reserved_ip = None;
        if has_dhcp(&network_xml)? {
            let Some(range) = &request.address_range else {
                return Err(ProvisionError::config(format!(
                    "Cannot map '{}': we are not waiting for DHCP lease and no IP has been provided",
                    request.hostname
                )));
            };

            let ip = self.assign_address(range)?;
            info!(ip = %ip, mac = %mac, host = %request.hostname, network = %request.network, "Adding DHCP host");
            let host = DhcpHost {
                mac: mac.clone(),
                name: request.hostname.clone(),
                ip: ip.clone(),
            };
            if let Err(e) = update_or_add_host(self.client, &request.network, &host).await {
                warn!(ip = %ip, "Releasing address after failed host update");
                self.leases.release(&ip);
                return Err(e);
            }
            reserved_ip = Some(ip);
        }

        Ok(NetworkAssignment {
            interface: Interface {
                network: request.network.clone(),
                mac,
            },
            reserved_ip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libvirt_client::{DhcpLease, MockLibvirtClient};

    const NAT_NETWORK: &str = "<network>\n  <name>actuator-net</name>\n  <forward mode='nat'/>\n  <ip address='192.168.124.1' netmask='255.255.255.0'>\n    <dhcp>\n      <range start='192.168.124.2' end='192.168.124.254'/>\n    </dhcp>\n  </ip>\n</network>\n";
    const ISOLATED_NETWORK: &str = "<network>\n  <name>isolated</name>\n  <ip address='10.0.0.1' netmask='255.255.255.0'/>\n</network>\n";

    fn request(range: Option<&str>) -> NetworkRequest {
        NetworkRequest {
            network: "actuator-net".to_string(),
            hostname: "worker-0".to_string(),
            address_range: range.map(|r| r.parse().unwrap()),
        }
    }

    #[test]
    fn test_random_mac_is_local_unicast() {
        for _ in 0..1000 {
            let mac = random_mac();
            assert_eq!(mac.len(), 17);
            assert_eq!(mac, mac.to_lowercase());
            let first = u8::from_str_radix(&mac[0..2], 16).unwrap();
            assert_eq!(first & 0x02, 0x02, "{mac} not locally administered");
            assert_eq!(first & 0x01, 0, "{mac} is multicast");
            assert_ne!(first, 0xfe);
        }
    }

    #[test]
    fn test_has_dhcp() {
        assert!(has_dhcp(NAT_NETWORK).unwrap());
        assert!(has_dhcp("<network><forward mode='route'/></network>").unwrap());
        assert!(has_dhcp("<network><forward/></network>").unwrap());
        assert!(!has_dhcp("<network><forward mode='bridge'/></network>").unwrap());
        assert!(!has_dhcp(ISOLATED_NETWORK).unwrap());
    }

    #[test]
    fn test_host_xml() {
        let host = DhcpHost {
            mac: "52:54:00:aa:bb:cc".to_string(),
            name: "worker-0".to_string(),
            ip: "192.168.124.51".to_string(),
        };
        assert_eq!(
            host.to_xml().unwrap(),
            "<host mac=\"52:54:00:aa:bb:cc\" name=\"worker-0\" ip=\"192.168.124.51\"/>\n"
        );
    }

    #[tokio::test]
    async fn test_update_falls_back_to_add() {
        let client = MockLibvirtClient::new("qemu:///system");
        client.add_network("actuator-net", NAT_NETWORK);
        let mut host = DhcpHost {
            mac: "52:54:00:aa:bb:cc".to_string(),
            name: "worker-0".to_string(),
            ip: "192.168.124.51".to_string(),
        };

        update_or_add_host(&client, "actuator-net", &host).await.unwrap();
        host.ip = "192.168.124.52".to_string();
        update_or_add_host(&client, "actuator-net", &host).await.unwrap();

        let hosts = client.network_hosts("actuator-net");
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].ip, "192.168.124.52");
    }

    #[tokio::test]
    async fn test_attach_skips_leased_addresses() {
        let client = MockLibvirtClient::new("qemu:///system");
        client.add_network("actuator-net", NAT_NETWORK);
        client.add_lease(
            "actuator-net",
            DhcpLease {
                ipaddr: "192.168.124.51".to_string(),
                mac: "52:54:00:00:00:01".to_string(),
                hostname: Some("master-0".to_string()),
            },
        );
        let leases = ReservedLeases::new();
        let identity = NetworkIdentity::new(&client, &leases);

        identity.load_leases("actuator-net").await.unwrap();
        let assignment = identity.attach(&request(Some("192.168.124.0/24"))).await.unwrap();

        assert_eq!(assignment.reserved_ip.as_deref(), Some("192.168.124.52"));
        assert_eq!(assignment.interface.network, "actuator-net");
        let hosts = client.network_hosts("actuator-net");
        assert_eq!(hosts[0].mac, assignment.interface.mac);
        assert_eq!(hosts[0].name, "worker-0");
    }

    #[tokio::test]
    async fn test_attach_without_range_on_dhcp_network() {
        let client = MockLibvirtClient::new("qemu:///system");
        client.add_network("actuator-net", NAT_NETWORK);
        let leases = ReservedLeases::new();

        let err = NetworkIdentity::new(&client, &leases)
            .attach(&request(None))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot map 'worker-0': we are not waiting for DHCP lease and no IP has been provided"
        );
    }

    #[tokio::test]
    async fn test_attach_without_dhcp_reserves_nothing() {
        let client = MockLibvirtClient::new("qemu:///system");
        client.add_network("actuator-net", ISOLATED_NETWORK);
        let leases = ReservedLeases::new();

        let assignment = NetworkIdentity::new(&client, &leases)
            .attach(&request(Some("10.0.0.0/24")))
            .await
            .unwrap();
        assert!(assignment.reserved_ip.is_none());
        assert!(leases.is_empty());
    }

    #[tokio::test]
    async fn test_failed_host_update_releases_address() {
        let client = MockLibvirtClient::new("qemu:///system");
        client.add_network("actuator-net", NAT_NETWORK);
        client.fail_on("update_network", || LibvirtError::Command {
            command: "net-update".to_string(),
            status: "1".to_string(),
            stderr: "internal error".to_string(),
        });
        let leases = ReservedLeases::new();

        NetworkIdentity::new(&client, &leases)
            .attach(&request(Some("192.168.124.0/24")))
            .await
            .unwrap_err();
        assert!(leases.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_assignments_are_distinct() {
        let client = MockLibvirtClient::new("qemu:///system");
        let leases = ReservedLeases::new();
        let range: Cidr = "192.168.124.0/24".parse().unwrap();

        let assigned = futures::future::join_all((0..20).map(|_| {
            let leases = leases.clone();
            let client = client.clone();
            tokio::spawn(async move { NetworkIdentity::new(&client, &leases).assign_address(&range).unwrap() })
        }))
        .await;

        let mut ips: Vec<String> = assigned.into_iter().map(Result::unwrap).collect();
        ips.sort();
        ips.dedup();
        assert_eq!(ips.len(), 20);
        assert_eq!(leases.len(), 20);
    }

    #[tokio::test]
    async fn test_lookup_hostname_by_lease() {
        let client = MockLibvirtClient::new("qemu:///system");
        client.add_network("actuator-net", NAT_NETWORK);
        client.add_lease(
            "actuator-net",
            DhcpLease {
                ipaddr: "192.168.124.51".to_string(),
                mac: "52:54:00:00:00:01".to_string(),
                hostname: Some("worker-0".to_string()),
            },
        );

        assert_eq!(
            lookup_hostname_by_lease(&client, "actuator-net", "192.168.124.51").await.unwrap(),
            "worker-0"
        );
        let err = lookup_hostname_by_lease(&client, "actuator-net", "192.168.124.99")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to find hostname for the DHCP lease with IP 192.168.124.99");
    }
}
