//! Network operations for MockLibvirtClient

use super::helpers::{attribute, lock};
use super::{MockLibvirtClient, NetworkHost};
use crate::error::LibvirtError;
use crate::types::*;

fn not_found(network: &str) -> LibvirtError {
    LibvirtError::NotFound(format!("Network not found: no network with matching name '{network}'"))
}

pub fn network_xml(client: &MockLibvirtClient, network: &str) -> Result<String, LibvirtError> {
    lock(&client.networks)
        .get(network)
        .map(|n| n.xml.clone())
        .ok_or_else(|| not_found(network))
}

pub fn update_network(
    client: &MockLibvirtClient,
    network: &str,
    command: NetworkUpdateCommand,
    _section: NetworkSection,
    xml: &str,
) -> Result<(), LibvirtError> {
    let host = NetworkHost {
        mac: attribute(xml, "host", "mac").unwrap_or_default().to_ascii_lowercase(),
        name: attribute(xml, "host", "name").unwrap_or_default().to_string(),
        ip: attribute(xml, "host", "ip").unwrap_or_default().to_string(),
    };

    let mut networks = lock(&client.networks);
    let net = networks.get_mut(network).ok_or_else(|| not_found(network))?;
    let existing = net.hosts.iter().position(|h| h.mac == host.mac);

    match (command, existing) {
        (NetworkUpdateCommand::Modify, Some(idx)) => net.hosts[idx] = host,
        (NetworkUpdateCommand::AddLast, None) => net.hosts.push(host),
        (NetworkUpdateCommand::Delete, Some(idx)) => {
            net.hosts.remove(idx);
        }
        (NetworkUpdateCommand::AddLast, Some(_)) => {
            return Err(LibvirtError::OperationInvalid(format!(
                "there is an existing dhcp host entry in network '{network}' that matches \"<host mac='{}'/>\"",
                host.mac
            )));
        }
        (_, None) => {
            return Err(LibvirtError::OperationInvalid(format!(
                "couldn't locate a matching dhcp host entry in network '{network}'"
            )));
        }
    }
    Ok(())
}

pub fn dhcp_leases(client: &MockLibvirtClient, network: &str) -> Result<Vec<DhcpLease>, LibvirtError> {
    lock(&client.networks)
        .get(network)
        .map(|n| n.leases.clone())
        .ok_or_else(|| not_found(network))
}
