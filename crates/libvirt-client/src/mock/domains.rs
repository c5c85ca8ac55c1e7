//! Domain operations for MockLibvirtClient

use super::helpers::{element_text, lock};
use super::{MockDomain, MockLibvirtClient};
use crate::error::LibvirtError;
use crate::types::*;

fn not_found(name: &str) -> LibvirtError {
    LibvirtError::NotFound(format!("Domain not found: no domain with matching name '{name}'"))
}

pub fn define_domain(client: &MockLibvirtClient, xml: &str) -> Result<Domain, LibvirtError> {
    let name = element_text(xml, "name")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| LibvirtError::InvalidArg("missing domain name information".to_string()))?
        .to_string();

    let mut domains = lock(&client.domains);
    let uuid = match (domains.get(&name), element_text(xml, "uuid")) {
        (Some(existing), _) => existing.uuid.clone(),
        (None, Some(uuid)) => uuid.to_string(),
        (None, None) => uuid::Uuid::new_v4().to_string(),
    };

    let domain = domains.entry(name.clone()).or_insert_with(|| MockDomain {
        uuid: uuid.clone(),
        xml: String::new(),
        state: DomainState::Shutoff,
        autostart: false,
        interfaces: Vec::new(),
    });
    domain.xml = xml.to_string();

    Ok(Domain { name, uuid })
}

pub fn lookup_domain(client: &MockLibvirtClient, name: &str) -> Result<Domain, LibvirtError> {
    lock(&client.domains)
        .get(name)
        .map(|d| Domain {
            name: name.to_string(),
            uuid: d.uuid.clone(),
        })
        .ok_or_else(|| not_found(name))
}

pub fn domain_state(client: &MockLibvirtClient, name: &str) -> Result<DomainState, LibvirtError> {
    lock(&client.domains)
        .get(name)
        .map(|d| d.state)
        .ok_or_else(|| not_found(name))
}

pub fn set_autostart(client: &MockLibvirtClient, name: &str, autostart: bool) -> Result<(), LibvirtError> {
    let mut domains = lock(&client.domains);
    let domain = domains.get_mut(name).ok_or_else(|| not_found(name))?;
    domain.autostart = autostart;
    Ok(())
}

pub fn start_domain(client: &MockLibvirtClient, name: &str) -> Result<(), LibvirtError> {
    let mut domains = lock(&client.domains);
    let domain = domains.get_mut(name).ok_or_else(|| not_found(name))?;
    if domain.state == DomainState::Running {
        return Err(LibvirtError::OperationInvalid("domain is already running".to_string()));
    }
    domain.state = DomainState::Running;
    Ok(())
}

pub fn destroy_domain(client: &MockLibvirtClient, name: &str) -> Result<(), LibvirtError> {
    let mut domains = lock(&client.domains);
    let domain = domains.get_mut(name).ok_or_else(|| not_found(name))?;
    if !matches!(domain.state, DomainState::Running | DomainState::Paused | DomainState::Blocked) {
        return Err(LibvirtError::OperationInvalid("domain is not running".to_string()));
    }
    domain.state = DomainState::Shutoff;
    Ok(())
}

pub fn undefine_domain(client: &MockLibvirtClient, name: &str, flags: UndefineFlags) -> Result<(), LibvirtError> {
    if flags.nvram && *lock(&client.nvram_unsupported) {
        return Err(LibvirtError::NoSupport(
            "this function is not supported by the connection driver: virDomainUndefineFlags".to_string(),
        ));
    }
    lock(&client.domains)
        .remove(name)
        .map(|_| ())
        .ok_or_else(|| not_found(name))
}

pub fn interface_addresses(
    client: &MockLibvirtClient,
    name: &str,
    _source: AddressSource,
) -> Result<Vec<DomainInterface>, LibvirtError> {
    let domains = lock(&client.domains);
    let domain = domains.get(name).ok_or_else(|| not_found(name))?;
    if domain.state != DomainState::Running {
        return Err(LibvirtError::OperationInvalid("domain is not running".to_string()));
    }
    Ok(domain.interfaces.clone())
}
