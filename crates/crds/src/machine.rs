//! Machine CRD
//!
//! The cluster-api `Machine` resource as consumed by the libvirt actuator.
//! Provider spec and provider status are opaque JSON documents; they are
//! decoded with [`crate::codec::ProviderCodec`].

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Provider-specific configuration
    #[serde(default)]
    pub provider_spec: ProviderSpec,

    /// Identifier assigned by the infrastructure provider
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Opaque provider configuration carried by a Machine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct ProviderSpec {
    /// Inline provider config document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Addresses reported for the instance backing this machine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<NodeAddress>,

    /// Opaque provider status document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub provider_status: Option<serde_json::Value>,

    /// Last time the status was written by the actuator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

/// A single address of a machine, typed like a Kubernetes node address
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct NodeAddress {
    /// Address type
    #[serde(rename = "type")]
    pub address_type: NodeAddressType,

    /// The address itself
    pub address: String,
}

impl NodeAddress {
    /// Internal IP address entry
    pub fn internal_ip(address: impl Into<String>) -> Self {
        Self {
            address_type: NodeAddressType::InternalIP,
            address: address.into(),
        }
    }

    /// Hostname entry
    pub fn hostname(address: impl Into<String>) -> Self {
        Self {
            address_type: NodeAddressType::Hostname,
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
/// Kubernetes node address type
pub enum NodeAddressType {
    /// Hostname
    Hostname,
    /// Externally routable IP
    ExternalIP,
    /// Cluster-internal IP
    InternalIP,
    /// External DNS name
    ExternalDNS,
    /// Internal DNS name
    InternalDNS,
}

fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_machine_crd_names() {
        let crd = Machine::crd();
        assert_eq!(crd.spec.group, "machine.openshift.io");
        assert_eq!(crd.spec.names.kind, "Machine");
        assert_eq!(crd.spec.versions[0].name, "v1beta1");
    }

    #[test]
    fn test_machine_status_serializes_address_type() {
        let status = MachineStatus {
            addresses: vec![
                NodeAddress::internal_ip("192.168.126.51"),
                NodeAddress::hostname("worker-0"),
            ],
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["addresses"][0]["type"], "InternalIP");
        assert_eq!(value["addresses"][1]["type"], "Hostname");
        assert!(value.get("providerStatus").is_none());
    }
}
