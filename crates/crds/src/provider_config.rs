//! Libvirt provider config
//!
//! The document embedded in `Machine.spec.providerSpec.value` describing the
//! virtual machine to create.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::quantity::quantity_to_bytes;

/// API version of the provider config and provider status documents
pub const PROVIDER_API_VERSION: &str = "libvirtproviderconfig.openshift.io/v1beta1";

/// Kind of the provider config document
pub const PROVIDER_CONFIG_KIND: &str = "LibvirtMachineProviderConfig";

/// Libvirt machine provider config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LibvirtMachineProviderConfig {
    /// API version of this document
    #[serde(default)]
    pub api_version: String,

    /// Kind of this document
    #[serde(default)]
    pub kind: String,

    /// Memory of the domain in MiB
    #[serde(default)]
    pub domain_memory: u64,

    /// Number of virtual CPUs
    #[serde(default)]
    pub domain_vcpu: u32,

    /// Name or key of a pre-uploaded Ignition volume (deprecated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ign_key: Option<String>,

    /// Ignition config taken from a Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignition: Option<Ignition>,

    /// Cloud-init config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init: Option<CloudInit>,

    /// Backing volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,

    /// Name of the libvirt network to attach to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interface_name: Option<String>,

    /// Hostname registered in the network's DHCP server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interface_hostname: Option<String>,

    /// Address range (CIDR) the interface address is allocated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interface_address: Option<String>,

    /// UUID of the libvirt network
    #[serde(default, rename = "networkUUID", skip_serializing_if = "Option::is_none")]
    pub network_uuid: Option<String>,

    /// Start the domain when the host boots
    #[serde(default)]
    pub autostart: bool,

    /// libvirt connection URI
    #[serde(default)]
    pub uri: String,

    /// UEFI loader image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,

    /// NVRAM settings, only honoured together with `firmware`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nvram: Option<Nvram>,
}

impl Default for LibvirtMachineProviderConfig {
    fn default() -> Self {
        Self {
            api_version: PROVIDER_API_VERSION.to_string(),
            kind: PROVIDER_CONFIG_KIND.to_string(),
            domain_memory: 0,
            domain_vcpu: 0,
            ign_key: None,
            ignition: None,
            cloud_init: None,
            volume: None,
            network_interface_name: None,
            network_interface_hostname: None,
            network_interface_address: None,
            network_uuid: None,
            autostart: false,
            uri: String::new(),
            firmware: None,
            nvram: None,
        }
    }
}

impl LibvirtMachineProviderConfig {
    /// Storage pool holding the machine's volumes
    pub fn pool_name(&self) -> &str {
        self.volume.as_ref().map_or("", |v| v.pool_name.as_str())
    }
}

/// Ignition bootstrap sourced from a Secret
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Ignition {
    /// Name of the Secret holding the `userData` key
    #[serde(default)]
    pub user_data_secret: String,
}

/// Cloud-init bootstrap
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloudInit {
    /// Name of the Secret holding a `userData` script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret: Option<String>,

    /// Inject the guest SSH key
    #[serde(default)]
    pub ssh_access: bool,

    /// Pre-built cloud-init ISO to upload instead of rendering one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_image_path: Option<String>,
}

/// Volume settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Storage pool name
    #[serde(default)]
    pub pool_name: String,

    /// Name or key of the base volume the machine disk is layered on
    #[serde(default, rename = "baseVolumeID", skip_serializing_if = "Option::is_none")]
    pub base_volume_id: Option<String>,

    /// Name of the machine volume (defaults to the machine name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,

    /// Requested size of the machine volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<Quantity>,
}

impl Volume {
    /// Requested size in bytes, if any
    pub fn size_bytes(&self) -> Result<Option<u64>, CodecError> {
        self.volume_size.as_ref().map(quantity_to_bytes).transpose()
    }
}

/// UEFI variable store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Nvram {
    /// Per-domain NVRAM file
    pub file: String,

    /// Template the NVRAM file is initialised from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_provider_config() {
        let value = json!({
            "apiVersion": PROVIDER_API_VERSION,
            "kind": PROVIDER_CONFIG_KIND,
            "domainMemory": 2048,
            "domainVcpu": 2,
            "ignition": {"userDataSecret": "worker-user-data"},
            "volume": {
                "poolName": "default",
                "baseVolumeID": "coreos_base",
                "volumeSize": "20Gi"
            },
            "networkInterfaceName": "actuator-net",
            "networkInterfaceAddress": "192.168.124.0/24",
            "networkUUID": "8e2a4b5c",
            "autostart": false,
            "uri": "qemu:///system"
        });

        let config: LibvirtMachineProviderConfig = serde_json::from_value(value).unwrap();
        assert_eq!(config.domain_memory, 2048);
        assert_eq!(config.domain_vcpu, 2);
        assert_eq!(config.ignition.unwrap().user_data_secret, "worker-user-data");
        assert_eq!(config.network_uuid.as_deref(), Some("8e2a4b5c"));

        let volume = config.volume.unwrap();
        assert_eq!(volume.base_volume_id.as_deref(), Some("coreos_base"));
        assert_eq!(volume.size_bytes().unwrap(), Some(20 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_missing_numbers_default_to_zero() {
        let config: LibvirtMachineProviderConfig =
            serde_json::from_value(json!({"uri": "qemu:///system"})).unwrap();
        assert_eq!(config.domain_memory, 0);
        assert_eq!(config.domain_vcpu, 0);
        assert_eq!(config.pool_name(), "");
    }

    #[test]
    fn test_cloud_init_keys() {
        let cloud_init = CloudInit {
            user_data_secret: None,
            ssh_access: true,
            iso_image_path: None,
        };
        let value = serde_json::to_value(&cloud_init).unwrap();
        assert_eq!(value, json!({"sshAccess": true}));
    }
}
