//! Provider codec
//!
//! Converts between the opaque JSON documents carried by a [`Machine`] and the
//! typed provider config / provider status.
//!
//! [`Machine`]: crate::machine::Machine

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;
use crate::machine::ProviderSpec;
use crate::provider_config::{LibvirtMachineProviderConfig, PROVIDER_API_VERSION, PROVIDER_CONFIG_KIND};
use crate::provider_status::{LibvirtMachineProviderStatus, PROVIDER_STATUS_KIND};

/// Decoding and encoding of provider documents
pub trait ProviderCodec: Send + Sync {
    /// Decode the provider config from a machine's provider spec
    fn decode_provider_config(&self, spec: &ProviderSpec) -> Result<LibvirtMachineProviderConfig, CodecError>;

    /// Encode a provider config into a provider spec
    fn encode_provider_config(&self, config: &LibvirtMachineProviderConfig) -> Result<ProviderSpec, CodecError>;

    /// Decode a provider status; an absent status decodes to an empty one
    fn decode_provider_status(
        &self,
        raw: Option<&serde_json::Value>,
    ) -> Result<LibvirtMachineProviderStatus, CodecError>;

    /// Encode a provider status
    fn encode_provider_status(&self, status: &LibvirtMachineProviderStatus) -> Result<serde_json::Value, CodecError>;
}

/// JSON codec for `libvirtproviderconfig.openshift.io/v1beta1` documents
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonProviderCodec;

impl JsonProviderCodec {
    /// Create a codec
    pub fn new() -> Self {
        Self
    }
}

fn check_type_meta(value: &serde_json::Value, kind: &str) -> Result<(), CodecError> {
    let found_version = value.get("apiVersion").and_then(|v| v.as_str()).unwrap_or_default();
    let found_kind = value.get("kind").and_then(|v| v.as_str()).unwrap_or_default();
    if found_version != PROVIDER_API_VERSION || found_kind != kind {
        return Err(CodecError::UnexpectedObject {
            api_version: found_version.to_string(),
            kind: found_kind.to_string(),
        });
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(value: &serde_json::Value, kind: &str) -> Result<T, CodecError> {
    check_type_meta(value, kind)?;
    Ok(serde_json::from_value(value.clone())?)
}

fn encode<T: Serialize>(document: &T, kind: &str) -> Result<serde_json::Value, CodecError> {
    let mut value = serde_json::to_value(document)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("apiVersion".to_string(), PROVIDER_API_VERSION.into());
        object.insert("kind".to_string(), kind.into());
    }
    Ok(value)
}

impl ProviderCodec for JsonProviderCodec {
    fn decode_provider_config(&self, spec: &ProviderSpec) -> Result<LibvirtMachineProviderConfig, CodecError> {
        let value = spec.value.as_ref().ok_or(CodecError::MissingValue)?;
        decode(value, PROVIDER_CONFIG_KIND)
    }

    fn encode_provider_config(&self, config: &LibvirtMachineProviderConfig) -> Result<ProviderSpec, CodecError> {
        Ok(ProviderSpec {
            value: Some(encode(config, PROVIDER_CONFIG_KIND)?),
        })
    }

    fn decode_provider_status(
        &self,
        raw: Option<&serde_json::Value>,
    ) -> Result<LibvirtMachineProviderStatus, CodecError> {
        match raw {
            None => Ok(LibvirtMachineProviderStatus::default()),
            Some(value) => decode(value, PROVIDER_STATUS_KIND),
        }
    }

    fn encode_provider_status(&self, status: &LibvirtMachineProviderStatus) -> Result<serde_json::Value, CodecError> {
        encode(status, PROVIDER_STATUS_KIND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider_config::{CloudInit, Ignition, Nvram, Volume};
    use crate::provider_status::{ConditionStatus, ConditionType};
    use chrono::{TimeZone, Utc};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use serde_json::json;

    fn sample_configs() -> Vec<LibvirtMachineProviderConfig> {
        vec![
            LibvirtMachineProviderConfig::default(),
            LibvirtMachineProviderConfig {
                domain_memory: 4096,
                domain_vcpu: 4,
                ign_key: Some("/var/lib/libvirt/images/worker.ign".to_string()),
                volume: Some(Volume {
                    pool_name: "default".to_string(),
                    base_volume_id: Some("rhcos-base".to_string()),
                    volume_name: None,
                    volume_size: Some(Quantity("40Gi".to_string())),
                }),
                network_interface_name: Some("tectonic".to_string()),
                network_interface_address: Some("192.168.126.0/24".to_string()),
                autostart: true,
                uri: "qemu+tcp://192.168.122.1/system".to_string(),
                ..Default::default()
            },
            LibvirtMachineProviderConfig {
                domain_memory: 1024,
                domain_vcpu: 1,
                ignition: Some(Ignition {
                    user_data_secret: "worker-user-data".to_string(),
                }),
                firmware: Some("/usr/share/OVMF/OVMF_CODE.fd".to_string()),
                nvram: Some(Nvram {
                    file: "/var/lib/libvirt/qemu/nvram/m0_VARS.fd".to_string(),
                    template: Some("/usr/share/OVMF/OVMF_VARS.fd".to_string()),
                }),
                ..Default::default()
            },
            LibvirtMachineProviderConfig {
                domain_memory: 2048,
                domain_vcpu: 2,
                cloud_init: Some(CloudInit {
                    user_data_secret: Some("bootstrap".to_string()),
                    ssh_access: true,
                    iso_image_path: None,
                }),
                network_interface_hostname: Some("node-a".to_string()),
                network_uuid: Some("1b7d".to_string()),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn test_provider_config_round_trip() {
        let codec = JsonProviderCodec::new();
        for config in sample_configs() {
            let spec = codec.encode_provider_config(&config).unwrap();
            let decoded = codec.decode_provider_config(&spec).unwrap();
            assert_eq!(decoded, config);
        }
    }

    #[test]
    fn test_missing_value_is_rejected() {
        let codec = JsonProviderCodec::new();
        let err = codec.decode_provider_config(&ProviderSpec::default()).unwrap_err();
        assert!(matches!(err, CodecError::MissingValue));
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let codec = JsonProviderCodec::new();
        let spec = ProviderSpec {
            value: Some(json!({
                "apiVersion": PROVIDER_API_VERSION,
                "kind": "AWSMachineProviderConfig",
            })),
        };
        let err = codec.decode_provider_config(&spec).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedObject { ref kind, .. } if kind == "AWSMachineProviderConfig"));
    }

    #[test]
    fn test_absent_status_decodes_to_empty() {
        let codec = JsonProviderCodec::new();
        let status = codec.decode_provider_status(None).unwrap();
        assert_eq!(status, LibvirtMachineProviderStatus::default());
    }

    #[test]
    fn test_provider_status_round_trip() {
        let codec = JsonProviderCodec::new();
        let mut status = LibvirtMachineProviderStatus {
            instance_id: Some("0f1e2d3c".to_string()),
            instance_state: Some("Running".to_string()),
            ..Default::default()
        };
        status.set_condition(
            ConditionType::MachineCreated,
            ConditionStatus::True,
            "MachineCreationSucceeded",
            "machine successfully created",
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        );

        let raw = codec.encode_provider_status(&status).unwrap();
        assert_eq!(raw["kind"], PROVIDER_STATUS_KIND);
        let decoded = codec.decode_provider_status(Some(&raw)).unwrap();
        assert_eq!(decoded, status);
    }
}
