//! Libvirt provider status
//!
//! Embedded in `Machine.status.providerStatus`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider_config::PROVIDER_API_VERSION;

/// Kind of the provider status document
pub const PROVIDER_STATUS_KIND: &str = "LibvirtMachineProviderStatus";

/// Libvirt-specific status of a machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LibvirtMachineProviderStatus {
    /// API version of this document
    #[serde(default)]
    pub api_version: String,

    /// Kind of this document
    #[serde(default)]
    pub kind: String,

    /// UUID of the libvirt domain
    #[serde(default, rename = "instanceID", skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Power state of the libvirt domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<String>,

    /// Conditions of the machine
    #[serde(default)]
    pub conditions: Vec<LibvirtMachineProviderCondition>,
}

impl Default for LibvirtMachineProviderStatus {
    fn default() -> Self {
        Self {
            api_version: PROVIDER_API_VERSION.to_string(),
            kind: PROVIDER_STATUS_KIND.to_string(),
            instance_id: None,
            instance_state: None,
            conditions: Vec::new(),
        }
    }
}

impl LibvirtMachineProviderStatus {
    /// Set a condition, keeping the existing entry untouched when nothing changed.
    ///
    /// `last_transition_time` only moves when the condition status flips.
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        now: DateTime<Utc>,
    ) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            if existing.status == status && existing.reason == reason && existing.message == message {
                return;
            }
            if existing.status != status {
                existing.last_transition_time = Some(now);
            }
            existing.status = status;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.last_probe_time = Some(now);
            return;
        }

        self.conditions.push(LibvirtMachineProviderCondition {
            condition_type,
            status,
            last_probe_time: Some(now),
            last_transition_time: Some(now),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    /// Look up a condition by type
    pub fn condition(&self, condition_type: ConditionType) -> Option<&LibvirtMachineProviderCondition> {
        self.conditions.iter().find(|c| c.condition_type == condition_type)
    }
}

/// A condition of a libvirt machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LibvirtMachineProviderCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub condition_type: ConditionType,

    /// Condition status
    pub status: ConditionStatus,

    /// Last time the condition was probed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<DateTime<Utc>>,

    /// Last time the condition changed status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// One-word CamelCase reason
    #[serde(default)]
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,
}

/// Condition types reported by the actuator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionType {
    /// Whether the machine has been created
    MachineCreated,
}

/// Kubernetes condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not known
    Unknown,
}
