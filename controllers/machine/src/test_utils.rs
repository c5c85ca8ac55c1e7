//! Test utilities for unit testing the actuator
//!
//! Machine fixtures plus recording stand-ins for the event sink and the
//! status writer.

use std::sync::Mutex;

use async_trait::async_trait;
use crds::{Machine, MachineSpec, ProviderSpec};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;
use serde_json::{Value, json};

use crate::events::EventSink;
use crate::status::MachineStatusWriter;

/// Provider config of a worker booting from the `worker.ign` volume
pub fn provider_config() -> Value {
    json!({
        "apiVersion": "libvirtproviderconfig.openshift.io/v1beta1",
        "kind": "LibvirtMachineProviderConfig",
        "domainMemory": 2048,
        "domainVcpu": 2,
        "ignKey": "worker.ign",
        "volume": {"poolName": "default", "baseVolumeID": "coreos_base"},
        "uri": "qemu:///system"
    })
}

/// Machine `default/worker-0` carrying `config`
pub fn machine_with(config: Value) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some("worker-0".to_string()),
            namespace: Some("default".to_string()),
            uid: Some("6f3a2c1e-0d4b-4a8e-9c57-2b1f0e9d8a73".to_string()),
            ..Default::default()
        },
        spec: MachineSpec {
            provider_spec: ProviderSpec { value: Some(config) },
            provider_id: None,
        },
        status: None,
    }
}

/// Records events as `"{type:?} {reason} {note}"`
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<String>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, _machine: &ObjectReference, type_: EventType, reason: &str, _action: &str, note: String) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{:?} {} {}", type_, reason, note));
    }
}

/// Keeps every machine written through it
#[derive(Debug, Default)]
pub struct RecordingStatusWriter {
    writes: Mutex<Vec<Machine>>,
}

impl RecordingStatusWriter {
    pub fn writes(&self) -> Vec<Machine> {
        self.writes.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Machine> {
        self.writes.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MachineStatusWriter for RecordingStatusWriter {
    async fn update_status(&self, machine: &Machine) -> Result<(), kube::Error> {
        self.writes.lock().unwrap().push(machine.clone());
        Ok(())
    }
}
