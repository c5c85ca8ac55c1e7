//! Machine status writes

use async_trait::async_trait;
use crds::Machine;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};

/// Field manager of status patches
const FIELD_MANAGER: &str = "libvirt-machine-controller";

/// Persists the status of a machine
#[async_trait]
pub trait MachineStatusWriter: Send + Sync {
    /// Write `machine.status` to the API server
    async fn update_status(&self, machine: &Machine) -> Result<(), kube::Error>;
}

/// Writes status through the `status` subresource
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
}

impl std::fmt::Debug for KubeStatusWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStatusWriter").finish_non_exhaustive()
    }
}

impl KubeStatusWriter {
    /// Writer using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MachineStatusWriter for KubeStatusWriter {
    async fn update_status(&self, machine: &Machine) -> Result<(), kube::Error> {
        let namespace = machine.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Machine> = Api::namespaced(self.client.clone(), &namespace);

        let status_patch = serde_json::json!({
            "status": machine.status
        });

        api.patch_status(
            &machine.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }
}
