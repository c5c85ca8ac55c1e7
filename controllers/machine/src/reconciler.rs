//! Reconciliation logic for Machine resources.
//!
//! Maps the watch loop onto the actuator: machines without a domain are
//! created, machines with one are refreshed, and deleted machines are torn
//! down before their finalizer is released.

use std::sync::Arc;
use std::time::Duration;

use crds::Machine;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info};

use crate::actuator::Actuator;
use crate::error::ActuatorError;

/// Finalizer holding a machine until its domain is gone
pub const MACHINE_FINALIZER: &str = "machine.machine.openshift.io";

/// Requeue after a create, to pick up addresses handed out by DHCP
const CREATED_REQUEUE: Duration = Duration::from_secs(30);
/// Periodic status refresh of running machines
const REFRESH_REQUEUE: Duration = Duration::from_secs(300);

/// Reconciles Machine resources through the actuator.
#[derive(Debug)]
pub struct Reconciler {
    actuator: Arc<Actuator>,
}

impl Reconciler {
    /// Creates a new reconciler.
    pub fn new(actuator: Arc<Actuator>) -> Self {
        Self { actuator }
    }

    /// Bring a live machine's domain into existence or refresh its status
    pub async fn apply(&self, machine: &Machine) -> Result<Action, ActuatorError> {
        let name = machine.name_any();

        if self.actuator.exists(machine).await? {
            debug!("Machine {} exists, updating", name);
            self.actuator.update(machine).await?;
            return Ok(Action::requeue(REFRESH_REQUEUE));
        }

        info!("Machine {} has no domain, creating", name);
        self.actuator.create(machine).await?;
        Ok(Action::requeue(CREATED_REQUEUE))
    }

    /// Tear a deleted machine down
    pub async fn cleanup(&self, machine: &Machine) -> Result<Action, ActuatorError> {
        info!("Machine {} is being deleted", machine.name_any());
        self.actuator.delete(machine).await?;
        Ok(Action::await_change())
    }
}
