//! Kubernetes resource watcher.
//!
//! Watches Machine resources and drives reconciliation through
//! kube_runtime::Controller. Every reconcile runs under the machine
//! finalizer so a deleted machine is only released once its domain is gone.

use std::sync::Arc;
use std::time::Duration;

use crds::Machine;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::finalizer::{Event as Finalizer, finalizer};
use kube_runtime::{Controller, watcher};
use tracing::{debug, error, info};

use crate::error::ActuatorError;
use crate::reconciler::{MACHINE_FINALIZER, Reconciler};

struct Context {
    api: Api<Machine>,
    reconciler: Reconciler,
}

async fn reconcile(machine: Arc<Machine>, ctx: Arc<Context>) -> Result<Action, ActuatorError> {
    debug!("Reconciling Machine {}", machine.name_any());

    let reconciler = &ctx.reconciler;
    finalizer(&ctx.api, MACHINE_FINALIZER, machine, |event| async move {
        match event {
            Finalizer::Apply(machine) => reconciler.apply(&machine).await,
            Finalizer::Cleanup(machine) => reconciler.cleanup(&machine).await,
        }
    })
    .await
    .map_err(|e| ActuatorError::Finalizer(Box::new(e)))
}

fn error_policy(machine: Arc<Machine>, error: &ActuatorError, _ctx: Arc<Context>) -> Action {
    error!("Reconciliation error for Machine {}: {}", machine.name_any(), error);
    Action::requeue(Duration::from_secs(60))
}

/// Watch machines until the watch stream ends
pub async fn watch_machines(api: Api<Machine>, reconciler: Reconciler) -> Result<(), ActuatorError> {
    info!("Starting Machine watcher");

    // Debounce batches our own status writes; at most 3 machines reconcile at once
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    let ctx = Arc::new(Context {
        api: api.clone(),
        reconciler,
    });

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled Machine {}", obj.name),
                Err(e) => error!("Controller error for Machine: {}", e),
            }
        })
        .await;

    Ok(())
}
