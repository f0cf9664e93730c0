//! Controller wiring.
//!
//! Runs the reconcile loop with kube_runtime::Controller, watching the
//! LiveUpdate objects themselves plus every kind a LiveUpdate can
//! reference. Mutations of referenced objects are mapped back to the
//! dependent LiveUpdates through the reverse index; trigger-queue writes
//! are mapped through the manifest annotation.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use apis::{
    DockerComposeService, FileWatch, ImageMap, KubernetesApply, KubernetesDiscovery, LiveUpdate,
};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use std::time::Duration;

use crate::indexer::RefKind;
use tracing::{debug, error, info};

async fn reconcile(lu: Arc<LiveUpdate>, ctx: Arc<Reconciler>) -> Result<Action, ControllerError> {
    ctx.reconcile(&lu.name_any()).await?;
    Ok(Action::await_change())
}

/// Transient errors requeue with backoff; live-update failures are
/// recorded in status and never reach this policy.
fn error_policy(lu: Arc<LiveUpdate>, err: &ControllerError, _ctx: Arc<Reconciler>) -> Action {
    error!("Reconciliation error for LiveUpdate {:?}: {}", lu.name_any(), err);
    Action::requeue(Duration::from_secs(10))
}

/// Runs the controller until its watch streams end.
pub async fn run(reconciler: Arc<Reconciler>, client: Client) -> Result<(), ControllerError> {
    info!("Starting LiveUpdate controller");

    let indexer = reconciler.indexer();

    let live_updates: Api<LiveUpdate> = Api::all(client.clone());
    let file_watches: Api<FileWatch> = Api::all(client.clone());
    let image_maps: Api<ImageMap> = Api::all(client.clone());
    let discoveries: Api<KubernetesDiscovery> = Api::all(client.clone());
    let applies: Api<KubernetesApply> = Api::all(client.clone());
    let services: Api<DockerComposeService> = Api::all(client.clone());
    let config_maps: Api<ConfigMap> = Api::all(client);

    // The reconciler serializes all work behind one lock, so there is no
    // point running reconciles concurrently.
    let controller_config = ControllerConfig::default().concurrency(1);

    Controller::new(live_updates, watcher::Config::default())
        .with_config(controller_config)
        .watches(file_watches, watcher::Config::default(), {
            let indexer = indexer.clone();
            move |fw: FileWatch| indexer.dependents(RefKind::FileWatch, fw.name_any())
        })
        .watches(image_maps, watcher::Config::default(), {
            let indexer = indexer.clone();
            move |im: ImageMap| indexer.dependents(RefKind::ImageMap, im.name_any())
        })
        .watches(discoveries, watcher::Config::default(), {
            let indexer = indexer.clone();
            move |kd: KubernetesDiscovery| {
                indexer.dependents(RefKind::KubernetesDiscovery, kd.name_any())
            }
        })
        .watches(applies, watcher::Config::default(), {
            let indexer = indexer.clone();
            move |ka: KubernetesApply| indexer.dependents(RefKind::KubernetesApply, ka.name_any())
        })
        .watches(services, watcher::Config::default(), {
            let indexer = indexer.clone();
            move |dcs: DockerComposeService| {
                indexer.dependents(RefKind::DockerComposeService, dcs.name_any())
            }
        })
        .watches(config_maps, watcher::Config::default(), {
            let indexer = indexer.clone();
            move |cm: ConfigMap| indexer.trigger_queue_dependents(&cm)
        })
        .run(reconcile, error_policy, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!("Reconciled LiveUpdate {:?}", obj.name),
                Err(err) => error!("Controller error: {}", err),
            }
        })
        .await;

    Ok(())
}
