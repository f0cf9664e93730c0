//! LiveUpdate controller
//!
//! Keeps running containers in sync with local sources by copying changed
//! files into them and re-running commands, instead of rebuilding images
//! and redeploying on every edit. When an in-place update can't work
//! (stop file touched, crash loop, dead pod), the LiveUpdate status tells
//! the build pipeline to fall back to a full rebuild.

mod client;
mod configmap;
mod controller;
mod error;
mod indexer;
mod reconciler;
mod store;
#[cfg(test)]
mod test_utils;

use crate::client::KubeObjectClient;
use crate::error::ControllerError;
use crate::reconciler::{Reconciler, UpdateMode};
use crate::store::Dispatcher;
use container_update::{DockerUpdater, ExecUpdater};
use std::env;
use std::sync::Arc;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting liveupdate controller");

    // Load configuration from environment variables
    let update_mode = match env::var("LIVEUPDATE_MODE") {
        Ok(mode) => mode.parse::<UpdateMode>()?,
        Err(_) => UpdateMode::default(),
    };
    let docker_bin = env::var("DOCKER_BIN").unwrap_or_else(|_| "docker".to_string());

    info!("Configuration:");
    info!("  Update mode: {:?}", update_mode);
    info!("  Docker binary: {}", docker_bin);

    let kube_client = kube::Client::try_default().await?;

    let (dispatcher, mut actions) = Dispatcher::new();
    // The engine-facing store is owned by the rest of the application;
    // here the stream only feeds the log.
    tokio::spawn(async move {
        while let Some(action) = actions.recv().await {
            debug!(?action, "store action");
        }
    });

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(KubeObjectClient::new(kube_client.clone())),
        dispatcher,
        Arc::new(ExecUpdater::new(kube_client.clone())),
        Arc::new(DockerUpdater::new(docker_bin)),
        update_mode,
    ));

    controller::run(reconciler, kube_client).await
}
