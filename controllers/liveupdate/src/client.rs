//! Object read/write seam.
//!
//! The reconciler only ever issues `Get` on named objects and writes
//! LiveUpdate status. This trait abstracts that surface so tests can run
//! against an in-memory store.

use crate::error::ControllerError;
use apis::{
    DockerComposeService, FileWatch, ImageMap, KubernetesApply, KubernetesDiscovery, LiveUpdate,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Typed `Get` by name per referenced kind, plus the one status write.
/// An absent object is `Ok(None)`; only transient errors are `Err`.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn live_update(&self, name: &str) -> Result<Option<LiveUpdate>, ControllerError>;
    async fn file_watch(&self, name: &str) -> Result<Option<FileWatch>, ControllerError>;
    async fn image_map(&self, name: &str) -> Result<Option<ImageMap>, ControllerError>;
    async fn kubernetes_discovery(
        &self,
        name: &str,
    ) -> Result<Option<KubernetesDiscovery>, ControllerError>;
    async fn kubernetes_apply(
        &self,
        name: &str,
    ) -> Result<Option<KubernetesApply>, ControllerError>;
    async fn docker_compose_service(
        &self,
        name: &str,
    ) -> Result<Option<DockerComposeService>, ControllerError>;
    async fn config_map(&self, name: &str) -> Result<Option<ConfigMap>, ControllerError>;

    async fn update_live_update_status(&self, lu: &LiveUpdate) -> Result<(), ControllerError>;
}

/// The real implementation, backed by the apiserver.
pub struct KubeObjectClient {
    client: Client,
}

impl KubeObjectClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>, ControllerError>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
        Err(err) => Err(ControllerError::Kube(err)),
    }
}

#[async_trait]
impl ObjectClient for KubeObjectClient {
    async fn live_update(&self, name: &str) -> Result<Option<LiveUpdate>, ControllerError> {
        get_opt(&Api::all(self.client.clone()), name).await
    }

    async fn file_watch(&self, name: &str) -> Result<Option<FileWatch>, ControllerError> {
        get_opt(&Api::all(self.client.clone()), name).await
    }

    async fn image_map(&self, name: &str) -> Result<Option<ImageMap>, ControllerError> {
        get_opt(&Api::all(self.client.clone()), name).await
    }

    async fn kubernetes_discovery(
        &self,
        name: &str,
    ) -> Result<Option<KubernetesDiscovery>, ControllerError> {
        get_opt(&Api::all(self.client.clone()), name).await
    }

    async fn kubernetes_apply(
        &self,
        name: &str,
    ) -> Result<Option<KubernetesApply>, ControllerError> {
        get_opt(&Api::all(self.client.clone()), name).await
    }

    async fn docker_compose_service(
        &self,
        name: &str,
    ) -> Result<Option<DockerComposeService>, ControllerError> {
        get_opt(&Api::all(self.client.clone()), name).await
    }

    async fn config_map(&self, name: &str) -> Result<Option<ConfigMap>, ControllerError> {
        get_opt(&Api::default_namespaced(self.client.clone()), name).await
    }

    async fn update_live_update_status(&self, lu: &LiveUpdate) -> Result<(), ControllerError> {
        let api: Api<LiveUpdate> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "status": lu.status });
        api.patch_status(&lu.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
