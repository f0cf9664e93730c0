//! DockerComposeService CRD
//!
//! Single-container view of a Docker Compose service, the Compose
//! equivalent of KubernetesDiscovery.

use crate::kubernetes_discovery::ContainerState;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "livesync.dev",
    version = "v1alpha1",
    derive = "PartialEq",
    kind = "DockerComposeService",
    status = "DockerComposeServiceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DockerComposeServiceSpec {
    /// Service name within the Compose project.
    pub service: String,

    #[serde(default)]
    pub project_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DockerComposeServiceStatus {
    /// Runtime id of the service's current container. Empty until the
    /// container has started.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_state: Option<ContainerState>,

    /// When the current container started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
}
