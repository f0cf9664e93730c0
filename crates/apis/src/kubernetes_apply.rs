//! KubernetesApply CRD
//!
//! Records the most recent apply of a workload's YAML to the cluster.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "livesync.dev",
    version = "v1alpha1",
    derive = "PartialEq",
    kind = "KubernetesApply",
    status = "KubernetesApplyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesApplySpec {
    /// Concatenated YAML of the objects to apply.
    pub yaml: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesApplyStatus {
    /// When the most recent apply started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_apply_start_time: Option<DateTime<Utc>>,

    /// Error from the most recent apply, if it failed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}
