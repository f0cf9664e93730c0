//! ImageMap CRD
//!
//! Reports the most recent image build for an image reference.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "livesync.dev",
    version = "v1alpha1",
    derive = "PartialEq",
    kind = "ImageMap",
    status = "ImageMapStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ImageMapSpec {
    /// Image reference this map tracks, as it appears in the workload.
    pub selector: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageMapStatus {
    /// Fully-qualified reference of the most recently built image.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// When the most recent image build started. File events at or before
    /// this time were consumed by that build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_start_time: Option<DateTime<Utc>>,
}
