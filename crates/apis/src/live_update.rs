//! LiveUpdate CRD
//!
//! Declarative spec for keeping a running container in sync with local
//! sources: which file-watch sources feed it, how local paths map into the
//! container, which commands to re-run after a sync, and which changes
//! force a fall-back to a full image build.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation naming the manifest this object belongs to.
pub const ANNOTATION_MANIFEST: &str = "livesync.dev/manifest";

/// Annotation carrying the log span id for build events.
pub const ANNOTATION_SPAN_ID: &str = "livesync.dev/span-id";

/// Annotation selecting auto vs. manual update mode.
pub const ANNOTATION_UPDATE_MODE: &str = "livesync.dev/update-mode";

/// Annotation marking the object as owned by an external manager.
pub const ANNOTATION_MANAGED_BY: &str = "livesync.dev/managed-by";

pub const UPDATE_MODE_AUTO: &str = "auto";
pub const UPDATE_MODE_MANUAL: &str = "manual";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "livesync.dev",
    version = "v1alpha1",
    derive = "PartialEq",
    kind = "LiveUpdate",
    status = "LiveUpdateStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateSpec {
    /// Local root directory; relative sync, exec trigger, and stop paths
    /// resolve against it.
    pub base_path: String,

    /// The workload whose containers receive updates. Exactly one selector
    /// family must be set.
    #[serde(default)]
    pub selector: LiveUpdateSelector,

    /// File-event sources feeding this live update.
    #[serde(default)]
    pub sources: Vec<LiveUpdateSource>,

    /// Ordered local-to-container path mappings. For each changed file the
    /// first matching sync wins.
    #[serde(default)]
    pub syncs: Vec<LiveUpdateSync>,

    /// Ordered commands to run in the container after a sync, gated by
    /// trigger paths.
    #[serde(default)]
    pub execs: Vec<LiveUpdateExec>,

    /// Changes to these paths abort the live update and force a full
    /// image build.
    #[serde(default)]
    pub stop_paths: Vec<String>,

    /// Restart the container process after a successful sync.
    #[serde(default)]
    pub restart: bool,
}

/// Discriminator naming the workload family. Exactly one field is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<LiveUpdateKubernetesSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_compose: Option<LiveUpdateDockerComposeSelector>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateKubernetesSelector {
    /// Name of the KubernetesDiscovery object enumerating pods and
    /// containers. Required.
    pub discovery_name: String,

    /// Name of the KubernetesApply object that deployed the workload.
    #[serde(default)]
    pub apply_name: String,

    /// Name of the ImageMap whose built image selects the containers to
    /// update. When empty, every container of every discovered pod is
    /// selected.
    #[serde(default)]
    pub image_map_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateDockerComposeSelector {
    /// Name of the DockerComposeService object to update. Required.
    pub service: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateSource {
    /// Name of the FileWatch supplying change events.
    pub file_watch: String,

    /// Name of the ImageMap whose build start time suppresses events the
    /// build already consumed.
    #[serde(default)]
    pub image_map: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateSync {
    /// Local root, absolute or relative to the spec's base path.
    pub local_path: String,

    /// Absolute path inside the container the local root maps to.
    pub container_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateExec {
    /// Command to run in the container after a sync.
    pub args: Vec<String>,

    /// Paths (exact, directory, or glob) that trigger this command. An
    /// exec with no triggers runs on every sync.
    #[serde(default)]
    pub trigger_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateStatus {
    /// Terminal failure of the whole live update. Mutually exclusive with
    /// per-container progress.
    pub failed: Option<LiveUpdateStateFailed>,

    /// Per-container sync state, one entry per selected container.
    #[serde(default)]
    pub containers: Vec<LiveUpdateContainerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateStateFailed {
    /// Machine-readable reason (e.g. "UpdateStopped", "CrashLoopBackOff").
    pub reason: String,

    /// Human-readable description.
    pub message: String,

    /// When this reason was first observed. Preserved across reconciles
    /// while the reason stays the same, so observers get a stable
    /// new-failure signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateContainerStatus {
    pub container_name: String,

    #[serde(default)]
    pub container_id: String,

    #[serde(default)]
    pub pod_name: String,

    #[serde(default)]
    pub namespace: String,

    /// Event time of the newest file reflected in this container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_file_time_synced: Option<DateTime<Utc>>,

    /// Message of the most recent exec step failure, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_exec_error: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<LiveUpdateContainerStateWaiting>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdateContainerStateWaiting {
    pub reason: String,
    pub message: String,
}
