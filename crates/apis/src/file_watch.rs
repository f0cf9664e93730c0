//! FileWatch CRD
//!
//! External object streaming file-change events for a set of watched
//! paths. The event stream is lossy; consumers must tolerate dropped and
//! replayed events.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "livesync.dev",
    version = "v1alpha1",
    derive = "PartialEq",
    kind = "FileWatch",
    status = "FileWatchStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct FileWatchSpec {
    /// Local roots to watch recursively.
    pub watched_paths: Vec<String>,

    /// Patterns excluded from the watch.
    #[serde(default)]
    pub ignores: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileWatchStatus {
    /// When the watcher started observing the watched paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_start_time: Option<DateTime<Utc>>,

    /// Time-ordered change events, oldest first. The watcher bounds the
    /// list, so old events age out.
    #[serde(default)]
    pub file_events: Vec<FileEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
    /// When the batch of changes was observed.
    pub time: DateTime<Utc>,

    /// Absolute paths seen changing in this batch.
    #[serde(default)]
    pub seen_files: Vec<String>,
}
