//! Per-LiveUpdate in-memory bookkeeping.
//!
//! A monitor accumulates everything the reconciler has observed for one
//! LiveUpdate: file mod-times per source, the last snapshot of each
//! referenced object, and per-container sync watermarks. It is created
//! lazily on first reconcile, wiped whenever the spec diverges, and
//! deleted with the object.

use apis::{
    DockerComposeService, FileEvent, ImageMap, ImageMapStatus, KubernetesApplyStatus,
    KubernetesDiscovery, LiveUpdateSpec,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug)]
pub(crate) struct Monitor {
    /// Manifest this LiveUpdate belongs to, for routing build events.
    pub manifest_name: String,

    /// Spec snapshot. A divergence from the live object resets all
    /// accumulated state.
    pub spec: LiveUpdateSpec,

    /// Accumulated file state per FileWatch name.
    pub sources: HashMap<String, MonitorSource>,

    pub last_kubernetes_discovery: Option<KubernetesDiscovery>,
    pub last_kubernetes_apply_status: Option<KubernetesApplyStatus>,
    pub last_image_map: Option<ImageMap>,
    pub last_docker_compose_service: Option<DockerComposeService>,
    pub last_trigger_queue: Option<BTreeMap<String, String>>,

    /// Per-container watermarks and sticky failure memos.
    pub containers: HashMap<MonitorContainerKey, MonitorContainerStatus>,

    /// Set whenever an observed input changed; cleared after each
    /// reconciliation pass.
    pub has_changes_to_sync: bool,
}

impl Monitor {
    pub fn new(manifest_name: String, spec: LiveUpdateSpec) -> Self {
        Self {
            manifest_name,
            spec,
            sources: HashMap::new(),
            last_kubernetes_discovery: None,
            last_kubernetes_apply_status: None,
            last_image_map: None,
            last_docker_compose_service: None,
            last_trigger_queue: None,
            containers: HashMap::new(),
            has_changes_to_sync: false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MonitorSource {
    /// Latest observed mod-time per absolute path. Entries older than the
    /// current build start are garbage collected.
    pub mod_time_by_path: HashMap<String, DateTime<Utc>>,

    /// Last event consumed, for deduplicating replays of the same event
    /// list.
    pub last_file_event: Option<FileEvent>,

    /// Last observed image status for this source.
    pub last_image_status: Option<ImageMapStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct MonitorContainerKey {
    pub container_id: String,
    pub pod_name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MonitorContainerStatus {
    /// Event time of the newest file already synced into the container.
    /// Only advances on successful syncs.
    pub last_file_time_synced: Option<DateTime<Utc>>,

    /// Sticky failure memo. Cleared when the low-water mark predates the
    /// current build start.
    pub failed_reason: String,
    pub failed_message: String,
    pub failed_low_water_mark: Option<DateTime<Utc>>,
}
