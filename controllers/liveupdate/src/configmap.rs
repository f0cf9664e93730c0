//! Trigger queue helpers.
//!
//! Manual live updates are requested through a ConfigMap named
//! "trigger-queue" whose data keys enumerate the manifest names awaiting
//! a trigger. The CLI writes it; the reconciler only reads it.

use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;

pub const TRIGGER_QUEUE_NAME: &str = "trigger-queue";

/// Manifest names currently queued for a manual trigger.
pub fn names_in_trigger_queue(cm: &ConfigMap) -> Vec<String> {
    cm.data
        .as_ref()
        .map(|data| data.keys().cloned().collect())
        .unwrap_or_default()
}

pub fn in_trigger_queue(queue: &BTreeMap<String, String>, manifest_name: &str) -> bool {
    queue.contains_key(manifest_name)
}
