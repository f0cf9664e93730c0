//! Reverse index from referenced objects to dependent LiveUpdates.
//!
//! A LiveUpdate references FileWatch, ImageMap, KubernetesDiscovery,
//! KubernetesApply, and DockerComposeService objects by name. When one of
//! those objects changes, the watch stream needs to know which
//! LiveUpdates to re-reconcile; this index answers that lookup. The
//! trigger-queue ConfigMap is mapped through the manifest annotation
//! instead of an object reference.

use crate::configmap;
use apis::{LiveUpdate, ANNOTATION_MANIFEST};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use kube_runtime::reflector::ObjectRef;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    FileWatch,
    ImageMap,
    KubernetesDiscovery,
    KubernetesApply,
    DockerComposeService,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefKey {
    pub kind: RefKind,
    pub name: String,
}

#[derive(Debug, Default)]
struct IndexEntry {
    keys: Vec<RefKey>,
    manifest_name: String,
}

#[derive(Default)]
pub struct Indexer {
    entries: Mutex<HashMap<String, IndexEntry>>,
}

impl Indexer {
    /// Refresh the index entry for one LiveUpdate from its current spec.
    pub fn on_reconcile(&self, name: &str, lu: &LiveUpdate) {
        let manifest_name = lu
            .annotations()
            .get(ANNOTATION_MANIFEST)
            .cloned()
            .unwrap_or_default();
        let entry = IndexEntry {
            keys: referenced_keys(lu),
            manifest_name,
        };
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(name.to_string(), entry);
            }
            Err(err) => warn!("indexer lock poisoned: {err}"),
        }
    }

    /// Drop the index entry for a deleted LiveUpdate.
    pub fn forget(&self, name: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(name);
        }
    }

    /// LiveUpdates referencing the given object.
    pub fn dependents(&self, kind: RefKind, obj_name: String) -> Vec<ObjectRef<LiveUpdate>> {
        let key = RefKey {
            kind,
            name: obj_name,
        };
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|(_, entry)| entry.keys.contains(&key))
            .map(|(name, _)| ObjectRef::new(name))
            .collect()
    }

    /// LiveUpdates whose manifest is queued for a manual trigger.
    pub fn trigger_queue_dependents(&self, cm: &ConfigMap) -> Vec<ObjectRef<LiveUpdate>> {
        if cm.name_any() != configmap::TRIGGER_QUEUE_NAME {
            return Vec::new();
        }
        let queued = configmap::names_in_trigger_queue(cm);
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|(_, entry)| {
                !entry.manifest_name.is_empty() && queued.contains(&entry.manifest_name)
            })
            .map(|(name, _)| ObjectRef::new(name))
            .collect()
    }
}

/// Keys of the objects referenced by a LiveUpdate spec.
fn referenced_keys(lu: &LiveUpdate) -> Vec<RefKey> {
    let mut keys = Vec::new();

    for source in &lu.spec.sources {
        if !source.file_watch.is_empty() {
            keys.push(RefKey {
                kind: RefKind::FileWatch,
                name: source.file_watch.clone(),
            });
        }
        if !source.image_map.is_empty() {
            keys.push(RefKey {
                kind: RefKind::ImageMap,
                name: source.image_map.clone(),
            });
        }
    }

    if let Some(kubernetes) = &lu.spec.selector.kubernetes {
        if !kubernetes.discovery_name.is_empty() {
            keys.push(RefKey {
                kind: RefKind::KubernetesDiscovery,
                name: kubernetes.discovery_name.clone(),
            });
        }
        if !kubernetes.apply_name.is_empty() {
            keys.push(RefKey {
                kind: RefKind::KubernetesApply,
                name: kubernetes.apply_name.clone(),
            });
        }
        if !kubernetes.image_map_name.is_empty() {
            keys.push(RefKey {
                kind: RefKind::ImageMap,
                name: kubernetes.image_map_name.clone(),
            });
        }
    }

    if let Some(docker_compose) = &lu.spec.selector.docker_compose {
        if !docker_compose.service.is_empty() {
            keys.push(RefKey {
                kind: RefKind::DockerComposeService,
                name: docker_compose.service.clone(),
            });
        }
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use apis::{
        LiveUpdateKubernetesSelector, LiveUpdateSelector, LiveUpdateSource, LiveUpdateSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn live_update(name: &str) -> LiveUpdate {
        LiveUpdate {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: LiveUpdateSpec {
                base_path: "/src".to_string(),
                selector: LiveUpdateSelector {
                    kubernetes: Some(LiveUpdateKubernetesSelector {
                        discovery_name: "disco".to_string(),
                        apply_name: "apply".to_string(),
                        image_map_name: String::new(),
                    }),
                    docker_compose: None,
                },
                sources: vec![LiveUpdateSource {
                    file_watch: "watch".to_string(),
                    image_map: String::new(),
                }],
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn maps_referenced_objects_back_to_dependents() {
        let indexer = Indexer::default();
        indexer.on_reconcile("lu-1", &live_update("lu-1"));

        let deps = indexer.dependents(RefKind::FileWatch, "watch".to_string());
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "lu-1");

        let deps = indexer.dependents(RefKind::KubernetesApply, "apply".to_string());
        assert_eq!(deps.len(), 1);

        assert!(indexer
            .dependents(RefKind::FileWatch, "other".to_string())
            .is_empty());
    }

    #[test]
    fn forget_removes_the_entry() {
        let indexer = Indexer::default();
        indexer.on_reconcile("lu-1", &live_update("lu-1"));
        indexer.forget("lu-1");
        assert!(indexer
            .dependents(RefKind::FileWatch, "watch".to_string())
            .is_empty());
    }
}
