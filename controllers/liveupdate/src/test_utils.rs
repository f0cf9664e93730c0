//! Test utilities for unit testing the reconciler
//!
//! Provides an in-memory ObjectClient plus helpers for building test
//! objects, so reconciler tests run without an apiserver, a cluster, or
//! a docker daemon.

use crate::client::ObjectClient;
use crate::error::ControllerError;
use crate::reconciler::{Reconciler, UpdateMode};
use crate::store::{Action, Dispatcher};
use apis::{
    Container, ContainerState, ContainerStateRunning, DockerComposeService,
    DockerComposeServiceSpec, DockerComposeServiceStatus, FileEvent, FileWatch, FileWatchSpec,
    FileWatchStatus, ImageMap, ImageMapSpec, ImageMapStatus, KubernetesApply, KubernetesApplySpec,
    KubernetesDiscovery, KubernetesDiscoverySpec, KubernetesDiscoveryStatus, LiveUpdate,
    LiveUpdateDockerComposeSelector, LiveUpdateKubernetesSelector, LiveUpdateSelector,
    LiveUpdateSource, LiveUpdateSpec, LiveUpdateStatus, LiveUpdateSync, Pod, ANNOTATION_MANIFEST,
    ANNOTATION_SPAN_ID, POD_PHASE_RUNNING,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use container_update::FakeContainerUpdater;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// In-memory object store implementing the reconciler's read/write seam.
#[derive(Default)]
pub struct FakeObjectClient {
    live_updates: Mutex<HashMap<String, LiveUpdate>>,
    file_watches: Mutex<HashMap<String, FileWatch>>,
    image_maps: Mutex<HashMap<String, ImageMap>>,
    discoveries: Mutex<HashMap<String, KubernetesDiscovery>>,
    applies: Mutex<HashMap<String, KubernetesApply>>,
    services: Mutex<HashMap<String, DockerComposeService>>,
    config_maps: Mutex<HashMap<String, ConfigMap>>,
}

impl FakeObjectClient {
    pub fn put_live_update(&self, lu: LiveUpdate) {
        self.live_updates
            .lock()
            .expect("lock")
            .insert(lu.name_any(), lu);
    }

    pub fn remove_live_update(&self, name: &str) {
        self.live_updates.lock().expect("lock").remove(name);
    }

    pub fn put_file_watch(&self, fw: FileWatch) {
        self.file_watches
            .lock()
            .expect("lock")
            .insert(fw.name_any(), fw);
    }

    pub fn put_image_map(&self, im: ImageMap) {
        self.image_maps
            .lock()
            .expect("lock")
            .insert(im.name_any(), im);
    }

    pub fn put_discovery(&self, kd: KubernetesDiscovery) {
        self.discoveries
            .lock()
            .expect("lock")
            .insert(kd.name_any(), kd);
    }

    pub fn put_apply(&self, ka: KubernetesApply) {
        self.applies.lock().expect("lock").insert(ka.name_any(), ka);
    }

    pub fn put_service(&self, dcs: DockerComposeService) {
        self.services
            .lock()
            .expect("lock")
            .insert(dcs.name_any(), dcs);
    }

    pub fn put_config_map(&self, cm: ConfigMap) {
        self.config_maps
            .lock()
            .expect("lock")
            .insert(cm.name_any(), cm);
    }

    /// Status of the stored LiveUpdate, as written back by the reconciler.
    pub fn live_update_status(&self, name: &str) -> LiveUpdateStatus {
        self.live_updates
            .lock()
            .expect("lock")
            .get(name)
            .and_then(|lu| lu.status.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectClient for FakeObjectClient {
    async fn live_update(&self, name: &str) -> Result<Option<LiveUpdate>, ControllerError> {
        Ok(self.live_updates.lock().expect("lock").get(name).cloned())
    }

    async fn file_watch(&self, name: &str) -> Result<Option<FileWatch>, ControllerError> {
        Ok(self.file_watches.lock().expect("lock").get(name).cloned())
    }

    async fn image_map(&self, name: &str) -> Result<Option<ImageMap>, ControllerError> {
        Ok(self.image_maps.lock().expect("lock").get(name).cloned())
    }

    async fn kubernetes_discovery(
        &self,
        name: &str,
    ) -> Result<Option<KubernetesDiscovery>, ControllerError> {
        Ok(self.discoveries.lock().expect("lock").get(name).cloned())
    }

    async fn kubernetes_apply(
        &self,
        name: &str,
    ) -> Result<Option<KubernetesApply>, ControllerError> {
        Ok(self.applies.lock().expect("lock").get(name).cloned())
    }

    async fn docker_compose_service(
        &self,
        name: &str,
    ) -> Result<Option<DockerComposeService>, ControllerError> {
        Ok(self.services.lock().expect("lock").get(name).cloned())
    }

    async fn config_map(&self, name: &str) -> Result<Option<ConfigMap>, ControllerError> {
        Ok(self.config_maps.lock().expect("lock").get(name).cloned())
    }

    async fn update_live_update_status(&self, lu: &LiveUpdate) -> Result<(), ControllerError> {
        let mut live_updates = self.live_updates.lock().expect("lock");
        if let Some(stored) = live_updates.get_mut(&lu.name_any()) {
            stored.status = lu.status.clone();
        }
        Ok(())
    }
}

/// A reconciler over fake collaborators, plus handles to everything the
/// tests assert on.
pub struct Fixture {
    pub client: Arc<FakeObjectClient>,
    pub updater: Arc<FakeContainerUpdater>,
    pub reconciler: Reconciler,
    actions: mpsc::UnboundedReceiver<Action>,
}

impl Fixture {
    pub fn new() -> Self {
        let client = Arc::new(FakeObjectClient::default());
        let updater = Arc::new(FakeContainerUpdater::new());
        let (dispatcher, actions) = Dispatcher::new();
        let reconciler = Reconciler::new(
            client.clone(),
            dispatcher,
            updater.clone(),
            updater.clone(),
            UpdateMode::Auto,
        );
        Self {
            client,
            updater,
            reconciler,
            actions,
        }
    }

    pub async fn reconcile(&self, name: &str) {
        self.reconciler.reconcile(name).await.expect("reconcile");
    }

    pub fn status(&self, name: &str) -> LiveUpdateStatus {
        self.client.live_update_status(name)
    }

    pub fn drain_actions(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        while let Ok(action) = self.actions.try_recv() {
            actions.push(action);
        }
        actions
    }
}

pub fn object_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// A LiveUpdate with a Kubernetes selector (discovery "d", apply "a"),
/// one FileWatch source "fw", and the given syncs relative to base_path.
pub fn kubernetes_live_update(name: &str, base_path: &str, syncs: &[(&str, &str)]) -> LiveUpdate {
    let mut annotations = BTreeMap::new();
    annotations.insert(ANNOTATION_MANIFEST.to_string(), "frontend".to_string());
    annotations.insert(ANNOTATION_SPAN_ID.to_string(), "span-1".to_string());

    LiveUpdate {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: LiveUpdateSpec {
            base_path: base_path.to_string(),
            selector: LiveUpdateSelector {
                kubernetes: Some(LiveUpdateKubernetesSelector {
                    discovery_name: "d".to_string(),
                    apply_name: "a".to_string(),
                    image_map_name: String::new(),
                }),
                docker_compose: None,
            },
            sources: vec![LiveUpdateSource {
                file_watch: "fw".to_string(),
                image_map: String::new(),
            }],
            syncs: syncs
                .iter()
                .map(|(local, container)| LiveUpdateSync {
                    local_path: local.to_string(),
                    container_path: container.to_string(),
                })
                .collect(),
            ..Default::default()
        },
        status: None,
    }
}

pub fn file_watch(name: &str, events: Vec<FileEvent>) -> FileWatch {
    FileWatch {
        metadata: object_meta(name),
        spec: FileWatchSpec {
            watched_paths: Vec::new(),
            ignores: Vec::new(),
        },
        status: Some(FileWatchStatus {
            monitor_start_time: None,
            file_events: events,
        }),
    }
}

pub fn file_event(time: DateTime<Utc>, files: &[&str]) -> FileEvent {
    FileEvent {
        time,
        seen_files: files.iter().map(|f| f.to_string()).collect(),
    }
}

pub fn image_map(name: &str, build_start_time: Option<DateTime<Utc>>) -> ImageMap {
    ImageMap {
        metadata: object_meta(name),
        spec: ImageMapSpec {
            selector: "gcr.io/test/app".to_string(),
        },
        status: Some(ImageMapStatus {
            image: String::new(),
            build_start_time,
        }),
    }
}

pub fn kubernetes_apply(name: &str) -> KubernetesApply {
    KubernetesApply {
        metadata: object_meta(name),
        spec: KubernetesApplySpec {
            yaml: String::new(),
        },
        status: None,
    }
}

pub fn discovery(name: &str, pods: Vec<Pod>) -> KubernetesDiscovery {
    KubernetesDiscovery {
        metadata: object_meta(name),
        spec: KubernetesDiscoverySpec {
            extra_selectors: Vec::new(),
        },
        status: Some(KubernetesDiscoveryStatus { pods }),
    }
}

pub fn running_container(name: &str, id: &str) -> Container {
    Container {
        name: name.to_string(),
        id: id.to_string(),
        image: String::new(),
        ready: true,
        state: ContainerState {
            running: Some(ContainerStateRunning { started_at: None }),
            waiting: None,
            terminated: None,
        },
    }
}

pub fn pod_with_containers(name: &str, phase: &str, containers: Vec<Container>) -> Pod {
    Pod {
        name: name.to_string(),
        namespace: "default".to_string(),
        created_at: None,
        phase: phase.to_string(),
        containers,
    }
}

pub fn running_pod(name: &str, container_id: &str) -> Pod {
    pod_with_containers(
        name,
        POD_PHASE_RUNNING,
        vec![running_container("main", container_id)],
    )
}

/// A LiveUpdate with a DockerCompose selector (service "svc") and one
/// FileWatch source "fw".
pub fn compose_live_update(name: &str, base_path: &str, syncs: &[(&str, &str)]) -> LiveUpdate {
    let mut lu = kubernetes_live_update(name, base_path, syncs);
    lu.spec.selector = LiveUpdateSelector {
        kubernetes: None,
        docker_compose: Some(LiveUpdateDockerComposeSelector {
            service: "svc".to_string(),
        }),
    };
    lu
}

pub fn compose_service(name: &str, container_id: &str) -> DockerComposeService {
    DockerComposeService {
        metadata: object_meta(name),
        spec: DockerComposeServiceSpec {
            service: name.to_string(),
            project_name: String::new(),
        },
        status: Some(DockerComposeServiceStatus {
            container_id: container_id.to_string(),
            container_name: format!("{name}-1"),
            container_state: Some(ContainerState {
                running: Some(ContainerStateRunning { started_at: None }),
                waiting: None,
                terminated: None,
            }),
            start_time: None,
        }),
    }
}

pub fn trigger_queue(manifest_names: &[&str]) -> ConfigMap {
    let data: BTreeMap<String, String> = manifest_names
        .iter()
        .map(|name| (name.to_string(), "1".to_string()))
        .collect();
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(crate::configmap::TRIGGER_QUEUE_NAME.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}
