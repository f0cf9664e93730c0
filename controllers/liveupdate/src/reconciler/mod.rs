//! Reconciliation for LiveUpdate objects.
//!
//! One reconcile pass per object: refresh what the referenced objects
//! currently say (file events, image builds, discovered containers,
//! trigger queue), garbage-collect state the latest build made obsolete,
//! then decide per container whether to sync changed files, wait, or
//! give up and let the caller fall back to a full image build.
//!
//! The event stream feeding this loop is lossy: the watcher bounds its
//! event list and the operating system bounds its queues, so files can
//! change without us hearing about it. The build fall-back paths below
//! are what keep that from corrupting running containers.

pub mod monitor;
pub mod paths;
pub mod plan;
pub mod resource;


use crate::client::ObjectClient;
use crate::configmap::{in_trigger_queue, TRIGGER_QUEUE_NAME};
use crate::error::ControllerError;
use crate::indexer::Indexer;
use crate::store::{Action, Dispatcher, BUILD_REASON_CHANGED_FILES, LIVE_UPDATE_SOURCE};
use apis::{
    Container as DiscoveredContainer, LiveUpdate, LiveUpdateContainerStateWaiting,
    LiveUpdateContainerStatus, LiveUpdateSource, LiveUpdateSpec, LiveUpdateStateFailed,
    LiveUpdateStatus, ANNOTATION_MANAGED_BY, ANNOTATION_MANIFEST, ANNOTATION_SPAN_ID,
    ANNOTATION_UPDATE_MODE, POD_PHASE_FAILED, POD_PHASE_SUCCEEDED, UPDATE_MODE_MANUAL,
};
use chrono::{DateTime, Utc};
use container_update::{Container, ContainerUpdater, PathMapping, RunStep};
use monitor::{Monitor, MonitorContainerKey};
use paths::{format_file_change_list, missing_local_paths};
use plan::LiveUpdatePlan;
use resource::LuResource;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub const REASON_OBJECT_NOT_FOUND: &str = "ObjectNotFound";

const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";

/// Global updater selection, from the CLI's update-mode flag. Auto picks
/// by selector family; the other two force one implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateMode {
    #[default]
    Auto,
    Container,
    KubectlExec,
}

impl FromStr for UpdateMode {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(UpdateMode::Auto),
            "container" => Ok(UpdateMode::Container),
            "kubectl-exec" => Ok(UpdateMode::KubectlExec),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown update mode {other:?}"
            ))),
        }
    }
}

/// Manages the LiveUpdate API objects.
pub struct Reconciler {
    client: Arc<dyn ObjectClient>,
    dispatcher: Dispatcher,
    indexer: Arc<Indexer>,

    exec_updater: Arc<dyn ContainerUpdater>,
    docker_updater: Arc<dyn ContainerUpdater>,
    update_mode: UpdateMode,

    /// Initial watermark for new containers, so events accumulated before
    /// this process started don't replay into them.
    started_time: DateTime<Utc>,

    /// All monitors, guarded by the one reconcile-at-a-time lock.
    monitors: Mutex<HashMap<String, Monitor>>,
}

/// One updater invocation over a set of containers that should end up
/// with identical file state.
struct Input {
    is_docker_compose: bool,
    changed_files: Vec<PathMapping>,
    run_steps: Vec<RunStep>,
    containers: Vec<Container>,
    last_file_time_synced: Option<DateTime<Utc>>,
}

/// A container that passed every gate and is ready to receive the sync.
struct ApplyCandidate {
    container: Container,
    key: MonitorContainerKey,
    new_low_water_mark: Option<DateTime<Utc>>,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        dispatcher: Dispatcher,
        exec_updater: Arc<dyn ContainerUpdater>,
        docker_updater: Arc<dyn ContainerUpdater>,
        update_mode: UpdateMode,
    ) -> Self {
        Self {
            client,
            dispatcher,
            indexer: Arc::new(Indexer::default()),
            exec_updater,
            docker_updater,
            update_mode,
            started_time: Utc::now(),
            monitors: Mutex::new(HashMap::new()),
        }
    }

    pub fn indexer(&self) -> Arc<Indexer> {
        self.indexer.clone()
    }

    fn container_updater(&self, is_docker_compose: bool) -> &dyn ContainerUpdater {
        if is_docker_compose || self.update_mode == UpdateMode::Container {
            return self.docker_updater.as_ref();
        }
        self.exec_updater.as_ref()
    }

    /// One reconcile pass for the named LiveUpdate. Holds the
    /// process-wide lock for its whole duration, so at most one reconcile
    /// runs at a time across all objects.
    pub async fn reconcile(&self, name: &str) -> Result<(), ControllerError> {
        let mut monitors = self.monitors.lock().await;

        let lu = self.client.live_update(name).await?;
        let lu = match lu {
            Some(lu) if lu.metadata.deletion_timestamp.is_none() => lu,
            _ => {
                self.indexer.forget(name);
                monitors.remove(name);
                self.dispatcher.dispatch(Action::LiveUpdateDelete {
                    name: name.to_string(),
                });
                return Ok(());
            }
        };

        self.indexer.on_reconcile(name, &lu);

        // The apiserver is the source of truth; mirror it to the engine.
        self.dispatcher
            .dispatch(Action::LiveUpdateUpsert(Box::new(lu.clone())));

        // An object owned by an external manager is left alone until the
        // manager hands it over.
        if !annotation(&lu, ANNOTATION_MANAGED_BY).is_empty() {
            return Ok(());
        }

        if let Some(failed) = ensure_selector_valid(&lu) {
            return self.handle_failure(&lu, failed).await;
        }

        let monitor = ensure_monitor_exists(&mut monitors, name, &lu);

        let has_file_changes = match self.reconcile_sources(monitor).await {
            Ok(changed) => changed,
            Err(err) => return self.refresh_failure(&lu, err).await,
        };
        let has_kubernetes_changes = match self.reconcile_kubernetes_resource(monitor).await {
            Ok(changed) => changed,
            Err(err) => return self.refresh_failure(&lu, err).await,
        };
        let has_docker_compose_changes =
            match self.reconcile_docker_compose_service(monitor).await {
                Ok(changed) => changed,
                Err(err) => return self.refresh_failure(&lu, err).await,
            };
        let has_trigger_queue_changes = self.reconcile_trigger_queue(monitor).await?;

        if has_file_changes
            || has_kubernetes_changes
            || has_docker_compose_changes
            || has_trigger_queue_changes
        {
            monitor.has_changes_to_sync = true;
        }

        if monitor.has_changes_to_sync {
            let status = self.maybe_sync(&lu, monitor).await;

            if let Some(failed) = &status.failed {
                let is_new = lu.status.as_ref().and_then(|s| s.failed.as_ref()) != Some(failed);
                if is_new && should_log_failure_reason(failed) {
                    info!(
                        "LiveUpdate {:?} {}: {}",
                        name, failed.reason, failed.message
                    );
                }
            }

            let stored = lu.status.clone().unwrap_or_default();
            if stored != status {
                let mut update = lu.clone();
                update.status = Some(status);
                self.client.update_live_update_status(&update).await?;
            }
        }

        monitor.has_changes_to_sync = false;

        Ok(())
    }

    /// Map a refresh error onto status: a missing referenced object is an
    /// ObjectNotFound failure (recorded, not logged), anything else
    /// bubbles to the workqueue.
    async fn refresh_failure(
        &self,
        lu: &LiveUpdate,
        err: ControllerError,
    ) -> Result<(), ControllerError> {
        if let ControllerError::ObjectNotFound { .. } = &err {
            let failed = create_failed_state(lu, REASON_OBJECT_NOT_FOUND, &err.to_string());
            return self.handle_failure(lu, failed).await;
        }
        Err(err)
    }

    /// If the failure state changed, log it and write it to the
    /// apiserver.
    async fn handle_failure(
        &self,
        lu: &LiveUpdate,
        failed: LiveUpdateStateFailed,
    ) -> Result<(), ControllerError> {
        let is_new = lu.status.as_ref().and_then(|s| s.failed.as_ref()) != Some(&failed);
        if !is_new {
            return Ok(());
        }

        if should_log_failure_reason(&failed) {
            info!(
                "LiveUpdate {:?} {}: {}",
                lu.metadata.name.as_deref().unwrap_or(""),
                failed.reason,
                failed.message
            );
        }

        let mut update = lu.clone();
        let mut status = update.status.take().unwrap_or_default();
        status.failed = Some(failed);
        update.status = Some(status);
        self.client.update_live_update_status(&update).await
    }

    /// Consume all FileEvents off the FileWatch objects. Returns true if
    /// we saw new file events.
    async fn reconcile_sources(&self, monitor: &mut Monitor) -> Result<bool, ControllerError> {
        let sources = monitor.spec.sources.clone();
        let mut has_change = false;
        for source in &sources {
            if self.reconcile_one_source(monitor, source).await? {
                has_change = true;
            }
        }
        Ok(has_change)
    }

    async fn reconcile_one_source(
        &self,
        monitor: &mut Monitor,
        source: &LiveUpdateSource,
    ) -> Result<bool, ControllerError> {
        let file_watch = if source.file_watch.is_empty() {
            None
        } else {
            Some(self.client.file_watch(&source.file_watch).await?.ok_or(
                ControllerError::ObjectNotFound {
                    kind: "FileWatch",
                    name: source.file_watch.clone(),
                },
            )?)
        };

        let image_map = if source.image_map.is_empty() {
            None
        } else {
            Some(self.client.image_map(&source.image_map).await?.ok_or(
                ControllerError::ObjectNotFound {
                    kind: "ImageMap",
                    name: source.image_map.clone(),
                },
            )?)
        };

        let events = file_watch
            .as_ref()
            .and_then(|fw| fw.status.as_ref())
            .map(|status| status.file_events.as_slice())
            .unwrap_or(&[]);
        let Some(newest_event) = events.last() else {
            return Ok(false);
        };

        let m_source = monitor.sources.entry(source.file_watch.clone()).or_default();

        let new_image_status = image_map.as_ref().map(|im| im.status.clone().unwrap_or_default());
        let mut image_changed = false;
        if let Some(new_status) = &new_image_status {
            image_changed = m_source.last_image_status.as_ref() != Some(new_status);
            m_source.last_image_status = Some(new_status.clone());
        }

        let file_watch_changed = m_source.last_file_event.as_ref() != Some(newest_event);
        m_source.last_file_event = Some(newest_event.clone());

        if file_watch_changed {
            let build_start = new_image_status
                .as_ref()
                .and_then(|status| status.build_start_time);
            for event in events {
                // Files the current build already consumed are stale.
                if build_start.is_some_and(|start| event.time <= start) {
                    continue;
                }
                for file in &event.seen_files {
                    let newer = m_source
                        .mod_time_by_path
                        .get(file)
                        .is_none_or(|existing| *existing < event.time);
                    if newer {
                        m_source.mod_time_by_path.insert(file.clone(), event.time);
                    }
                }
            }
        }

        Ok(file_watch_changed || image_changed)
    }

    /// Consume all objects off the Kubernetes selector. Returns true if
    /// any of them changed.
    async fn reconcile_kubernetes_resource(
        &self,
        monitor: &mut Monitor,
    ) -> Result<bool, ControllerError> {
        let Some(selector) = monitor.spec.selector.kubernetes.clone() else {
            return Ok(false);
        };

        let mut changed = false;

        let mut apply_status = None;
        if !selector.apply_name.is_empty() {
            let apply = self
                .client
                .kubernetes_apply(&selector.apply_name)
                .await?
                .ok_or(ControllerError::ObjectNotFound {
                    kind: "KubernetesApply",
                    name: selector.apply_name.clone(),
                })?;
            let status = apply.status.unwrap_or_default();
            if monitor.last_kubernetes_apply_status.as_ref() != Some(&status) {
                changed = true;
            }
            apply_status = Some(status);
        }

        let discovery = self
            .client
            .kubernetes_discovery(&selector.discovery_name)
            .await?
            .ok_or(ControllerError::ObjectNotFound {
                kind: "KubernetesDiscovery",
                name: selector.discovery_name.clone(),
            })?;

        let mut image_map = None;
        if !selector.image_map_name.is_empty() {
            let im = self.client.image_map(&selector.image_map_name).await?.ok_or(
                ControllerError::ObjectNotFound {
                    kind: "ImageMap",
                    name: selector.image_map_name.clone(),
                },
            )?;
            if monitor.last_image_map.as_ref() != Some(&im) {
                changed = true;
            }
            image_map = Some(im);
        }

        if monitor
            .last_kubernetes_discovery
            .as_ref()
            .map(|kd| &kd.status)
            != Some(&discovery.status)
        {
            changed = true;
        }

        monitor.last_kubernetes_apply_status = apply_status;
        monitor.last_kubernetes_discovery = Some(discovery);
        monitor.last_image_map = image_map;

        Ok(changed)
    }

    /// Consume the DockerComposeService object. Returns true if its
    /// status changed.
    async fn reconcile_docker_compose_service(
        &self,
        monitor: &mut Monitor,
    ) -> Result<bool, ControllerError> {
        let Some(selector) = monitor.spec.selector.docker_compose.clone() else {
            return Ok(false);
        };

        let service = self
            .client
            .docker_compose_service(&selector.service)
            .await?
            .ok_or(ControllerError::ObjectNotFound {
                kind: "DockerComposeService",
                name: selector.service.clone(),
            })?;

        let changed = monitor
            .last_docker_compose_service
            .as_ref()
            .map(|dcs| &dcs.status)
            != Some(&service.status);
        monitor.last_docker_compose_service = Some(service);

        Ok(changed)
    }

    /// Consume the trigger queue. A missing queue reads as empty.
    async fn reconcile_trigger_queue(
        &self,
        monitor: &mut Monitor,
    ) -> Result<bool, ControllerError> {
        let queue = self
            .client
            .config_map(TRIGGER_QUEUE_NAME)
            .await?
            .and_then(|cm| cm.data)
            .unwrap_or_default();

        if monitor.last_trigger_queue.as_ref() == Some(&queue) {
            return Ok(false);
        }
        monitor.last_trigger_queue = Some(queue);
        Ok(true)
    }

    fn resource(&self, lu: &LiveUpdate, monitor: &Monitor) -> Result<LuResource, String> {
        if lu.spec.selector.kubernetes.is_some() {
            let Some(discovery) = monitor.last_kubernetes_discovery.clone() else {
                return Err("no kubernetes discovery".to_string());
            };
            return Ok(LuResource::Kubernetes {
                discovery,
                apply_status: monitor.last_kubernetes_apply_status.clone(),
                image_map: monitor.last_image_map.clone(),
            });
        }
        if lu.spec.selector.docker_compose.is_some() {
            let Some(service) = monitor.last_docker_compose_service.clone() else {
                return Err("no docker compose status".to_string());
            };
            return Ok(LuResource::DockerCompose { service });
        }
        Err("no valid selector".to_string())
    }

    /// Convert the currently tracked state into a set of inputs to the
    /// updater, then apply them.
    async fn maybe_sync(&self, lu: &LiveUpdate, monitor: &mut Monitor) -> LiveUpdateStatus {
        let mut status = LiveUpdateStatus::default();

        let res = match self.resource(lu, monitor) {
            Ok(res) => res,
            Err(message) => {
                status.failed = Some(create_failed_state(lu, "Invalid", &message));
                return status;
            }
        };

        let manifest_name = annotation(lu, ANNOTATION_MANIFEST);
        let update_mode = annotation(lu, ANNOTATION_UPDATE_MODE);
        let in_queue = !manifest_name.is_empty()
            && monitor
                .last_trigger_queue
                .as_ref()
                .is_some_and(|queue| in_trigger_queue(queue, manifest_name));
        // In manual mode, always wait for a trigger before updating
        // anything.
        let is_waiting_on_trigger = update_mode == UPDATE_MODE_MANUAL && !in_queue;

        garbage_collect_file_changes(&res, monitor);
        garbage_collect_monitor_containers(&res, monitor);

        // If any selected container carries a sticky failure, surface it.
        // It's not important to figure out why.
        res.visit_selected_containers(|pod, container| {
            let key = MonitorContainerKey {
                container_id: container.id.clone(),
                pod_name: pod.name.clone(),
                namespace: pod.namespace.clone(),
            };
            if let Some(c_status) = monitor.containers.get(&key) {
                if !c_status.failed_reason.is_empty() {
                    status.failed = Some(create_failed_state(
                        lu,
                        &c_status.failed_reason,
                        &c_status.failed_message,
                    ));
                    return true;
                }
            }
            false
        });
        if status.failed.is_some() {
            return status;
        }

        let mut selected: Vec<(apis::Pod, DiscoveredContainer)> = Vec::new();
        res.visit_selected_containers(|pod, container| {
            selected.push((pod.clone(), container.clone()));
            false
        });

        // Walk every selected container, recording waiting states and
        // collecting the ones ready to receive the sync.
        let mut terminated_pod_name = String::new();
        let mut has_any_files_to_sync = false;
        let mut union_files: Vec<String> = Vec::new();
        let mut batch_high_water_mark: Option<DateTime<Utc>> = None;
        let mut candidates: Vec<ApplyCandidate> = Vec::new();

        for (pod, c_info) in &selected {
            let key = MonitorContainerKey {
                container_id: c_info.id.clone(),
                pod_name: pod.name.clone(),
                namespace: pod.namespace.clone(),
            };
            let c_monitor = monitor.containers.get(&key).cloned().unwrap_or_default();

            let high_water_mark = c_monitor.last_file_time_synced.unwrap_or(self.started_time);

            let mut files_changed: Vec<String> = Vec::new();
            let mut new_high_water_mark = high_water_mark;
            let mut new_low_water_mark: Option<DateTime<Utc>> = None;
            for source in monitor.sources.values() {
                for (file, mod_time) in &source.mod_time_by_path {
                    if *mod_time > high_water_mark {
                        files_changed.push(file.clone());
                        if new_low_water_mark.is_none_or(|low| *mod_time < low) {
                            new_low_water_mark = Some(*mod_time);
                        }
                        if *mod_time > new_high_water_mark {
                            new_high_water_mark = *mod_time;
                        }
                    }
                }
            }
            files_changed.sort();
            files_changed.dedup();
            if !files_changed.is_empty() {
                has_any_files_to_sync = true;
            }

            // Completed pods and terminated containers are skipped here;
            // whether that's fatal is decided after the loop.
            if pod.phase == POD_PHASE_SUCCEEDED
                || pod.phase == POD_PHASE_FAILED
                || c_info.state.terminated.is_some()
            {
                if terminated_pod_name.is_empty() {
                    terminated_pod_name = pod.name.clone();
                }
                continue;
            }

            // "No container id" reads as a waiting state; terminated
            // states were caught above.
            let mut waiting: Option<LiveUpdateContainerStateWaiting> = None;
            if c_info.state.running.is_none() || c_info.id.is_empty() {
                waiting = Some(LiveUpdateContainerStateWaiting {
                    reason: "ContainerWaiting".to_string(),
                    message: "Waiting for container to start".to_string(),
                });
            } else if is_waiting_on_trigger {
                waiting = Some(LiveUpdateContainerStateWaiting {
                    reason: "Trigger".to_string(),
                    message: "Only updates on manual trigger".to_string(),
                });
            }

            let (plan, plan_failed) = create_live_update_plan(lu, &monitor.spec, &files_changed);

            if let Some(failed) = plan_failed {
                // The plan told us to stop updating; the whole live
                // update is unrecoverable.
                record_container_failure(monitor, &key, &failed, new_low_water_mark);
                status.failed = Some(failed);
                status.containers.clear();
                return status;
            }

            if plan.sync_paths.is_empty() {
                // Nothing relevant changed; keep a record of the
                // container and wait for more events.
                status.containers.push(LiveUpdateContainerStatus {
                    container_name: c_info.name.clone(),
                    container_id: c_info.id.clone(),
                    pod_name: pod.name.clone(),
                    namespace: pod.namespace.clone(),
                    last_file_time_synced: c_monitor.last_file_time_synced,
                    last_exec_error: String::new(),
                    waiting,
                });
                continue;
            }

            // The plan has files to sync; check the container can receive
            // them. A crash-looping container might not stay up long
            // enough for an update to land.
            if c_info
                .state
                .waiting
                .as_ref()
                .is_some_and(|w| w.reason == CRASH_LOOP_BACK_OFF)
            {
                let failed = create_failed_state(
                    lu,
                    CRASH_LOOP_BACK_OFF,
                    &format!(
                        "Cannot live update because container crashing. Pod: {}",
                        pod.name
                    ),
                );
                record_container_failure(monitor, &key, &failed, new_low_water_mark);
                status.failed = Some(failed);
                status.containers.clear();
                return status;
            }

            if let Some(waiting) = waiting {
                status.containers.push(LiveUpdateContainerStatus {
                    container_name: c_info.name.clone(),
                    container_id: c_info.id.clone(),
                    pod_name: pod.name.clone(),
                    namespace: pod.namespace.clone(),
                    last_file_time_synced: c_monitor.last_file_time_synced,
                    last_exec_error: String::new(),
                    waiting: Some(waiting),
                });
                continue;
            }

            for file in &files_changed {
                if !union_files.contains(file) {
                    union_files.push(file.clone());
                }
            }
            if batch_high_water_mark.is_none_or(|high| new_high_water_mark > high) {
                batch_high_water_mark = Some(new_high_water_mark);
            }
            candidates.push(ApplyCandidate {
                container: Container {
                    container_id: c_info.id.clone(),
                    container_name: c_info.name.clone(),
                    pod_name: pod.name.clone(),
                    namespace: pod.namespace.clone(),
                },
                key,
                new_low_water_mark,
            });
        }

        if !candidates.is_empty() {
            union_files.sort();

            // All candidate containers get the same plan so their file
            // state stays consistent.
            let (plan, plan_failed) = create_live_update_plan(lu, &monitor.spec, &union_files);
            if let Some(failed) = plan_failed {
                for candidate in &candidates {
                    record_container_failure(
                        monitor,
                        &candidate.key,
                        &failed,
                        candidate.new_low_water_mark,
                    );
                }
                status.failed = Some(failed);
                status.containers.clear();
                return status;
            }

            self.dispatch_start_build_action(lu, &union_files);

            let mut update_status = self
                .apply_internal(
                    &monitor.spec,
                    Input {
                        is_docker_compose: lu.spec.selector.docker_compose.is_some(),
                        changed_files: plan.sync_paths,
                        run_steps: plan.run_steps,
                        containers: candidates
                            .iter()
                            .map(|candidate| candidate.container.clone())
                            .collect(),
                        last_file_time_synced: batch_high_water_mark,
                    },
                )
                .await;
            adjust_failed_state_timestamps(lu, &mut update_status);

            if let Some(failed) = update_status.failed.take() {
                for candidate in &candidates {
                    record_container_failure(
                        monitor,
                        &candidate.key,
                        &failed,
                        candidate.new_low_water_mark,
                    );
                }
                status.failed = Some(failed);
                status.containers.clear();
            } else {
                for candidate in &candidates {
                    let c_monitor = monitor.containers.entry(candidate.key.clone()).or_default();
                    c_monitor.last_file_time_synced = batch_high_water_mark;
                }
                status.containers.extend(update_status.containers);
            }

            self.dispatch_complete_build_action(lu, &status);
            return status;
        }

        // If the only containers we're connected to are terminated, the
        // pod either completed for good or is being replaced. We can't
        // tell which, so assume the former rather than wait forever.
        if status.failed.is_none()
            && !terminated_pod_name.is_empty()
            && has_any_files_to_sync
            && status.containers.is_empty()
        {
            status.failed = Some(create_failed_state(
                lu,
                "Terminated",
                &format!(
                    "Container for live update is stopped. Pod name: {terminated_pod_name}"
                ),
            ));
        }

        status
    }

    /// Like apply, but doesn't write the status to the apiserver.
    async fn apply_internal(&self, spec: &LiveUpdateSpec, input: Input) -> LiveUpdateStatus {
        let mut result = LiveUpdateStatus::default();
        let updater = self.container_updater(input.is_docker_compose);
        let names: Vec<String> = input
            .containers
            .iter()
            .map(Container::display_name)
            .collect();

        let hot_reload = !spec.restart;

        let (to_remove, to_archive) = match missing_local_paths(&input.changed_files) {
            Ok(split) => split,
            Err(err) => {
                result.failed = Some(plain_failed("Invalid", &format!("Mapping paths: {err}")));
                return result;
            }
        };

        if !to_remove.is_empty() {
            info!(
                "Will delete {} file(s) from container(s): {}",
                to_remove.len(),
                names.join(", ")
            );
            for mapping in &to_remove {
                info!(
                    "- '{}' (matched local path: '{}')",
                    mapping.container_path,
                    mapping.local_path.display()
                );
            }
        }
        if !to_archive.is_empty() {
            info!(
                "Will copy {} file(s) to container(s): {}",
                to_archive.len(),
                names.join(", ")
            );
            for mapping in &to_archive {
                info!("- {}", mapping.pretty());
            }
        }

        let paths_to_delete: Vec<String> = to_remove
            .iter()
            .map(|mapping| mapping.container_path.clone())
            .collect();

        let mut last_exec_error_status: Option<LiveUpdateContainerStatus> = None;
        for c_info in &input.containers {
            let archive = match container_update::tar_archive_for_paths(&to_archive) {
                Ok(archive) => archive,
                Err(err) => {
                    result.failed = Some(plain_failed(
                        "UpdateFailed",
                        &format!("Building archive: {err}"),
                    ));
                    return result;
                }
            };

            let update_result = updater
                .update_container(
                    c_info,
                    archive,
                    &paths_to_delete,
                    &input.run_steps,
                    hot_reload,
                )
                .await;

            let mut c_status = LiveUpdateContainerStatus {
                container_name: c_info.container_name.clone(),
                container_id: c_info.container_id.clone(),
                pod_name: c_info.pod_name.clone(),
                namespace: c_info.namespace.clone(),
                last_file_time_synced: Some(
                    input.last_file_time_synced.unwrap_or_else(Utc::now),
                ),
                last_exec_error: String::new(),
                waiting: None,
            };

            match update_result {
                Err(err) if err.is_run_step_failure() => {
                    // Keep running updates so all containers end up with
                    // the same files even though the runs don't succeed.
                    info!(
                        "  → Failed to update container {}: {}",
                        c_info.display_name(),
                        err
                    );
                    c_status.last_exec_error = err.to_string();
                    last_exec_error_status = Some(c_status.clone());
                }
                Err(err) => {
                    // Not the user's fault: an infrastructure error.
                    // Bail, and fall back to a full build.
                    let message = if !c_status.pod_name.is_empty() {
                        format!("Updating pod {}: {}", c_status.pod_name, err)
                    } else {
                        format!("Updating container {}: {}", c_info.display_name(), err)
                    };
                    result.failed = Some(plain_failed("UpdateFailed", &message));
                    return result;
                }
                Ok(()) => {
                    info!("  → Container {} updated!", c_info.display_name());
                    if let Some(failed_status) = &last_exec_error_status {
                        // This update succeeded, but an earlier one
                        // failed on a run step; replicas now disagree.
                        result.failed = Some(plain_failed(
                            "PodsInconsistent",
                            &format!(
                                "Pods in inconsistent state. Success: pod {}. Failure: pod {}. Error: {}",
                                c_status.pod_name,
                                failed_status.pod_name,
                                failed_status.last_exec_error
                            ),
                        ));
                        return result;
                    }
                }
            }

            result.containers.push(c_status);
        }
        result
    }

    fn dispatch_start_build_action(&self, lu: &LiveUpdate, files_changed: &[String]) {
        let manifest_name = annotation(lu, ANNOTATION_MANIFEST).to_string();
        let span_id = annotation(lu, ANNOTATION_SPAN_ID).to_string();

        info!(
            "{}: {} file(s) changed: {}",
            manifest_name,
            files_changed.len(),
            format_file_change_list(files_changed)
        );

        self.dispatcher.dispatch(Action::BuildStarted {
            manifest_name,
            start_time: Utc::now(),
            files_changed: files_changed.to_vec(),
            reason: BUILD_REASON_CHANGED_FILES,
            span_id,
            source: LIVE_UPDATE_SOURCE,
        });
    }

    fn dispatch_complete_build_action(&self, lu: &LiveUpdate, new_status: &LiveUpdateStatus) {
        let error = new_status
            .failed
            .as_ref()
            .map(|failed| failed.message.clone())
            .or_else(|| {
                new_status
                    .containers
                    .iter()
                    .find(|container| !container.last_exec_error.is_empty())
                    .map(|container| container.last_exec_error.clone())
            });

        self.dispatcher.dispatch(Action::BuildCompleted {
            manifest_name: annotation(lu, ANNOTATION_MANIFEST).to_string(),
            source: LIVE_UPDATE_SOURCE,
            span_id: annotation(lu, ANNOTATION_SPAN_ID).to_string(),
            result_set: std::collections::BTreeMap::new(),
            error,
        });
    }
}

/// ObjectNotFound is normal before the apply has created the discovery
/// object; everything else is worth a log line.
fn should_log_failure_reason(failed: &LiveUpdateStateFailed) -> bool {
    failed.reason != REASON_OBJECT_NOT_FOUND
}

fn annotation<'a>(lu: &'a LiveUpdate, key: &str) -> &'a str {
    lu.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
        .unwrap_or("")
}

/// Check for invalid selector states: exactly one family, with the
/// required name set.
fn ensure_selector_valid(lu: &LiveUpdate) -> Option<LiveUpdateStateFailed> {
    let selector = &lu.spec.selector;
    match (&selector.kubernetes, &selector.docker_compose) {
        (Some(_), Some(_)) => Some(create_failed_state(
            lu,
            "Invalid",
            "Only one selector family may be set",
        )),
        (Some(kubernetes), None) => {
            if kubernetes.discovery_name.is_empty() {
                Some(create_failed_state(
                    lu,
                    "Invalid",
                    "Kubernetes selector requires a discovery name",
                ))
            } else {
                None
            }
        }
        (None, Some(docker_compose)) => {
            if docker_compose.service.is_empty() {
                Some(create_failed_state(
                    lu,
                    "Invalid",
                    "DockerCompose selector requires a service",
                ))
            } else {
                None
            }
        }
        (None, None) => Some(create_failed_state(lu, "Invalid", "No valid selector")),
    }
}

/// Create the monitor that tracks a live update. If the spec changed,
/// wipe out all accumulated state.
fn ensure_monitor_exists<'a>(
    monitors: &'a mut HashMap<String, Monitor>,
    name: &str,
    lu: &LiveUpdate,
) -> &'a mut Monitor {
    let manifest_name = annotation(lu, ANNOTATION_MANIFEST).to_string();
    match monitors.entry(name.to_string()) {
        Entry::Occupied(mut entry) => {
            if entry.get().spec != lu.spec {
                entry.insert(Monitor::new(manifest_name, lu.spec.clone()));
            }
            entry.into_mut()
        }
        Entry::Vacant(entry) => entry.insert(Monitor::new(manifest_name, lu.spec.clone())),
    }
}

/// Classify the changed files, mapping stop conditions onto a failed
/// state.
fn create_live_update_plan(
    lu: &LiveUpdate,
    spec: &LiveUpdateSpec,
    files_changed: &[String],
) -> (LiveUpdatePlan, Option<LiveUpdateStateFailed>) {
    let plan = match LiveUpdatePlan::new(spec, files_changed) {
        Ok(plan) => plan,
        Err(err) => {
            let failed = create_failed_state(lu, "UpdateStopped", &format!("No update plan: {err}"));
            return (LiveUpdatePlan::default(), Some(failed));
        }
    };

    if !plan.stop_paths.is_empty() {
        let message = format!("Detected change to stop file {:?}", plan.stop_paths[0]);
        let failed = create_failed_state(lu, "UpdateStopped", &message);
        return (plan, Some(failed));
    }

    if !plan.no_match_paths.is_empty() {
        let message = format!(
            "Found file(s) not matching any sync (files: {})",
            format_file_change_list(&plan.no_match_paths)
        );
        let failed = create_failed_state(lu, "UpdateStopped", &message);
        return (plan, Some(failed));
    }

    (plan, None)
}

/// Create a new failed state, preserving the transition timestamp when
/// the reason is unchanged.
fn create_failed_state(lu: &LiveUpdate, reason: &str, message: &str) -> LiveUpdateStateFailed {
    let previous = lu.status.as_ref().and_then(|status| status.failed.as_ref());
    let last_transition_time = match previous {
        Some(previous) if previous.reason == reason => previous.last_transition_time,
        _ => Some(Utc::now()),
    };
    LiveUpdateStateFailed {
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time,
    }
}

/// A failed state with no transition time yet; the caller stamps it via
/// `adjust_failed_state_timestamps`.
fn plain_failed(reason: &str, message: &str) -> LiveUpdateStateFailed {
    LiveUpdateStateFailed {
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: None,
    }
}

/// Generate the correct transition time on the failed state.
fn adjust_failed_state_timestamps(lu: &LiveUpdate, status: &mut LiveUpdateStatus) {
    if let Some(failed) = &status.failed {
        status.failed = Some(create_failed_state(lu, &failed.reason, &failed.message));
    }
}

fn record_container_failure(
    monitor: &mut Monitor,
    key: &MonitorContainerKey,
    failed: &LiveUpdateStateFailed,
    low_water_mark: Option<DateTime<Utc>>,
) {
    let c_monitor = monitor.containers.entry(key.clone()).or_default();
    c_monitor.failed_reason = failed.reason.clone();
    c_monitor.failed_message = failed.message.clone();
    c_monitor.failed_low_water_mark = low_water_mark;
}

/// Drop file changes and failure memos that predate the latest build.
///
/// Determining the latest build is a bit tricky; the order of preference
/// is the source's image build start, then the resource's best start
/// time (apply start, oldest pod).
fn garbage_collect_file_changes(res: &LuResource, monitor: &mut Monitor) {
    let Monitor {
        spec,
        sources,
        containers,
        ..
    } = monitor;

    for source in &spec.sources {
        let Some(m_source) = sources.get_mut(&source.file_watch) else {
            continue;
        };

        let gc_time = m_source
            .last_image_status
            .as_ref()
            .and_then(|status| status.build_start_time)
            .or_else(|| res.best_start_time());
        let Some(gc_time) = gc_time else {
            continue;
        };

        m_source
            .mod_time_by_path
            .retain(|_, mod_time| *mod_time > gc_time);

        // Failures recorded before the latest build started are stale.
        // This isn't perfect: we may resync to a container the build is
        // about to replace, but we can't tell whether it will be
        // replaced (particularly when the image didn't change).
        for c_monitor in containers.values_mut() {
            if c_monitor
                .failed_low_water_mark
                .is_some_and(|low| low <= gc_time)
            {
                c_monitor.failed_low_water_mark = None;
                c_monitor.failed_reason.clear();
                c_monitor.failed_message.clear();
            }
        }
    }
}

/// Drop container monitors that are no longer selected. We don't care
/// why they're not being selected.
fn garbage_collect_monitor_containers(res: &LuResource, monitor: &mut Monitor) {
    let mut container_ids = std::collections::HashSet::new();
    res.visit_selected_containers(|_, container| {
        if !container.id.is_empty() {
            container_ids.insert(container.id.clone());
        }
        false
    });

    monitor
        .containers
        .retain(|key, _| container_ids.contains(&key.container_id));
}
