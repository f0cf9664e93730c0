//! Fake ContainerUpdater for unit testing
//!
//! Records every update call and can be primed to fail specific
//! containers, without requiring a cluster or a docker daemon.

use crate::error::UpdateError;
use crate::updater::{Container, ContainerUpdater, RunStep};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One recorded call to [`ContainerUpdater::update_container`].
#[derive(Debug, Clone)]
pub struct UpdateCall {
    pub container: Container,
    pub archive: Vec<u8>,
    pub to_delete: Vec<String>,
    pub run_steps: Vec<RunStep>,
    pub hot_reload: bool,
}

impl UpdateCall {
    /// Container paths of the entries in the recorded archive.
    pub fn archive_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut archive = tar::Archive::new(&self.archive[..]);
        if let Ok(entries) = archive.entries() {
            for entry in entries.flatten() {
                if let Ok(path) = entry.path() {
                    out.push(format!("/{}", path.display()));
                }
            }
        }
        out
    }
}

/// Fake updater for testing.
///
/// Errors are queued per container id and consumed in order; containers
/// with no queued error succeed.
#[derive(Clone, Default)]
pub struct FakeContainerUpdater {
    calls: Arc<Mutex<Vec<UpdateCall>>>,
    errors: Arc<Mutex<HashMap<String, Vec<UpdateError>>>>,
}

impl FakeContainerUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next update of the given container id.
    pub fn queue_error(&self, container_id: impl Into<String>, error: UpdateError) {
        self.errors
            .lock()
            .expect("errors lock")
            .entry(container_id.into())
            .or_default()
            .push(error);
    }

    /// Queue a run-step failure for the next update of the container.
    pub fn queue_run_step_failure(&self, container_id: impl Into<String>, exit_code: i32) {
        self.queue_error(
            container_id,
            UpdateError::RunStepFailed {
                cmd: "fake step".to_string(),
                exit_code,
            },
        );
    }

    pub fn calls(&self) -> Vec<UpdateCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl ContainerUpdater for FakeContainerUpdater {
    async fn update_container(
        &self,
        container: &Container,
        archive: Vec<u8>,
        to_delete: &[String],
        run_steps: &[RunStep],
        hot_reload: bool,
    ) -> Result<(), UpdateError> {
        self.calls.lock().expect("calls lock").push(UpdateCall {
            container: container.clone(),
            archive,
            to_delete: to_delete.to_vec(),
            run_steps: run_steps.to_vec(),
            hot_reload,
        });

        let mut errors = self.errors.lock().expect("errors lock");
        if let Some(queued) = errors.get_mut(&container.container_id) {
            if !queued.is_empty() {
                return Err(queued.remove(0));
            }
        }
        Ok(())
    }
}
