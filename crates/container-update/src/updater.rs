//! The ContainerUpdater contract.

use crate::error::UpdateError;
use async_trait::async_trait;

/// Identifies one running container in a workload. For Compose services
/// the pod name and namespace are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Container {
    pub container_id: String,
    pub container_name: String,
    pub pod_name: String,
    pub namespace: String,
}

impl Container {
    /// Short name for log lines.
    pub fn display_name(&self) -> String {
        if self.pod_name.is_empty() {
            return self.container_name.clone();
        }
        format!("{}/{}", self.pod_name, self.container_name)
    }
}

/// One command to run in the container after the sync lands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStep {
    pub args: Vec<String>,
}

/// Applies one update to one container.
///
/// Implementations must, in order: delete `to_delete` inside the
/// container, unpack `archive` (a plain tar stream) at the container
/// root preserving file modes and overwriting existing files, run each
/// step synchronously (a non-zero exit aborts the remaining steps), and
/// finally restart the container's main process unless `hot_reload` is
/// set.
///
/// Implementations are safe for concurrent calls on distinct containers;
/// callers never issue overlapping calls for the same container.
#[async_trait]
pub trait ContainerUpdater: Send + Sync {
    async fn update_container(
        &self,
        container: &Container,
        archive: Vec<u8>,
        to_delete: &[String],
        run_steps: &[RunStep],
        hot_reload: bool,
    ) -> Result<(), UpdateError>;
}
