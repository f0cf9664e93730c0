//! Exec-channel updater for Kubernetes containers.

use crate::error::UpdateError;
use crate::updater::{Container, ContainerUpdater, RunStep};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Updates containers over the Kubernetes exec channel: `rm` for deletes,
/// `tar` fed over stdin for the archive, one exec per run step.
///
/// The exec channel has no way to restart a container's process, so specs
/// that ask for a restart must use the docker updater instead.
pub struct ExecUpdater {
    client: Client,
}

impl ExecUpdater {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn exec(
        &self,
        container: &Container,
        command: Vec<String>,
        stdin: Option<&[u8]>,
    ) -> Result<i32, UpdateError> {
        debug!(
            pod = %container.pod_name,
            container = %container.container_name,
            ?command,
            "exec"
        );

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &container.namespace);
        let params = AttachParams::default()
            .container(&container.container_name)
            .stdin(stdin.is_some())
            .stdout(true)
            .stderr(true);

        let mut attached = pods.exec(&container.pod_name, command, &params).await?;

        if let Some(bytes) = stdin {
            let mut writer = attached
                .stdin()
                .ok_or_else(|| UpdateError::Infra("exec stdin channel unavailable".to_string()))?;
            writer.write_all(bytes).await?;
            writer.shutdown().await?;
        }

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| UpdateError::Infra(e.to_string()))?;

        Ok(exit_code(status.as_ref()))
    }
}

/// Decode the exit code from the exec status frame. Non-zero exits are
/// reported as a "NonZeroExitCode" failure whose ExitCode cause carries
/// the code.
fn exit_code(status: Option<&Status>) -> i32 {
    let Some(status) = status else { return 0 };
    if status.status.as_deref() != Some("Failure") {
        return 0;
    }
    status
        .details
        .as_ref()
        .and_then(|details| details.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
        })
        .and_then(|cause| cause.message.as_deref())
        .and_then(|message| message.parse().ok())
        .unwrap_or(1)
}

#[async_trait]
impl ContainerUpdater for ExecUpdater {
    async fn update_container(
        &self,
        container: &Container,
        archive: Vec<u8>,
        to_delete: &[String],
        run_steps: &[RunStep],
        hot_reload: bool,
    ) -> Result<(), UpdateError> {
        if !hot_reload {
            return Err(UpdateError::RestartUnsupported("the exec updater"));
        }

        if !to_delete.is_empty() {
            let mut command = vec!["rm".to_string(), "-rf".to_string(), "--".to_string()];
            command.extend(to_delete.iter().cloned());
            let code = self.exec(container, command, None).await?;
            if code != 0 {
                return Err(UpdateError::Infra(format!(
                    "deleting paths in {} exited with code {code}",
                    container.display_name()
                )));
            }
        }

        let unpack = vec![
            "tar".to_string(),
            "-x".to_string(),
            "-f".to_string(),
            "-".to_string(),
            "-C".to_string(),
            "/".to_string(),
        ];
        let code = self.exec(container, unpack, Some(&archive)).await?;
        if code != 0 {
            return Err(UpdateError::Infra(format!(
                "unpacking archive in {} exited with code {code}",
                container.display_name()
            )));
        }

        for step in run_steps {
            let code = self.exec(container, step.args.clone(), None).await?;
            if code != 0 {
                return Err(UpdateError::RunStepFailed {
                    cmd: step.args.join(" "),
                    exit_code: code,
                });
            }
        }

        Ok(())
    }
}
