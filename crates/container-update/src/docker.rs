//! Docker-CLI updater.

use crate::error::UpdateError;
use crate::updater::{Container, ContainerUpdater, RunStep};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Updates containers through the docker CLI: `docker exec` for deletes
/// and run steps, `docker cp` for the archive, `docker restart` when the
/// spec asks for a process restart. Used for Compose services and when
/// the container update mode is forced.
pub struct DockerUpdater {
    docker_bin: String,
}

impl DockerUpdater {
    pub fn new(docker_bin: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    /// Run one docker command, optionally feeding stdin, and return its
    /// exit code plus captured stderr.
    async fn docker(
        &self,
        args: Vec<String>,
        stdin: Option<&[u8]>,
    ) -> Result<(i32, String), UpdateError> {
        debug!(?args, "docker");

        let mut command = Command::new(&self.docker_bin);
        command
            .args(&args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        if let Some(bytes) = stdin {
            let mut writer = child
                .stdin
                .take()
                .ok_or_else(|| UpdateError::Infra("docker stdin unavailable".to_string()))?;
            writer.write_all(bytes).await?;
            writer.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok((output.status.code().unwrap_or(-1), stderr))
    }
}

#[async_trait]
impl ContainerUpdater for DockerUpdater {
    async fn update_container(
        &self,
        container: &Container,
        archive: Vec<u8>,
        to_delete: &[String],
        run_steps: &[RunStep],
        hot_reload: bool,
    ) -> Result<(), UpdateError> {
        let id = &container.container_id;

        if !to_delete.is_empty() {
            let mut args = vec![
                "exec".to_string(),
                id.clone(),
                "rm".to_string(),
                "-rf".to_string(),
                "--".to_string(),
            ];
            args.extend(to_delete.iter().cloned());
            let (code, stderr) = self.docker(args, None).await?;
            if code != 0 {
                return Err(UpdateError::Infra(format!(
                    "deleting paths in {}: {stderr}",
                    container.display_name()
                )));
            }
        }

        // `docker cp -` unpacks a tar stream from stdin at the given root.
        let args = vec!["cp".to_string(), "-".to_string(), format!("{id}:/")];
        let (code, stderr) = self.docker(args, Some(&archive)).await?;
        if code != 0 {
            return Err(UpdateError::Infra(format!(
                "copying archive into {}: {stderr}",
                container.display_name()
            )));
        }

        for step in run_steps {
            let mut args = vec!["exec".to_string(), id.clone()];
            args.extend(step.args.iter().cloned());
            let (code, _stderr) = self.docker(args, None).await?;
            if code != 0 {
                return Err(UpdateError::RunStepFailed {
                    cmd: step.args.join(" "),
                    exit_code: code,
                });
            }
        }

        if !hot_reload {
            let args = vec!["restart".to_string(), id.clone()];
            let (code, stderr) = self.docker(args, None).await?;
            if code != 0 {
                return Err(UpdateError::Infra(format!(
                    "restarting {}: {stderr}",
                    container.display_name()
                )));
            }
        }

        Ok(())
    }
}
