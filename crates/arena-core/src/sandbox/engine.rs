//! [`ContainerRuntime`] over the Docker Engine API (`docker` feature).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions, LogOutput, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, warn};

use super::error::{SandboxError, SandboxResult};
use super::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec};

/// Talks to the local Docker daemon through its socket.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> SandboxResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::RuntimeUnavailable(format!("failed to connect to Docker: {e}")))?;
        Ok(Self { docker })
    }

    /// Pull `image`; failures only warn so a locally built image still runs.
    async fn ensure_image(&self, image: &str) {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image = %image, status = %status, "docker pull");
                    }
                }
                Err(e) => {
                    warn!(image = %image, error = %e, "docker pull failed");
                    return;
                }
            }
        }
    }
}

/// Engine-API container definition for `spec`.
pub fn container_config(spec: &ContainerSpec) -> ContainerConfig<String> {
    let exposed: HashMap<String, HashMap<(), ()>> = spec
        .ports
        .iter()
        .map(|port| (format!("{port}/tcp"), HashMap::new()))
        .collect();
    let bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
        .ports
        .iter()
        .map(|port| {
            let binding = PortBinding {
                host_ip: None,
                host_port: Some(port.to_string()),
            };
            (format!("{port}/tcp"), Some(vec![binding]))
        })
        .collect();

    ContainerConfig {
        image: Some(spec.image.clone()),
        env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
        exposed_ports: Some(exposed),
        host_config: Some(HostConfig {
            port_bindings: Some(bindings),
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(error, BollardError::DockerResponseServerError { status_code: 404, .. })
}

fn docker_error(operation: &str, error: BollardError) -> SandboxError {
    SandboxError::Docker(format!("{operation}: {error}"))
}

#[async_trait]
impl ContainerRuntime for DockerEngine {
    async fn run(&self, spec: &ContainerSpec) -> SandboxResult<ContainerHandle> {
        self.ensure_image(&spec.image).await;

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| docker_error("create container", e))?;
        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| docker_error("start container", e))?;

        Ok(ContainerHandle {
            id: container.id,
            name: spec.name.clone(),
        })
    }

    async fn get(&self, name: &str) -> SandboxResult<Option<ContainerHandle>> {
        match self.docker.inspect_container(name, None::<InspectContainerOptions>).await {
            Ok(info) => Ok(Some(ContainerHandle {
                id: info.id.unwrap_or_else(|| name.to_string()),
                name: name.to_string(),
            })),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(docker_error("inspect container", e)),
        }
    }

    async fn exec(&self, handle: &ContainerHandle, command: &str) -> SandboxResult<Vec<u8>> {
        let options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(&handle.id, options)
            .await
            .map_err(|e| docker_error("create exec", e))?;

        let mut bytes = Vec::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| docker_error("start exec", e))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk.map_err(|e| docker_error("read exec output", e))? {
                        LogOutput::StdOut { message }
                        | LogOutput::StdErr { message }
                        | LogOutput::Console { message }
                        | LogOutput::StdIn { message } => bytes.extend_from_slice(&message),
                    }
                }
            }
            StartExecResults::Detached => {}
        }
        Ok(bytes)
    }

    async fn stop(&self, handle: &ContainerHandle, timeout: Duration) -> SandboxResult<()> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        self.docker
            .stop_container(&handle.id, Some(options))
            .await
            .map_err(|e| docker_error("stop container", e))
    }
}
