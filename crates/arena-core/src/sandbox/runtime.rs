//! Container runtime seam and its `docker` CLI implementation.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::error::{SandboxError, SandboxResult};

/// What to start for one battle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub env: Vec<(String, String)>,
    /// Ports published on the host under the same number.
    pub ports: Vec<u16>,
    /// Remove the container once it stops.
    pub auto_remove: bool,
}

/// A running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// Container lifecycle operations, consumed only through start/get/exec/stop.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a detached container.
    async fn run(&self, spec: &ContainerSpec) -> SandboxResult<ContainerHandle>;

    /// Look up a container by name. `Ok(None)` when it does not exist.
    async fn get(&self, name: &str) -> SandboxResult<Option<ContainerHandle>>;

    /// Run `sh -c <command>` inside the container and return its raw output.
    async fn exec(&self, handle: &ContainerHandle, command: &str) -> SandboxResult<Vec<u8>>;

    async fn stop(&self, handle: &ContainerHandle, timeout: Duration) -> SandboxResult<()>;
}

/// [`ContainerRuntime`] driving the `docker` command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments of `docker run` for `spec`.
    pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string(), "--name".to_string(), spec.name.clone()];
        if spec.auto_remove {
            args.push("--rm".to_string());
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        for port in &spec.ports {
            args.push("-p".to_string());
            args.push(format!("{port}:{port}/tcp"));
        }
        args.push(spec.image.clone());
        args
    }

    async fn docker(&self, args: &[String]) -> SandboxResult<Output> {
        debug!(program = %self.program.display(), args = ?args, "invoking container runtime");
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SandboxError::RuntimeUnavailable(format!("{}: {e}", self.program.display())))
    }

    async fn checked(&self, args: &[String]) -> SandboxResult<String> {
        let output = self.docker(args).await?;
        if !output.status.success() {
            return Err(SandboxError::CommandFailed {
                command: format!("docker {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(&self, spec: &ContainerSpec) -> SandboxResult<ContainerHandle> {
        let id = self.checked(&Self::run_args(spec)).await?;
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    async fn get(&self, name: &str) -> SandboxResult<Option<ContainerHandle>> {
        let args = vec![
            "inspect".to_string(),
            "--type".to_string(),
            "container".to_string(),
            "--format".to_string(),
            "{{.Id}}".to_string(),
            name.to_string(),
        ];
        let output = self.docker(&args).await?;
        if output.status.success() {
            return Ok(Some(ContainerHandle {
                id: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                name: name.to_string(),
            }));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such") {
            Ok(None)
        } else {
            Err(SandboxError::CommandFailed {
                command: format!("docker {}", args.join(" ")),
                stderr: stderr.trim().to_string(),
            })
        }
    }

    async fn exec(&self, handle: &ContainerHandle, command: &str) -> SandboxResult<Vec<u8>> {
        let args = vec![
            "exec".to_string(),
            handle.id.clone(),
            "sh".to_string(),
            "-c".to_string(),
            command.to_string(),
        ];
        // A non-zero exit of the command is still output for the caller.
        let output = self.docker(&args).await?;
        let mut bytes = output.stdout;
        bytes.extend_from_slice(&output.stderr);
        Ok(bytes)
    }

    async fn stop(&self, handle: &ContainerHandle, timeout: Duration) -> SandboxResult<()> {
        let args = vec![
            "stop".to_string(),
            "-t".to_string(),
            timeout.as_secs().to_string(),
            handle.id.clone(),
        ];
        self.checked(&args).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let spec = ContainerSpec {
            image: "ghcr.io/myorg/alfworld:latest".to_string(),
            name: "alfworld-b-1".to_string(),
            env: vec![("DISPLAY".to_string(), ":0".to_string())],
            ports: vec![8666],
            auto_remove: true,
        };
        assert_eq!(
            DockerCli::run_args(&spec),
            vec![
                "run",
                "-d",
                "--name",
                "alfworld-b-1",
                "--rm",
                "-e",
                "DISPLAY=:0",
                "-p",
                "8666:8666/tcp",
                "ghcr.io/myorg/alfworld:latest",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_runtime_unavailable() {
        let cli = DockerCli::new("/nonexistent/docker");
        let err = cli.get("alfworld-b-1").await.unwrap_err();
        assert!(matches!(err, SandboxError::RuntimeUnavailable(_)));
    }
}
