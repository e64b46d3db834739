//! Agent process supervision.
//!
//! Each roster entry is started as a child process of the agent launcher.
//! A process moves through a fixed state machine:
//!
//! ```text
//! Spawned ──mark_ready──▶ Ready
//!    │                      │
//!    └──────shutdown────────┴──▶ Terminating ──▶ Reaped
//! ```
//!
//! [`Supervisor::shutdown`] asks every live child to stop (SIGTERM on unix),
//! waits a bounded grace period, then force-kills and reaps it. Children are
//! also spawned with `kill_on_drop` so none outlives the supervisor.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::{LaunchEnv, OrchestratorSettings};
use crate::domain::AgentConfig;
use crate::obs::emit_agent_spawned;

/// Errors raised while starting agent processes.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to spawn agent `{agent}`: {source}")]
    Spawn {
        agent: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Lifecycle state of a supervised agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Spawned,
    Ready,
    Terminating,
    Reaped,
}

/// One launched agent.
#[derive(Debug)]
pub struct AgentProcess {
    name: String,
    child: Child,
    state: ProcessState,
    exit_status: Option<ExitStatus>,
}

impl AgentProcess {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// `Spawned → Ready`. Other states are left untouched.
    pub fn mark_ready(&mut self) {
        if self.state == ProcessState::Spawned {
            self.state = ProcessState::Ready;
        }
    }

    /// Stop the process: graceful request, bounded wait, then forced kill.
    async fn terminate(&mut self, grace: Duration) {
        if self.state == ProcessState::Reaped {
            return;
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(agent = %self.name, ?status, "process already exited");
                self.reaped(status);
                return;
            }
            Ok(None) => {}
            Err(err) => warn!(agent = %self.name, error = %err, "could not query process status"),
        }

        self.state = ProcessState::Terminating;
        info!(agent = %self.name, "terminating agent");
        self.request_stop();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => self.reaped(status),
            Ok(Err(err)) => {
                warn!(agent = %self.name, error = %err, "wait failed, killing");
                self.force_kill().await;
            }
            Err(_) => {
                warn!(agent = %self.name, grace_ms = grace.as_millis() as u64, "grace period elapsed, killing");
                self.force_kill().await;
            }
        }
    }

    #[cfg(unix)]
    fn request_stop(&mut self) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id().and_then(|p| i32::try_from(p).ok()) else {
            return;
        };
        if let Err(err) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!(agent = %self.name, pid, error = %err, "SIGTERM failed");
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) {
        if let Err(err) = self.child.start_kill() {
            warn!(agent = %self.name, error = %err, "stop request failed");
        }
    }

    async fn force_kill(&mut self) {
        if let Err(err) = self.child.start_kill() {
            warn!(agent = %self.name, error = %err, "kill failed");
        }
        match self.child.wait().await {
            Ok(status) => self.reaped(status),
            Err(err) => {
                warn!(agent = %self.name, error = %err, "could not reap process");
                self.state = ProcessState::Reaped;
            }
        }
    }

    fn reaped(&mut self, status: ExitStatus) {
        self.exit_status = Some(status);
        self.state = ProcessState::Reaped;
    }
}

/// Starts agents and guarantees their termination.
#[derive(Debug)]
pub struct Supervisor {
    program: PathBuf,
    workdir: PathBuf,
    log_dir: Option<PathBuf>,
    stagger: Duration,
    grace: Duration,
    processes: Vec<AgentProcess>,
}

impl Supervisor {
    pub fn new(settings: &OrchestratorSettings) -> Self {
        Self {
            program: settings.launcher_program.clone(),
            workdir: settings.launcher_workdir.clone(),
            log_dir: settings.agent_log_dir.clone(),
            stagger: settings.spawn_stagger,
            grace: settings.shutdown_grace,
            processes: Vec::new(),
        }
    }

    /// Launcher arguments for one agent.
    pub fn launch_args(&self, agent: &AgentConfig) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            self.workdir.join(&agent.card).display().to_string(),
            "--launcher_host".to_string(),
            agent.launcher_host.clone(),
            "--launcher_port".to_string(),
            agent.launcher_port.to_string(),
            "--agent_host".to_string(),
            agent.agent_host.clone(),
            "--agent_port".to_string(),
            agent.agent_port.to_string(),
            "--model_type".to_string(),
            agent.model_type.clone(),
            "--model_name".to_string(),
            agent.model_name.clone(),
        ];
        for tool in &agent.tools {
            args.push("--tool".to_string());
            args.push(self.workdir.join(tool).display().to_string());
        }
        for mcp in &agent.mcp_servers {
            args.push("--mcp".to_string());
            args.push(mcp.clone());
        }
        args
    }

    /// Start one agent.
    pub async fn spawn(&mut self, agent: &AgentConfig, env: &LaunchEnv) -> Result<()> {
        let args = self.launch_args(agent);
        info!(agent = %agent.name, command = %format!("{} {}", self.program.display(), args.join(" ")), "starting agent");

        let (stdout, stderr) = self.output_streams(&agent.name)?;
        let child = Command::new(&self.program)
            .args(&args)
            .current_dir(&self.workdir)
            .env_clear()
            .envs(env.vars())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                agent: agent.name.clone(),
                source,
            })?;

        emit_agent_spawned(&agent.name, child.id());
        self.processes.push(AgentProcess {
            name: agent.name.clone(),
            child,
            state: ProcessState::Spawned,
            exit_status: None,
        });
        Ok(())
    }

    /// Start every agent in order, pausing `stagger` between consecutive spawns.
    pub async fn spawn_all(&mut self, agents: &[AgentConfig], env: &LaunchEnv) -> Result<()> {
        for (i, agent) in agents.iter().enumerate() {
            if i > 0 && !self.stagger.is_zero() {
                tokio::time::sleep(self.stagger).await;
            }
            self.spawn(agent, env).await?;
        }
        Ok(())
    }

    pub fn mark_ready(&mut self, name: &str) {
        if let Some(process) = self.processes.iter_mut().find(|p| p.name == name) {
            process.mark_ready();
        }
    }

    pub fn processes(&self) -> &[AgentProcess] {
        &self.processes
    }

    /// Terminate every process that has not been reaped yet.
    pub async fn shutdown(&mut self) {
        if self.processes.is_empty() {
            return;
        }
        info!(count = self.processes.len(), "stopping agents");
        for process in &mut self.processes {
            process.terminate(self.grace).await;
        }
        info!("all agents stopped");
    }

    fn output_streams(&self, agent: &str) -> Result<(Stdio, Stdio)> {
        let Some(dir) = &self.log_dir else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        let path = log_path(dir, agent);
        let open = |path: &Path| -> Result<std::fs::File> {
            std::fs::create_dir_all(dir)
                .and_then(|_| std::fs::File::create(path))
                .map_err(|source| SupervisorError::LogFile {
                    path: path.to_path_buf(),
                    source,
                })
        };
        let stdout = open(&path)?;
        let stderr = stdout.try_clone().map_err(|source| SupervisorError::LogFile {
            path: path.clone(),
            source,
        })?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }
}

/// `<dir>/<agent name as lowercase snake case>.log`
fn log_path(dir: &Path, agent: &str) -> PathBuf {
    let slug: String = agent
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{slug}.log"))
}
