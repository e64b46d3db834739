//! Battle-scoped sandboxes and command execution inside them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::error::{SandboxError, SandboxResult};
use super::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec};
use crate::domain::BattleId;
use crate::journal;

/// Journal key of the command history.
pub const HISTORY_KEY: &str = "cmd_logs";

#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSettings {
    pub image: String,
    /// Container name is `{name_prefix}{battle_id}`.
    pub name_prefix: String,
    pub port: u16,
    /// Directory of `cmd_history_{battle_id}.json`.
    pub log_dir: PathBuf,
    pub stop_timeout: Duration,
    /// Characters of output kept per history entry.
    pub history_limit: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: "ghcr.io/myorg/alfworld:latest".to_string(),
            name_prefix: "alfworld-".to_string(),
            port: 8666,
            log_dir: PathBuf::from("logs"),
            stop_timeout: Duration::from_secs(10),
            history_limit: 1000,
        }
    }
}

/// Result of [`SandboxBridge::execute`]. A missing sandbox is a value, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Full, untruncated command output.
    Output(String),
    /// Descriptive message naming the missing container.
    NotFound(String),
}

impl ExecOutcome {
    pub fn text(&self) -> &str {
        match self {
            ExecOutcome::Output(text) | ExecOutcome::NotFound(text) => text,
        }
    }
}

/// Registry entry of one battle.
#[derive(Debug, Clone)]
enum Slot {
    /// `run` is in flight; the slot is held so a second provision fails.
    Starting,
    Running(ContainerHandle),
}

/// Owns the battle → sandbox registry.
///
/// At most one handle is registered per battle. Entries only leave the
/// registry through [`SandboxBridge::teardown`] or a failed start. The lock
/// is never held while the runtime is called.
pub struct SandboxBridge<R> {
    runtime: R,
    settings: SandboxSettings,
    registry: Mutex<HashMap<BattleId, Slot>>,
}

impl<R: ContainerRuntime> SandboxBridge<R> {
    pub fn new(runtime: R, settings: SandboxSettings) -> Self {
        Self {
            runtime,
            settings,
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn container_name(&self, battle_id: &BattleId) -> String {
        format!("{}{}", self.settings.name_prefix, battle_id)
    }

    pub fn history_path(&self, battle_id: &BattleId) -> PathBuf {
        self.settings.log_dir.join(format!("cmd_history_{battle_id}.json"))
    }

    pub fn container_spec(&self, battle_id: &BattleId) -> ContainerSpec {
        ContainerSpec {
            image: self.settings.image.clone(),
            name: self.container_name(battle_id),
            env: vec![("DISPLAY".to_string(), ":0".to_string())],
            ports: vec![self.settings.port],
            auto_remove: true,
        }
    }

    /// Start and register the sandbox of `battle_id`.
    pub async fn provision(&self, battle_id: &BattleId) -> SandboxResult<ContainerHandle> {
        {
            let mut registry = self.registry.lock().await;
            if registry.contains_key(battle_id) {
                return Err(SandboxError::AlreadyProvisioned(battle_id.clone()));
            }
            registry.insert(battle_id.clone(), Slot::Starting);
        }

        let spec = self.container_spec(battle_id);
        info!(battle_id = %battle_id, container = %spec.name, image = %spec.image, "starting sandbox");
        let started = self.runtime.run(&spec).await;

        let mut registry = self.registry.lock().await;
        match started {
            Ok(handle) => {
                registry.insert(battle_id.clone(), Slot::Running(handle.clone()));
                Ok(handle)
            }
            Err(err) => {
                registry.remove(battle_id);
                Err(err)
            }
        }
    }

    /// True once the battle's sandbox has started.
    pub async fn is_provisioned(&self, battle_id: &BattleId) -> bool {
        matches!(self.registry.lock().await.get(battle_id), Some(Slot::Running(_)))
    }

    async fn running(&self, battle_id: &BattleId) -> Option<ContainerHandle> {
        match self.registry.lock().await.get(battle_id) {
            Some(Slot::Running(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Run `command` in the battle's sandbox on behalf of `agent`.
    ///
    /// The sandbox is looked up in the registry first, then by container
    /// name in the runtime. When neither knows it, nothing is executed or
    /// recorded and [`ExecOutcome::NotFound`] is returned.
    pub async fn execute(&self, battle_id: &BattleId, command: &str, agent: &str) -> SandboxResult<ExecOutcome> {
        let name = self.container_name(battle_id);
        let handle = match self.running(battle_id).await {
            Some(handle) => handle,
            None => match self.runtime.get(&name).await? {
                Some(handle) => handle,
                None => {
                    error!(battle_id = %battle_id, container = %name, "sandbox not found");
                    return Ok(ExecOutcome::NotFound(format!("container {name} not found")));
                }
            },
        };

        let raw = self.runtime.exec(&handle, command).await?;
        let output = decode_ignoring_invalid(&raw);
        self.record(battle_id, agent, command, &output).await;
        Ok(ExecOutcome::Output(output))
    }

    /// Stop and forget the battle's sandbox. A missing entry only warns.
    ///
    /// A sandbox that is still starting is left to its provisioner.
    pub async fn teardown(&self, battle_id: &BattleId) {
        let handle = {
            let mut registry = self.registry.lock().await;
            match registry.remove(battle_id) {
                Some(Slot::Running(handle)) => handle,
                Some(Slot::Starting) => {
                    registry.insert(battle_id.clone(), Slot::Starting);
                    warn!(battle_id = %battle_id, "sandbox is still starting, not stopping it");
                    return;
                }
                None => {
                    warn!(battle_id = %battle_id, "no sandbox recorded for battle");
                    return;
                }
            }
        };
        info!(battle_id = %battle_id, container = %handle.name, "stopping sandbox");
        if let Err(err) = self.runtime.stop(&handle, self.settings.stop_timeout).await {
            error!(battle_id = %battle_id, container = %handle.name, error = %err, "failed to stop sandbox");
        }
    }

    async fn record(&self, battle_id: &BattleId, agent: &str, command: &str, output: &str) {
        let kept: String = output.chars().take(self.settings.history_limit).collect();
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            "agent": agent,
            "command": command,
            "output": kept,
        });
        let path = self.history_path(battle_id);
        if let Err(err) = journal::append_entry(&path, HISTORY_KEY, entry).await {
            warn!(battle_id = %battle_id, error = %err, "failed to record command history");
        }
    }
}

/// UTF-8 decode that drops undecodable bytes instead of replacing them.
fn decode_ignoring_invalid(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}
