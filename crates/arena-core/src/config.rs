//! Orchestrator settings, agent roster loading and launch environment.
//!
//! [`OrchestratorSettings`] carries every retry interval and timeout budget
//! used by the orchestration flow. Defaults match a local development setup
//! (backend on `:9000`, frontend on `:5174`).
//!
//! The roster is a TOML file of `[[agents]]` tables:
//!
//! ```toml
//! [[agents]]
//! name = "Green Agent"
//! card = "scenarios/green_agent_card.toml"
//! launcher_port = 9030
//! agent_port = 9031
//! model_type = "openai"
//! model_name = "o4-mini"
//! is_green = true
//!
//! [[agents.participant_requirements]]
//! role = "red_agent"
//! name = "prompt_injector"
//! participant_agent = "Red Agent"
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::domain::AgentConfig;

/// Errors raised while loading configuration. All of them are setup errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read roster {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid roster: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("roster contains no agents")]
    EmptyRoster,

    #[error("duplicate agent name in roster: {0}")]
    DuplicateAgent(String),

    #[error("port {port} is used by both `{first}` and `{second}`")]
    PortCollision {
        port: u16,
        first: String,
        second: String,
    },

    #[error("{0} not set in environment")]
    MissingCredential(String),
}

/// Result type for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Budgets and endpoints for one orchestration run.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub backend_url: String,
    pub frontend_url: String,
    /// Host used to build the externally reachable agent and launcher URLs.
    pub public_host: String,
    /// Agent launcher executable.
    pub launcher_program: PathBuf,
    /// Working directory of launched agents; card and tool paths resolve against it.
    pub launcher_workdir: PathBuf,
    /// When set, each agent's stdout/stderr is captured into `<dir>/<agent>.log`.
    pub agent_log_dir: Option<PathBuf>,
    pub battle_max_wait: Duration,
    pub battle_poll_interval: Duration,
    pub readiness_timeout: Duration,
    pub readiness_interval: Duration,
    /// Per-request timeout of one readiness probe.
    pub probe_timeout: Duration,
    /// Per-request timeout for backend calls.
    pub request_timeout: Duration,
    pub spawn_stagger: Duration,
    /// Extra wait between readiness probing and registration.
    pub settle_delay: Duration,
    pub shutdown_grace: Duration,
    pub primary_key_var: String,
    pub secondary_key_var: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:9000".to_string(),
            frontend_url: "http://localhost:5174".to_string(),
            public_host: "localhost".to_string(),
            launcher_program: PathBuf::from("agentbeats"),
            launcher_workdir: PathBuf::from("."),
            agent_log_dir: None,
            battle_max_wait: Duration::from_secs(90),
            battle_poll_interval: Duration::from_secs(3),
            readiness_timeout: Duration::from_secs(30),
            readiness_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            spawn_stagger: Duration::from_secs(2),
            settle_delay: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
            primary_key_var: "OPENAI_API_KEY".to_string(),
            secondary_key_var: "OPENROUTER_API_KEY".to_string(),
        }
    }
}

impl OrchestratorSettings {
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    pub fn with_frontend_url(mut self, url: impl Into<String>) -> Self {
        self.frontend_url = url.into();
        self
    }

    pub fn with_public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = host.into();
        self
    }

    pub fn with_launcher(mut self, program: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        self.launcher_program = program.into();
        self.launcher_workdir = workdir.into();
        self
    }

    pub fn with_agent_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.agent_log_dir = dir;
        self
    }

    /// Battle polling budget: fixed interval, total wait.
    pub fn with_battle_polling(mut self, interval: Duration, max_wait: Duration) -> Self {
        self.battle_poll_interval = interval;
        self.battle_max_wait = max_wait;
        self
    }

    /// Readiness budget: total timeout per axis, retry interval, per-probe timeout.
    pub fn with_readiness(mut self, timeout: Duration, interval: Duration, probe: Duration) -> Self {
        self.readiness_timeout = timeout;
        self.readiness_interval = interval;
        self.probe_timeout = probe;
        self
    }

    pub fn with_spawn_stagger(mut self, stagger: Duration) -> Self {
        self.spawn_stagger = stagger;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Frontend page of a created battle.
    pub fn battle_url(&self, battle_id: &crate::domain::BattleId) -> String {
        format!("{}/battles/{}", self.frontend_url.trim_end_matches('/'), battle_id)
    }
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    agents: Vec<AgentConfig>,
}

/// Validated, ordered list of agents for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Roster {
    agents: Vec<AgentConfig>,
}

impl Roster {
    /// Build a roster from already-parsed agent configs.
    pub fn new(agents: Vec<AgentConfig>) -> Result<Self> {
        validate(&agents)?;
        Ok(Self { agents })
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: RosterFile = toml::from_str(text)?;
        Self::new(file.agents)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn agents(&self) -> &[AgentConfig] {
        &self.agents
    }

    pub fn get(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }
}

fn validate(agents: &[AgentConfig]) -> Result<()> {
    if agents.is_empty() {
        return Err(ConfigError::EmptyRoster);
    }

    let mut names = HashSet::new();
    for agent in agents {
        if !names.insert(agent.name.as_str()) {
            return Err(ConfigError::DuplicateAgent(agent.name.clone()));
        }
    }

    let mut ports: HashMap<u16, &str> = HashMap::new();
    for agent in agents {
        for port in [agent.launcher_port, agent.agent_port] {
            if let Some(first) = ports.insert(port, &agent.name) {
                return Err(ConfigError::PortCollision {
                    port,
                    first: first.to_string(),
                    second: agent.name.clone(),
                });
            }
        }
    }

    // Requirement bindings are advisory; unresolved ones are skipped when
    // opponents are resolved.
    for agent in agents {
        for req in &agent.participant_requirements {
            if !names.contains(req.participant_agent.as_str()) {
                warn!(
                    agent = %agent.name,
                    requirement = %req.name,
                    participant = %req.participant_agent,
                    required = req.required,
                    "requirement references an agent missing from the roster"
                );
            }
        }
    }

    Ok(())
}

/// Environment handed to every launched agent.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchEnv {
    vars: HashMap<String, String>,
}

impl LaunchEnv {
    /// Copy `vars`, requiring `primary` and defaulting `secondary` to its value.
    pub fn from_vars(
        vars: impl IntoIterator<Item = (String, String)>,
        primary: &str,
        secondary: &str,
    ) -> Result<Self> {
        let mut vars: HashMap<String, String> = vars.into_iter().collect();
        let key = vars
            .get(primary)
            .cloned()
            .ok_or_else(|| ConfigError::MissingCredential(primary.to_string()))?;
        vars.entry(secondary.to_string()).or_insert(key);
        Ok(Self { vars })
    }

    /// Copy the current process environment.
    pub fn from_process_env(settings: &OrchestratorSettings) -> Result<Self> {
        Self::from_vars(
            std::env::vars(),
            &settings.primary_key_var,
            &settings.secondary_key_var,
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }
}
