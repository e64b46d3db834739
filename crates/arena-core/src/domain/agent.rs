//! Agent descriptors, backend identities and resolved opponents.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Role keyword used by the name-based fallback when a green agent declares
/// no participant requirements.
pub const BLUE_KEYWORD: &str = "blue";
pub const BLUE_ROLE: &str = "blue_agent";
pub const RED_ROLE: &str = "red_agent";

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_required() -> bool {
    true
}

/// Static descriptor of one agent in the roster. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name, also the key of the identity map.
    pub name: String,
    /// Agent descriptor file, relative to the launcher working directory.
    pub card: PathBuf,
    #[serde(default = "default_host")]
    pub launcher_host: String,
    pub launcher_port: u16,
    #[serde(default = "default_host")]
    pub agent_host: String,
    pub agent_port: u16,
    pub model_type: String,
    pub model_name: String,
    /// Tool modules handed to the launcher with `--tool`.
    #[serde(default)]
    pub tools: Vec<PathBuf>,
    /// Capability-server URLs handed to the launcher with `--mcp`.
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    /// Marks the scoring ("green") agent.
    #[serde(default)]
    pub is_green: bool,
    #[serde(default)]
    pub participant_requirements: Vec<ParticipantRequirement>,
}

impl AgentConfig {
    /// True when the agent declares structured opponent requirements.
    pub fn has_requirements(&self) -> bool {
        !self.participant_requirements.is_empty()
    }
}

/// One opponent slot declared by a green agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRequirement {
    /// Role tag the backend uses, e.g. `red_agent`.
    pub role: String,
    /// Opponent name inside the battle, e.g. `prompt_injector`.
    pub name: String,
    /// Advisory only: an unregistered required participant is skipped with a warning.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Roster name of the agent that fills this slot.
    pub participant_agent: String,
}

/// Backend-issued agent identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Roster name to backend identity. Absence means "not registered".
pub type IdentityMap = HashMap<String, AgentId>;

/// A resolved opponent entry of a battle-creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opponent {
    pub name: String,
    pub agent_id: AgentId,
    pub role: String,
}

/// Infer an opponent role from its display name.
///
/// Only used when the green agent has no participant requirements.
pub fn infer_role(name: &str) -> &'static str {
    if name.to_lowercase().contains(BLUE_KEYWORD) {
        BLUE_ROLE
    } else {
        RED_ROLE
    }
}
