//! Backend HTTP surface.
//!
//! The backend owns agent identities and battle state. The orchestrator only
//! talks to it through [`BattleBackend`]:
//!
//! - `POST /agents` registers an agent and answers `201 {agent_id}`;
//! - `POST /battles` creates a battle and answers `201 {battle_id}`;
//! - `GET /battles/{id}` returns the current battle record;
//! - `POST /battles/{id}` accepts a progress event, any `2xx` is success.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{AgentConfig, AgentId, Battle, BattleId, Opponent, ParticipantRequirement};

/// Errors talking to the backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend answered {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("backend response is missing `{0}`")]
    MissingField(&'static str),
}

/// Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

/// Body of `POST /agents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub alias: String,
    pub agent_url: String,
    pub launcher_url: String,
    pub is_green: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_requirements: Option<Vec<ParticipantRequirement>>,
}

impl AgentRegistration {
    /// Registration for `agent` as reachable on `public_host`.
    ///
    /// URLs keep a trailing slash. Requirements are only sent for the
    /// green agent, and only when it declares some.
    pub fn for_agent(agent: &AgentConfig, public_host: &str) -> Self {
        let participant_requirements = (agent.is_green && agent.has_requirements())
            .then(|| agent.participant_requirements.clone());
        Self {
            alias: agent.name.clone(),
            agent_url: format!("http://{public_host}:{}/", agent.agent_port),
            launcher_url: format!("http://{public_host}:{}/", agent.launcher_port),
            is_green: agent.is_green,
            participant_requirements,
        }
    }
}

/// Body of `POST /battles`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleRequest {
    pub green_agent_id: AgentId,
    pub opponents: Vec<Opponent>,
    #[serde(default)]
    pub config: Value,
}

impl BattleRequest {
    pub fn new(green_agent_id: AgentId, opponents: Vec<Opponent>) -> Self {
        Self {
            green_agent_id,
            opponents,
            config: Value::Object(Default::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// BattleBackend
// ---------------------------------------------------------------------------

/// Operations the orchestrator needs from the backend.
#[async_trait]
pub trait BattleBackend: Send + Sync {
    /// Register one agent. Only a `201` yields an identity.
    async fn register_agent(&self, registration: &AgentRegistration) -> BackendResult<AgentId>;

    /// Create a battle. Only a `201` yields an identifier.
    async fn create_battle(&self, request: &BattleRequest) -> BackendResult<BattleId>;

    /// Fetch the current battle record.
    async fn fetch_battle(&self, battle_id: &BattleId) -> BackendResult<Battle>;

    /// Push one progress event for a battle.
    async fn post_battle_event(&self, battle_id: &BattleId, event: &Value) -> BackendResult<()>;
}

/// `reqwest` implementation of [`BattleBackend`].
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    http: reqwest::Client,
}

impl BackendClient {
    /// Client with its own connection pool and a per-request timeout.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> BackendResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("arena/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl BattleBackend for BackendClient {
    async fn register_agent(&self, registration: &AgentRegistration) -> BackendResult<AgentId> {
        let resp = self
            .http
            .post(self.url("/agents"))
            .json(registration)
            .send()
            .await?;
        let body = expect_status(resp, StatusCode::CREATED).await?;
        string_field(&body, "agent_id").map(AgentId)
    }

    async fn create_battle(&self, request: &BattleRequest) -> BackendResult<BattleId> {
        let resp = self
            .http
            .post(self.url("/battles"))
            .json(request)
            .send()
            .await?;
        let body = expect_status(resp, StatusCode::CREATED).await?;
        string_field(&body, "battle_id").map(BattleId)
    }

    async fn fetch_battle(&self, battle_id: &BattleId) -> BackendResult<Battle> {
        let resp = self
            .http
            .get(self.url(&format!("/battles/{battle_id}")))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(unexpected(status, resp).await);
        }
        let record: Value = resp.json().await?;
        Ok(Battle::from_record(battle_id.clone(), record))
    }

    async fn post_battle_event(&self, battle_id: &BattleId, event: &Value) -> BackendResult<()> {
        let resp = self
            .http
            .post(self.url(&format!("/battles/{battle_id}")))
            .json(event)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(unexpected(status, resp).await);
        }
        Ok(())
    }
}

async fn expect_status(resp: reqwest::Response, expected: StatusCode) -> BackendResult<Value> {
    let status = resp.status();
    if status != expected {
        return Err(unexpected(status, resp).await);
    }
    Ok(resp.json().await?)
}

async fn unexpected(status: StatusCode, resp: reqwest::Response) -> BackendError {
    BackendError::UnexpectedStatus {
        status: status.as_u16(),
        body: resp.text().await.unwrap_or_default(),
    }
}

fn string_field(body: &Value, field: &'static str) -> BackendResult<String> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(BackendError::MissingField(field))
}
