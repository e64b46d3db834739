//! Readiness probing of launched agents.
//!
//! Two independent axes are polled per agent, each bounded by the same
//! timeout and retry interval:
//!
//! - the agent's self-description document must answer with a success status;
//! - the launcher's `reset` endpoint must answer at all (a `400` still proves
//!   the endpoint is alive).
//!
//! Network failures are swallowed and retried. The prober never blocks past
//! its timeout and never returns an error; callers decide what partial
//! readiness means.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::OrchestratorSettings;
use crate::domain::AgentConfig;
use crate::obs::emit_agent_ready;

/// Well-known path of an agent's capability document, relative to its base URL.
pub const AGENT_CARD_PATH: &str = ".well-known/agent-card.json";

/// Per-axis readiness of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub agent_ready: bool,
    pub launcher_ready: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.agent_ready && self.launcher_ready
    }
}

/// `http://{host}:{port}` without a trailing slash.
pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}

/// Polls agent and launcher endpoints until they respond or a timeout elapses.
#[derive(Debug, Clone)]
pub struct ReadinessProber {
    http: reqwest::Client,
    timeout: Duration,
    interval: Duration,
    probe_timeout: Duration,
}

impl ReadinessProber {
    pub fn new(http: reqwest::Client, settings: &OrchestratorSettings) -> Self {
        Self::with_budget(
            http,
            settings.readiness_timeout,
            settings.readiness_interval,
            settings.probe_timeout,
        )
    }

    pub fn with_budget(
        http: reqwest::Client,
        timeout: Duration,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            http,
            timeout,
            interval,
            probe_timeout,
        }
    }

    /// Poll `GET {base}/.well-known/agent-card.json` until it returns a success status.
    pub async fn wait_for_agent(&self, agent_url: &str) -> bool {
        let url = format!("{}/{}", agent_url.trim_end_matches('/'), AGENT_CARD_PATH);
        let url = url.as_str();
        self.poll_until(|budget| {
            let request = self.http.get(url).timeout(budget);
            async move {
                match request.send().await {
                    Ok(resp) => resp.status().is_success(),
                    Err(err) => {
                        debug!(url = %url, error = %err, "agent not reachable yet");
                        false
                    }
                }
            }
        })
        .await
    }

    /// Poll `POST {base}/reset` with a synthetic payload until the launcher answers.
    pub async fn wait_for_launcher(&self, launcher_url: &str, backend_url: &str) -> bool {
        let url = format!("{}/reset", launcher_url.trim_end_matches('/'));
        let url = url.as_str();
        let payload = json!({
            "signal": "reset",
            "agent_id": "test",
            "backend_url": backend_url,
            "extra_args": {},
        });
        self.poll_until(|budget| {
            let request = self.http.post(url).json(&payload).timeout(budget);
            async move {
                match request.send().await {
                    Ok(resp) => {
                        let status = resp.status();
                        status.is_success() || status == StatusCode::BAD_REQUEST
                    }
                    Err(err) => {
                        debug!(url = %url, error = %err, "launcher not reachable yet");
                        false
                    }
                }
            }
        })
        .await
    }

    /// Probe both axes of one agent, sequentially.
    pub async fn probe(&self, agent: &AgentConfig, public_host: &str, backend_url: &str) -> Readiness {
        let agent_ready = self
            .wait_for_agent(&base_url(public_host, agent.agent_port))
            .await;
        let launcher_ready = self
            .wait_for_launcher(&base_url(public_host, agent.launcher_port), backend_url)
            .await;

        let readiness = Readiness {
            agent_ready,
            launcher_ready,
        };
        emit_agent_ready(&agent.name, agent_ready, launcher_ready);
        match (agent_ready, launcher_ready) {
            (true, true) => {}
            (true, false) => warn!(agent = %agent.name, "agent ready but launcher may not be ready"),
            (false, true) => warn!(agent = %agent.name, "launcher ready but agent may not be ready"),
            (false, false) => warn!(agent = %agent.name, "agent may not be ready, continuing anyway"),
        }
        readiness
    }

    /// Run `attempt` until it reports success or the timeout elapses.
    ///
    /// Each attempt receives the request budget it may spend; neither the
    /// attempt nor the retry sleep is allowed to run past the deadline.
    async fn poll_until<F, Fut>(&self, mut attempt: F) -> bool
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if attempt(self.probe_timeout.min(remaining)).await {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            tokio::time::sleep(self.interval.min(remaining)).await;
        }
    }
}
