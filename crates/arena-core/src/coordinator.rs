//! Battle assembly and status polling.
//!
//! The coordinator turns a registered batch of agents into one battle:
//! it selects the green agent, resolves its participant requirements into
//! concrete opponents, asks the backend to create the battle and then
//! observes the backend-owned state until it is terminal or the wait
//! budget runs out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, BattleBackend, BattleRequest};
use crate::config::OrchestratorSettings;
use crate::domain::{infer_role, AgentConfig, AgentId, Battle, BattleId, BattleState, IdentityMap, Opponent};
use crate::obs::{emit_battle_created, emit_battle_finished, emit_battle_polled};

/// Setup failures of battle creation. Each one aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("no agents registered")]
    NoAgentsRegistered,

    #[error("no registered green agent")]
    NoGreenAgent,

    #[error("more than one registered green agent: {0:?}")]
    AmbiguousGreenAgent(Vec<String>),

    #[error("no opponents could be resolved for the green agent")]
    NoOpponents,

    #[error("battle creation failed: {0}")]
    BattleCreation(#[source] BackendError),
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Pick the single green agent that holds an identity.
pub fn find_green<'a>(agents: &'a [AgentConfig], identities: &IdentityMap) -> Result<(&'a AgentConfig, AgentId)> {
    if identities.is_empty() {
        return Err(CoordinatorError::NoAgentsRegistered);
    }
    let mut greens = agents
        .iter()
        .filter(|a| a.is_green)
        .filter_map(|a| identities.get(&a.name).map(|id| (a, id.clone())));

    let first = greens.next().ok_or(CoordinatorError::NoGreenAgent)?;
    let rest: Vec<_> = greens.collect();
    if !rest.is_empty() {
        let mut names = vec![first.0.name.clone()];
        names.extend(rest.into_iter().map(|(a, _)| a.name.clone()));
        return Err(CoordinatorError::AmbiguousGreenAgent(names));
    }
    Ok(first)
}

/// Resolve the green agent's opponents against the identity map.
///
/// With participant requirements, each requirement whose bound agent holds
/// an identity becomes one opponent; unregistered ones are skipped with a
/// warning whatever their `required` flag says. Without requirements every
/// registered non-green agent becomes an opponent whose role is inferred
/// from its name.
pub fn resolve_opponents(green: &AgentConfig, agents: &[AgentConfig], identities: &IdentityMap) -> Vec<Opponent> {
    if green.has_requirements() {
        return green
            .participant_requirements
            .iter()
            .filter_map(|req| match identities.get(&req.participant_agent) {
                Some(agent_id) => Some(Opponent {
                    name: req.name.clone(),
                    agent_id: agent_id.clone(),
                    role: req.role.clone(),
                }),
                None => {
                    warn!(
                        requirement = %req.name,
                        agent = %req.participant_agent,
                        required = req.required,
                        "participant agent not registered, skipping"
                    );
                    None
                }
            })
            .collect();
    }

    debug!(green = %green.name, "no participant requirements, inferring roles from names");
    agents
        .iter()
        .filter(|a| !a.is_green)
        .filter_map(|a| {
            identities.get(&a.name).map(|agent_id| Opponent {
                name: a.name.clone(),
                agent_id: agent_id.clone(),
                role: infer_role(&a.name).to_string(),
            })
        })
        .collect()
}

/// Creates one battle and polls it to a terminal state.
pub struct BattleCoordinator {
    backend: Arc<dyn BattleBackend>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl BattleCoordinator {
    pub fn new(backend: Arc<dyn BattleBackend>, settings: &OrchestratorSettings) -> Self {
        Self {
            backend,
            poll_interval: settings.battle_poll_interval,
            max_wait: settings.battle_max_wait,
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_wait: Duration) -> Self {
        self.poll_interval = interval;
        self.max_wait = max_wait;
        self
    }

    /// Build the battle request and submit it.
    ///
    /// Every precondition is checked before the backend is contacted.
    pub async fn create_battle(&self, agents: &[AgentConfig], identities: &IdentityMap) -> Result<BattleId> {
        let (green, green_id) = find_green(agents, identities)?;
        let opponents = resolve_opponents(green, agents, identities);
        if opponents.is_empty() {
            return Err(CoordinatorError::NoOpponents);
        }
        for opponent in &opponents {
            info!(name = %opponent.name, role = %opponent.role, agent_id = %opponent.agent_id, "opponent resolved");
        }

        let count = opponents.len();
        let request = BattleRequest::new(green_id, opponents);
        let battle_id = self
            .backend
            .create_battle(&request)
            .await
            .map_err(CoordinatorError::BattleCreation)?;
        emit_battle_created(&battle_id, count);
        Ok(battle_id)
    }

    /// Poll until the battle is finished or errored.
    ///
    /// Returns the last observed record on a terminal state and `None` when
    /// `max_wait` elapses first. Fetch failures are retried on the next tick;
    /// each fetch is bounded by what is left of `max_wait`.
    pub async fn await_result(&self, battle_id: &BattleId) -> Option<Battle> {
        let started = Instant::now();
        let deadline = started + self.max_wait;
        loop {
            let budget = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(budget, self.backend.fetch_battle(battle_id)).await {
                Ok(Ok(battle)) => {
                    emit_battle_polled(battle_id, battle.state);
                    if battle.state.is_terminal() {
                        emit_battle_finished(battle_id, battle.state, started.elapsed());
                        if battle.state == BattleState::Error {
                            warn!(
                                battle_id = %battle_id,
                                error = battle.error.as_deref().unwrap_or("unknown error"),
                                "battle ended with an error"
                            );
                        }
                        return Some(battle);
                    }
                }
                Ok(Err(err)) => debug!(battle_id = %battle_id, error = %err, "battle poll failed, retrying"),
                Err(_) => debug!(battle_id = %battle_id, "battle poll outlived the wait budget"),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    battle_id = %battle_id,
                    waited_secs = self.max_wait.as_secs(),
                    "battle did not finish in time"
                );
                return None;
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }
}
