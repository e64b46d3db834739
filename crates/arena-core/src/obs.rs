//! Structured lifecycle events for the orchestration flow.
//!
//! Every event is an `info!` record with an `event` field so log pipelines can
//! filter on it, e.g. `event=battle.finished`.

use std::time::Duration;

use tracing::{info, Span};

use crate::domain::{AgentId, BattleId, BattleState};

/// Span tagging all records of one battle flow with `battle_id`.
///
/// Attach it to futures with `tracing::Instrument::instrument`.
pub fn battle_span(battle_id: &BattleId) -> Span {
    tracing::info_span!("arena.battle", battle_id = %battle_id)
}

pub fn emit_agent_spawned(agent: &str, pid: Option<u32>) {
    info!(event = "agent.spawned", agent = %agent, pid = ?pid);
}

pub fn emit_agent_ready(agent: &str, agent_ready: bool, launcher_ready: bool) {
    info!(
        event = "agent.ready",
        agent = %agent,
        agent_ready = agent_ready,
        launcher_ready = launcher_ready,
    );
}

pub fn emit_agent_registered(agent: &str, agent_id: &AgentId) {
    info!(event = "agent.registered", agent = %agent, agent_id = %agent_id);
}

pub fn emit_battle_created(battle_id: &BattleId, opponents: usize) {
    info!(event = "battle.created", battle_id = %battle_id, opponents = opponents);
}

pub fn emit_battle_polled(battle_id: &BattleId, state: BattleState) {
    info!(event = "battle.polled", battle_id = %battle_id, state = %state);
}

pub fn emit_battle_finished(battle_id: &BattleId, state: BattleState, waited: Duration) {
    info!(
        event = "battle.finished",
        battle_id = %battle_id,
        state = %state,
        waited_ms = waited.as_millis() as u64,
    );
}

pub fn emit_episode_step(task: &str, step: usize, reward: f64, elapsed: Duration) {
    tracing::debug!(
        event = "episode.step",
        task = %task,
        step = step,
        reward = reward,
        elapsed_ms = elapsed.as_millis() as u64,
    );
}

pub fn emit_episode_finished(task: &str, steps: usize, success: bool, reward: f64) {
    info!(
        event = "episode.finished",
        task = %task,
        steps = steps,
        success = success,
        reward = reward,
    );
}
