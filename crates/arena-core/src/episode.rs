//! One interactive episode against an opponent.
//!
//! ```text
//! INIT ──reset──▶ ASK_OPPONENT ──reply──▶ STEP_ENV ──done or budget──▶ DONE
//!                      ▲                      │
//!                      └──────────────────────┘
//! ```
//!
//! Steps are strictly sequential. The trace is append-only and indexed
//! `0..steps`. Running out of step budget is a normal outcome; the
//! environment is closed on every exit path.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::messenger::{MessengerError, OpponentClient};
use crate::obs::{emit_episode_finished, emit_episode_step};
use crate::scoring::CleanupMetrics;
use crate::tasks::{TaskError, TaskRef};

/// Step budget used when none is configured.
pub const DEFAULT_STEP_BUDGET: usize = 80;

// ---------------------------------------------------------------------------
// Environment seam
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("environment could not be started: {0}")]
    Spawn(String),

    #[error("environment reset failed: {0}")]
    Reset(String),

    #[error("environment step failed: {0}")]
    Step(String),

    #[error("environment close failed: {0}")]
    Close(String),
}

/// First observation of an episode.
#[derive(Debug, Clone, PartialEq)]
pub struct Reset {
    pub observation: String,
    pub info: Value,
}

/// Result of applying one action.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub observation: String,
    pub reward: f64,
    pub done: bool,
    pub info: Value,
}

/// A stateful simulated environment, consumed only through reset/step/close.
#[async_trait]
pub trait Environment: Send {
    async fn reset(&mut self, task: &TaskRef) -> Result<Reset, EnvironmentError>;

    async fn step(&mut self, action: &str) -> Result<Transition, EnvironmentError>;

    async fn close(&mut self) -> Result<(), EnvironmentError>;
}

/// Creates one fresh environment per episode.
#[async_trait]
pub trait EnvironmentFactory: Send + Sync {
    type Env: Environment;

    async fn spawn(&self, task: &TaskRef) -> Result<Self::Env, EnvironmentError>;
}

// ---------------------------------------------------------------------------
// Episode records
// ---------------------------------------------------------------------------

/// One trace record: the action taken at `step` and the observation it answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub action: String,
    #[serde(rename = "obs")]
    pub observation: String,
    pub reward: f64,
    /// Opponent response time, serialized as seconds.
    #[serde(with = "secs_f64")]
    pub elapsed: Duration,
}

/// A finished episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub task_json: PathBuf,
    pub action_log: Vec<StepRecord>,
    pub steps: usize,
    pub success: bool,
    pub reward: f64,
    pub task_meta: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CleanupMetrics>,
}

#[derive(Debug, thiserror::Error)]
pub enum EpisodeError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error("opponent failed at step {step}: {source}")]
    Opponent {
        step: usize,
        #[source]
        source: MessengerError,
    },
}

// ---------------------------------------------------------------------------
// EpisodeRunner
// ---------------------------------------------------------------------------

/// Drives episodes through environments produced by `F`.
pub struct EpisodeRunner<F> {
    factory: F,
    step_budget: usize,
}

impl<F: EnvironmentFactory> EpisodeRunner<F> {
    pub fn new(factory: F, step_budget: usize) -> Self {
        Self {
            factory,
            step_budget,
        }
    }

    pub fn step_budget(&self) -> usize {
        self.step_budget
    }

    /// Run one episode of `task` against `opponent`.
    ///
    /// An opponent or environment failure aborts the episode; the
    /// environment is still closed before the error is returned.
    pub async fn run(&self, opponent: &mut dyn OpponentClient, task: &TaskRef) -> Result<Episode, EpisodeError> {
        let task_meta = task.load_metadata()?;
        let mut env = self.factory.spawn(task).await?;

        let outcome = self.drive(&mut env, opponent, task).await;
        if let Err(err) = env.close().await {
            warn!(task = %task.id, error = %err, "failed to close environment");
        }
        let (action_log, reward, success) = outcome?;

        emit_episode_finished(&task.id, action_log.len(), success, reward);
        Ok(Episode {
            task_json: task.path.clone(),
            steps: action_log.len(),
            action_log,
            success,
            reward,
            task_meta,
            metrics: None,
        })
    }

    async fn drive(
        &self,
        env: &mut F::Env,
        opponent: &mut dyn OpponentClient,
        task: &TaskRef,
    ) -> Result<(Vec<StepRecord>, f64, bool), EpisodeError> {
        let reset = env.reset(task).await?;
        let mut observation = reset.observation;
        let mut success = won(&reset.info);
        let mut action_log = Vec::new();
        let mut total_reward = 0.0;

        for step in 0..self.step_budget {
            let reply = opponent
                .ask(&observation)
                .await
                .map_err(|source| EpisodeError::Opponent { step, source })?;
            let action = reply.text.trim().to_string();

            let transition = env.step(&action).await?;
            emit_episode_step(&task.id, step, transition.reward, reply.elapsed);
            action_log.push(StepRecord {
                step,
                action,
                observation,
                reward: transition.reward,
                elapsed: reply.elapsed,
            });
            total_reward += transition.reward;
            success = won(&transition.info);
            observation = transition.observation;
            if transition.done {
                break;
            }
        }

        Ok((action_log, total_reward, success))
    }
}

fn won(info: &Value) -> bool {
    info.get("won").and_then(Value::as_bool).unwrap_or(false)
}

mod secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedEnvFactory, ScriptedOpponent};
    use serde_json::json;
    use tempfile::TempDir;

    fn task(dir: &TempDir) -> TaskRef {
        let path = dir.path().join("trial_1.json");
        std::fs::write(&path, r#"{"task_type": "pick_and_place"}"#).unwrap();
        TaskRef::from_path(path)
    }

    fn step(obs: &str, reward: f64, done: bool) -> Transition {
        Transition {
            observation: obs.to_string(),
            reward,
            done,
            info: json!({"won": done}),
        }
    }

    #[tokio::test]
    async fn test_episode_stops_on_done() {
        let dir = TempDir::new().unwrap();
        let factory = ScriptedEnvFactory::new("You are in a kitchen.")
            .with_transitions(vec![step("You see a mug.", 0.0, false), step("Done.", 1.0, true)]);
        let closed = factory.close_counter();
        let runner = EpisodeRunner::new(factory, DEFAULT_STEP_BUDGET);
        let mut opponent = ScriptedOpponent::new(vec!["  go to desk 1\n", "take mug 1"]);

        let episode = runner.run(&mut opponent, &task(&dir)).await.unwrap();

        assert_eq!(episode.steps, 2);
        assert!(episode.success);
        assert_eq!(episode.reward, 1.0);
        assert_eq!(episode.action_log[0].action, "go to desk 1");
        assert_eq!(episode.action_log[0].observation, "You are in a kitchen.");
        assert_eq!(episode.action_log[1].observation, "You see a mug.");
        assert_eq!(episode.task_meta["task_type"], "pick_and_place");
        assert_eq!(opponent.prompts(), vec!["You are in a kitchen.", "You see a mug."]);
        assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let runner = EpisodeRunner::new(ScriptedEnvFactory::new("start"), 5);
        let mut opponent = ScriptedOpponent::new(vec!["look"]);

        let episode = runner.run(&mut opponent, &task(&dir)).await.unwrap();

        assert_eq!(episode.steps, 5);
        assert!(!episode.success);
        let indices: Vec<usize> = episode.action_log.iter().map(|r| r.step).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_opponent_failure_aborts_and_closes_env() {
        let dir = TempDir::new().unwrap();
        let factory = ScriptedEnvFactory::new("start");
        let closed = factory.close_counter();
        let runner = EpisodeRunner::new(factory, 10);
        let mut opponent = ScriptedOpponent::new(vec!["look"]).fail_at(2);

        let err = runner.run(&mut opponent, &task(&dir)).await.unwrap_err();

        assert!(matches!(err, EpisodeError::Opponent { step: 2, .. }));
        assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_task_file_fails_before_spawn() {
        let factory = ScriptedEnvFactory::new("start");
        let closed = factory.close_counter();
        let runner = EpisodeRunner::new(factory, 10);
        let mut opponent = ScriptedOpponent::new(vec!["look"]);

        let err = runner
            .run(&mut opponent, &TaskRef::from_path("/nonexistent/task.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, EpisodeError::Task(_)));
        assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_step_record_serializes_elapsed_as_seconds() {
        let record = StepRecord {
            step: 0,
            action: "look".into(),
            observation: "dark".into(),
            reward: 0.0,
            elapsed: Duration::from_millis(1500),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["elapsed"], json!(1.5));
        assert_eq!(value["obs"], json!("dark"));
        let back: StepRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
