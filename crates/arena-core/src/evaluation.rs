//! Sequential evaluation of one opponent over a list of tasks.
//!
//! Each task runs as one episode through a shared opponent session, gets its
//! cleanup metrics attached and is collected into a per-battle artifact
//! `{artifact_dir}/{battle_id}_results.json`. A failed episode is recorded
//! as such and the loop moves on to the next task.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::BattleId;
use crate::episode::{EnvironmentFactory, Episode, EpisodeRunner};
use crate::messenger::{A2aMessenger, MessengerError, OpponentClient, TimingLedger};
use crate::scoring::compute_cleanup_metrics;
use crate::tasks::{TaskCatalog, TaskError, TaskRef};

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Messenger(#[from] MessengerError),

    #[error("failed to encode results: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EvaluationError>;

/// Result of one task: a scored episode or the reason it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EpisodeOutcome {
    Completed(Episode),
    Failed { task_json: PathBuf, error: String },
}

impl EpisodeOutcome {
    pub fn task_json(&self) -> &Path {
        match self {
            EpisodeOutcome::Completed(episode) => &episode.task_json,
            EpisodeOutcome::Failed { task_json, .. } => task_json,
        }
    }
}

/// Everything one evaluation produced.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub battle_id: BattleId,
    pub outcomes: Vec<EpisodeOutcome>,
    pub artifact: PathBuf,
}

impl EvaluationReport {
    pub fn score_table(&self) -> String {
        render_score_table(&self.outcomes)
    }

    /// Score table followed by the artifact location.
    pub fn summary(&self) -> String {
        format!("{}\n\nArtifact saved to {}", self.score_table(), self.artifact.display())
    }
}

/// Runs episodes for one opponent and persists the results.
pub struct Evaluator<F> {
    runner: EpisodeRunner<F>,
    catalog: TaskCatalog,
    artifact_dir: PathBuf,
}

impl<F: EnvironmentFactory> Evaluator<F> {
    pub fn new(runner: EpisodeRunner<F>, catalog: TaskCatalog, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            catalog,
            artifact_dir: artifact_dir.into(),
        }
    }

    /// Resolve `subset` against the catalog, or pick the first available
    /// task when it is empty.
    pub fn select_tasks(&self, subset: &[String]) -> Result<Vec<TaskRef>> {
        if subset.is_empty() {
            return Ok(vec![self.catalog.first_available()?]);
        }
        subset
            .iter()
            .map(|id| self.catalog.resolve(id).map_err(EvaluationError::from))
            .collect()
    }

    /// Connect to the opponent at `opponent_url` and evaluate it.
    ///
    /// A missing `battle_id` is replaced by a fresh one.
    pub async fn evaluate_opponent(
        &self,
        http: reqwest::Client,
        opponent_url: &str,
        battle_id: Option<BattleId>,
        subset: &[String],
        ledger: TimingLedger,
        timeout: Duration,
    ) -> Result<EvaluationReport> {
        let battle_id = battle_id.unwrap_or_else(BattleId::generate);
        let mut messenger = A2aMessenger::connect(http, opponent_url, battle_id.clone(), ledger, timeout).await?;
        self.evaluate_with(&mut messenger, battle_id, subset).await
    }

    /// Evaluate through an already connected opponent client.
    pub async fn evaluate_with(
        &self,
        opponent: &mut dyn OpponentClient,
        battle_id: BattleId,
        subset: &[String],
    ) -> Result<EvaluationReport> {
        let tasks = self.select_tasks(subset)?;
        let outcomes = self.run_episodes(opponent, &battle_id, &tasks).await;
        let artifact = write_results_artifact(&self.artifact_dir, &battle_id, &outcomes).await?;
        Ok(EvaluationReport {
            battle_id,
            outcomes,
            artifact,
        })
    }

    /// Run every task in order. Failures are recorded, never propagated.
    pub async fn run_episodes(
        &self,
        opponent: &mut dyn OpponentClient,
        battle_id: &BattleId,
        tasks: &[TaskRef],
    ) -> Vec<EpisodeOutcome> {
        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            info!(battle_id = %battle_id, task = %task.id, "running task");
            match self.runner.run(opponent, task).await {
                Ok(mut episode) => {
                    episode.metrics = Some(compute_cleanup_metrics(&episode.action_log));
                    outcomes.push(EpisodeOutcome::Completed(episode));
                }
                Err(err) => {
                    warn!(battle_id = %battle_id, task = %task.id, error = %err, "episode failed");
                    outcomes.push(EpisodeOutcome::Failed {
                        task_json: task.path.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
        outcomes
    }
}

/// Write `outcomes` to `{dir}/{battle_id}_results.json`.
pub async fn write_results_artifact(dir: &Path, battle_id: &BattleId, outcomes: &[EpisodeOutcome]) -> Result<PathBuf> {
    let path = dir.join(format!("{battle_id}_results.json"));
    let json = serde_json::to_string_pretty(outcomes)?;
    let io_err = |source| EvaluationError::Artifact {
        path: path.clone(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    tokio::fs::write(&path, json).await.map_err(io_err)?;
    Ok(path)
}

/// Markdown table with one row per episode.
pub fn render_score_table(outcomes: &[EpisodeOutcome]) -> String {
    if outcomes.is_empty() {
        return "No episodes run.".to_string();
    }
    let header = [
        "Task", "Cleanup", "Open", "ActiveAppl", "Repeat", "NoChange", "Steps", "Success?",
    ];
    let mut lines = vec![header.join(" | "), vec!["---"; header.len()].join(" | ")];

    for outcome in outcomes {
        let task = outcome
            .task_json()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let row = match outcome {
            EpisodeOutcome::Completed(episode) => {
                let m = episode.metrics.unwrap_or_else(|| compute_cleanup_metrics(&episode.action_log));
                vec![
                    task,
                    format!("{:.2}", m.cleanup_score),
                    format!("{:.2}", m.open_items_ratio),
                    format!("{:.2}", m.active_appliances_ratio),
                    format!("{:.2}", m.repeated_steps_ratio),
                    format!("{:.2}", m.no_change_steps_ratio),
                    episode.steps.to_string(),
                    if episode.success { "✅" } else { "❌" }.to_string(),
                ]
            }
            EpisodeOutcome::Failed { .. } => {
                let mut row = vec![task];
                row.extend(std::iter::repeat("-".to_string()).take(5));
                row.push("?".to_string());
                row.push("❌".to_string());
                row
            }
        };
        lines.push(row.join(" | "));
    }
    lines.join("\n")
}
