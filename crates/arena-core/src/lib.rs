//! Arena core library
//!
//! Orchestrates battles between independently hosted agents: launching and
//! supervising agent processes, probing readiness, registering with the
//! backend, creating and polling battles, and driving interactive episodes
//! against an opponent with cleanup scoring.
//!
//! ## Key Components
//!
//! - `Supervisor`: agent processes and their guaranteed teardown
//! - `ReadinessProber`: agent card and launcher liveness polling
//! - `Registrar` / `BattleCoordinator`: backend registration and battle lifecycle
//! - `A2aMessenger`: streaming prompt/reply exchange with per-battle timing
//! - `EpisodeRunner` / `Evaluator`: episode state machine and evaluation loop
//! - `ProgressReporter` / `SandboxBridge`: ad hoc reporting and sandboxed exec

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod episode;
pub mod evaluation;
pub mod fakes;
pub mod journal;
pub mod messenger;
pub mod obs;
pub mod readiness;
pub mod registration;
pub mod reporter;
pub mod sandbox;
pub mod scoring;
pub mod supervisor;
pub mod tasks;
pub mod telemetry;

pub use backend::{AgentRegistration, BackendClient, BackendError, BattleBackend, BattleRequest};
pub use config::{ConfigError, LaunchEnv, OrchestratorSettings, Roster};
pub use coordinator::{find_green, resolve_opponents, BattleCoordinator, CoordinatorError};
pub use domain::{
    AgentConfig, AgentId, Battle, BattleId, BattleState, IdentityMap, Opponent, ParticipantRequirement,
};
pub use episode::{
    Environment, EnvironmentError, EnvironmentFactory, Episode, EpisodeError, EpisodeRunner, StepRecord,
    DEFAULT_STEP_BUDGET,
};
pub use evaluation::{render_score_table, EpisodeOutcome, EvaluationError, EvaluationReport, Evaluator};
pub use messenger::{A2aMessenger, MessengerError, OpponentClient, Reply, TimingLedger};
pub use readiness::{Readiness, ReadinessProber};
pub use registration::Registrar;
pub use reporter::{ProgressReporter, ProgressUpdate, ReportOutcome};
pub use sandbox::{ContainerRuntime, DockerCli, ExecOutcome, SandboxBridge, SandboxError, SandboxSettings};

#[cfg(feature = "docker")]
pub use sandbox::DockerEngine;
pub use scoring::{compute_cleanup_metrics, CleanupMetrics};
pub use supervisor::{ProcessState, Supervisor, SupervisorError};
pub use tasks::{TaskCatalog, TaskRef};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
