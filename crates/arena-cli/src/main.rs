//! Arena - agent battle orchestrator CLI
//!
//! The `arena` command launches a roster of agents, registers them with the
//! battle backend, runs one battle and prints its final record.
//!
//! ## Commands
//!
//! - `launch`: start agents, create a battle and wait for its result
//! - `score`: render the score table of a results artifact or a raw trace
//! - `report`: send a progress event for a running battle
//! - `exec`: run a shell command inside a battle's sandbox

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info, warn, Instrument};

use arena_core::obs::battle_span;
use arena_core::telemetry::{init_tracing, level_for};
use arena_core::{
    compute_cleanup_metrics, render_score_table, BackendClient, Battle, BattleBackend, BattleCoordinator, BattleId,
    ContainerRuntime, EpisodeOutcome, ExecOutcome, IdentityMap, LaunchEnv, OrchestratorSettings, ProgressReporter,
    ProgressUpdate, ReadinessProber, Registrar, ReportOutcome, Roster, SandboxBridge, SandboxSettings, StepRecord,
    Supervisor,
};

#[derive(Parser)]
#[command(name = "arena")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Agent battle orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Battle backend base URL
    #[arg(long, global = true, env = "ARENA_BACKEND_URL", default_value = "http://localhost:9000")]
    backend_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the roster, run one battle and print its final record
    Launch(LaunchArgs),

    /// Print the score table of a results artifact, or the metrics of a trace
    Score {
        /// Results artifact (list of episodes) or bare action log
        #[arg(long)]
        results: PathBuf,
    },

    /// Report progress of a running battle
    Report {
        #[arg(long)]
        battle: String,

        #[arg(long)]
        message: String,

        #[arg(long)]
        reported_by: String,

        /// Structured detail as a JSON object
        #[arg(long)]
        detail: Option<String>,

        /// Markdown body shown with the event
        #[arg(long)]
        markdown: Option<String>,

        /// Directory of the local fallback journal
        #[arg(long, env = "ARENA_LOG_DIR", default_value = "logs")]
        log_dir: PathBuf,
    },

    /// Run a shell command inside a battle's sandbox
    Exec {
        #[arg(long)]
        battle: String,

        /// Agent on whose behalf the command runs
        #[arg(long)]
        agent: String,

        /// Directory of the command history journal
        #[arg(long, env = "ARENA_LOG_DIR", default_value = "logs")]
        log_dir: PathBuf,

        /// Container name prefix
        #[arg(long, env = "ARENA_SANDBOX_PREFIX", default_value = "alfworld-")]
        prefix: String,

        /// Container runtime binary, used unless built with the `docker` feature
        #[arg(long, env = "ARENA_DOCKER", default_value = "docker")]
        docker: PathBuf,

        /// Command to run, after `--`
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Args)]
struct LaunchArgs {
    /// Agent roster (TOML)
    #[arg(long, env = "ARENA_ROSTER")]
    roster: PathBuf,

    /// Frontend base URL used for the battle link
    #[arg(long, env = "ARENA_FRONTEND_URL", default_value = "http://localhost:5174")]
    frontend_url: String,

    /// Host under which agents are reachable by the backend
    #[arg(long, env = "ARENA_PUBLIC_HOST", default_value = "localhost")]
    public_host: String,

    /// Agent launcher program
    #[arg(long, env = "ARENA_LAUNCHER", default_value = "agentbeats")]
    launcher: PathBuf,

    /// Working directory of launched agents
    #[arg(long, env = "ARENA_WORKDIR", default_value = ".")]
    workdir: PathBuf,

    /// Write each agent's output to `<dir>/<agent>.log`
    #[arg(long, env = "ARENA_AGENT_LOG_DIR")]
    agent_log_dir: Option<PathBuf>,

    /// Seconds to wait for the battle to finish
    #[arg(long, env = "ARENA_MAX_WAIT", default_value = "90")]
    max_wait: u64,

    /// Seconds between battle polls
    #[arg(long, env = "ARENA_POLL_INTERVAL", default_value = "3")]
    poll_interval: u64,

    /// Seconds to wait for each agent to come up
    #[arg(long, env = "ARENA_READINESS_TIMEOUT", default_value = "30")]
    readiness_timeout: u64,

    /// Seconds to let agents settle before registration
    #[arg(long, env = "ARENA_SETTLE_DELAY", default_value = "5")]
    settle_delay: u64,
}

impl LaunchArgs {
    fn settings(&self, backend_url: &str) -> OrchestratorSettings {
        let defaults = OrchestratorSettings::default();
        OrchestratorSettings::default()
            .with_backend_url(backend_url)
            .with_frontend_url(&self.frontend_url)
            .with_public_host(&self.public_host)
            .with_launcher(&self.launcher, &self.workdir)
            .with_agent_log_dir(self.agent_log_dir.clone())
            .with_battle_polling(
                Duration::from_secs(self.poll_interval),
                Duration::from_secs(self.max_wait),
            )
            .with_readiness(
                Duration::from_secs(self.readiness_timeout),
                defaults.readiness_interval,
                defaults.probe_timeout,
            )
            .with_settle_delay(Duration::from_secs(self.settle_delay))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json, level_for(cli.verbose));

    match cli.command {
        Commands::Launch(args) => cmd_launch(&args.settings(&cli.backend_url), &args.roster).await,
        Commands::Score { results } => cmd_score(&results).await,
        Commands::Report {
            battle,
            message,
            reported_by,
            detail,
            markdown,
            log_dir,
        } => {
            cmd_report(
                &cli.backend_url,
                &battle,
                &message,
                &reported_by,
                detail.as_deref(),
                markdown.as_deref(),
                &log_dir,
            )
            .await
        }
        Commands::Exec {
            battle,
            agent,
            log_dir,
            prefix,
            docker,
            command,
        } => cmd_exec(&battle, &agent, &log_dir, &prefix, &docker, &command).await,
    }
}

// ---------------------------------------------------------------------------
// launch
// ---------------------------------------------------------------------------

async fn cmd_launch(settings: &OrchestratorSettings, roster_path: &Path) -> Result<ExitCode> {
    let roster = Roster::load(roster_path)
        .with_context(|| format!("Failed to load roster {}", roster_path.display()))?;
    let env = LaunchEnv::from_process_env(settings).context("Missing model credentials")?;
    let backend: Arc<dyn BattleBackend> = Arc::new(
        BackendClient::new(&settings.backend_url, settings.request_timeout)
            .context("Failed to build backend client")?,
    );

    let mut supervisor = Supervisor::new(settings);
    let outcome = tokio::select! {
        outcome = run_battle(settings, &roster, &env, backend, &mut supervisor) => Some(outcome),
        _ = shutdown_signal() => None,
    };
    supervisor.shutdown().await;

    match outcome {
        Some(Ok(Some(battle))) => {
            let record = serde_json::to_string_pretty(&battle.record)?;
            println!("{record}");
            Ok(ExitCode::SUCCESS)
        }
        Some(Ok(None)) => {
            error!("battle did not finish in time");
            Ok(ExitCode::FAILURE)
        }
        Some(Err(err)) => Err(err),
        None => {
            warn!("interrupted, agents stopped");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Everything between spawning the agents and the final battle state.
async fn run_battle(
    settings: &OrchestratorSettings,
    roster: &Roster,
    env: &LaunchEnv,
    backend: Arc<dyn BattleBackend>,
    supervisor: &mut Supervisor,
) -> Result<Option<Battle>> {
    supervisor
        .spawn_all(roster.agents(), env)
        .await
        .context("Failed to start agents")?;

    let prober = ReadinessProber::new(reqwest::Client::new(), settings);
    for agent in roster.agents() {
        let readiness = prober
            .probe(agent, &settings.public_host, &settings.backend_url)
            .await;
        if readiness.is_ready() {
            supervisor.mark_ready(&agent.name);
        }
    }

    info!(delay_secs = settings.settle_delay.as_secs(), "letting agents settle");
    tokio::time::sleep(settings.settle_delay).await;

    let mut identities = IdentityMap::new();
    let registered = Registrar::new(backend.clone(), &settings.public_host)
        .register_missing(roster.agents(), &mut identities)
        .await;
    info!(registered, total = roster.agents().len(), "registration complete");

    let coordinator = BattleCoordinator::new(backend, settings);
    let battle_id = coordinator
        .create_battle(roster.agents(), &identities)
        .await
        .context("Failed to create battle")?;
    let url = settings.battle_url(&battle_id);
    info!(battle_id = %battle_id, url = %url, "battle created");
    println!("Battle: {url}");

    Ok(coordinator
        .await_result(&battle_id)
        .instrument(battle_span(&battle_id))
        .await)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ---------------------------------------------------------------------------
// score
// ---------------------------------------------------------------------------

async fn cmd_score(results: &Path) -> Result<ExitCode> {
    let text = tokio::fs::read_to_string(results)
        .await
        .with_context(|| format!("Failed to read {}", results.display()))?;
    println!("{}", render_scores(&text)?);
    Ok(ExitCode::SUCCESS)
}

/// Score table for a results artifact, or pretty metrics for a bare trace.
fn render_scores(text: &str) -> Result<String> {
    let value: Value = serde_json::from_str(text).context("Results file is not JSON")?;
    if let Ok(outcomes) = serde_json::from_value::<Vec<EpisodeOutcome>>(value.clone()) {
        return Ok(render_score_table(&outcomes));
    }
    let trace: Vec<StepRecord> =
        serde_json::from_value(value).context("Expected a list of episodes or of step records")?;
    Ok(serde_json::to_string_pretty(&compute_cleanup_metrics(&trace))?)
}

// ---------------------------------------------------------------------------
// report
// ---------------------------------------------------------------------------

async fn cmd_report(
    backend_url: &str,
    battle: &str,
    message: &str,
    reported_by: &str,
    detail: Option<&str>,
    markdown: Option<&str>,
    log_dir: &Path,
) -> Result<ExitCode> {
    let mut update = ProgressUpdate::new(BattleId::new(battle), message, reported_by);
    if let Some(detail) = detail {
        let detail: Value = serde_json::from_str(detail).context("--detail is not valid JSON")?;
        update = update.with_detail(detail);
    }
    if let Some(markdown) = markdown {
        update = update.with_markdown(markdown);
    }

    let settings = OrchestratorSettings::default();
    let backend = BackendClient::new(backend_url, settings.request_timeout).context("Failed to build backend client")?;
    let outcome = ProgressReporter::new(Arc::new(backend), log_dir).report(&update).await;
    println!("{outcome}");
    Ok(match outcome {
        ReportOutcome::Dropped(_) => ExitCode::FAILURE,
        ReportOutcome::Backend | ReportOutcome::Local(_) => ExitCode::SUCCESS,
    })
}

// ---------------------------------------------------------------------------
// exec
// ---------------------------------------------------------------------------

async fn cmd_exec(
    battle: &str,
    agent: &str,
    log_dir: &Path,
    prefix: &str,
    docker: &Path,
    command: &[String],
) -> Result<ExitCode> {
    let settings = SandboxSettings {
        name_prefix: prefix.to_string(),
        log_dir: log_dir.to_path_buf(),
        ..SandboxSettings::default()
    };
    let bridge = SandboxBridge::new(sandbox_runtime(docker)?, settings);
    let outcome = bridge
        .execute(&BattleId::new(battle), &command.join(" "), agent)
        .await
        .context("Sandbox command failed")?;
    match outcome {
        ExecOutcome::Output(output) => {
            print!("{output}");
            Ok(ExitCode::SUCCESS)
        }
        ExecOutcome::NotFound(message) => {
            eprintln!("{message}");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(feature = "docker")]
fn sandbox_runtime(_program: &Path) -> Result<impl ContainerRuntime> {
    arena_core::DockerEngine::connect().context("Failed to reach the Docker daemon")
}

#[cfg(not(feature = "docker"))]
fn sandbox_runtime(program: &Path) -> Result<impl ContainerRuntime> {
    Ok(arena_core::DockerCli::new(program))
}
