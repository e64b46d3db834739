//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `MemoryBackend`, `ScriptedOpponent`, `ScriptedEnvFactory` and
//! `MemoryRuntime`, which satisfy the trait contracts without a network,
//! a simulator or a container engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::backend::{AgentRegistration, BackendError, BackendResult, BattleBackend, BattleRequest};
use crate::domain::{AgentConfig, AgentId, Battle, BattleId, BattleState, ParticipantRequirement};
use crate::episode::{Environment, EnvironmentError, EnvironmentFactory, Reset, Transition};
use crate::messenger::{MessengerError, MessengerResult, OpponentClient, Reply};
use crate::sandbox::{ContainerHandle, ContainerRuntime, ContainerSpec, SandboxError, SandboxResult};
use crate::tasks::TaskRef;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Blue and red opponents plus a green agent requiring both.
pub fn sample_roster() -> Vec<AgentConfig> {
    let agent = |name: &str, port: u16, is_green: bool| AgentConfig {
        name: name.to_string(),
        card: PathBuf::from(format!("scenarios/{}_card.toml", name.to_lowercase().replace(' ', "_"))),
        launcher_host: "0.0.0.0".to_string(),
        launcher_port: port,
        agent_host: "0.0.0.0".to_string(),
        agent_port: port + 1,
        model_type: "openai".to_string(),
        model_name: "o4-mini".to_string(),
        tools: vec![],
        mcp_servers: vec![],
        is_green,
        participant_requirements: vec![],
    };
    let mut green = agent("Green Agent", 9030, true);
    green.participant_requirements = vec![
        ParticipantRequirement {
            role: "blue_agent".to_string(),
            name: "defender".to_string(),
            required: true,
            participant_agent: "Blue Agent".to_string(),
        },
        ParticipantRequirement {
            role: "red_agent".to_string(),
            name: "prompt_injector".to_string(),
            required: true,
            participant_agent: "Red Agent".to_string(),
        },
    ];
    vec![agent("Blue Agent", 9010, false), agent("Red Agent", 9020, false), green]
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct BackendState {
    registrations: Vec<AgentRegistration>,
    battle_requests: Vec<BattleRequest>,
    events: Vec<(BattleId, Value)>,
    rejected_agents: HashSet<String>,
    reject_battles: bool,
    failing_events: bool,
    battle_script: VecDeque<BattleState>,
    failing_fetches: usize,
    fetch_delay: Duration,
    fetches: usize,
}

/// Backend that issues sequential ids and replays a scripted battle state.
///
/// Once the script is down to its last state, that state repeats. An empty
/// script reports `running` forever.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<BackendState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration of `alias` answers with a server error.
    pub fn reject_agent(self, alias: &str) -> Self {
        lock(&self.state).rejected_agents.insert(alias.to_string());
        self
    }

    pub fn reject_battles(self) -> Self {
        lock(&self.state).reject_battles = true;
        self
    }

    pub fn failing_events(self) -> Self {
        lock(&self.state).failing_events = true;
        self
    }

    pub fn with_battle_script(self, states: Vec<BattleState>) -> Self {
        lock(&self.state).battle_script = states.into();
        self
    }

    /// The next `n` fetches fail before the script is consulted.
    pub fn fail_next_fetches(self, n: usize) -> Self {
        lock(&self.state).failing_fetches = n;
        self
    }

    /// Every fetch takes `delay` before answering.
    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        lock(&self.state).fetch_delay = delay;
        self
    }

    pub fn registrations(&self) -> Vec<AgentRegistration> {
        lock(&self.state).registrations.clone()
    }

    pub fn battle_requests(&self) -> Vec<BattleRequest> {
        lock(&self.state).battle_requests.clone()
    }

    pub fn events(&self) -> Vec<(BattleId, Value)> {
        lock(&self.state).events.clone()
    }

    pub fn fetch_count(&self) -> usize {
        lock(&self.state).fetches
    }
}

fn server_error() -> BackendError {
    BackendError::UnexpectedStatus {
        status: 500,
        body: "scripted failure".to_string(),
    }
}

#[async_trait]
impl BattleBackend for MemoryBackend {
    async fn register_agent(&self, registration: &AgentRegistration) -> BackendResult<AgentId> {
        let mut state = lock(&self.state);
        if state.rejected_agents.contains(&registration.alias) {
            return Err(server_error());
        }
        state.registrations.push(registration.clone());
        Ok(AgentId(format!("agent-{}", state.registrations.len())))
    }

    async fn create_battle(&self, request: &BattleRequest) -> BackendResult<BattleId> {
        let mut state = lock(&self.state);
        if state.reject_battles {
            return Err(server_error());
        }
        state.battle_requests.push(request.clone());
        Ok(BattleId(format!("battle-{}", state.battle_requests.len())))
    }

    async fn fetch_battle(&self, battle_id: &BattleId) -> BackendResult<Battle> {
        let delay = {
            let mut state = lock(&self.state);
            state.fetches += 1;
            state.fetch_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = lock(&self.state);
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(BackendError::UnexpectedStatus {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        let current = if state.battle_script.len() > 1 {
            state.battle_script.pop_front()
        } else {
            state.battle_script.front().copied()
        }
        .unwrap_or(BattleState::Running);
        let error = (current == BattleState::Error).then_some("scripted battle error");
        Ok(Battle::from_record(
            battle_id.clone(),
            json!({"id": battle_id, "state": current, "error": error}),
        ))
    }

    async fn post_battle_event(&self, battle_id: &BattleId, event: &Value) -> BackendResult<()> {
        let mut state = lock(&self.state);
        if state.failing_events {
            return Err(server_error());
        }
        state.events.push((battle_id.clone(), event.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedOpponent
// ---------------------------------------------------------------------------

/// Opponent answering from a fixed list; the last reply repeats.
#[derive(Debug, Default)]
pub struct ScriptedOpponent {
    replies: Vec<String>,
    prompts: Vec<String>,
    fail_at: Option<usize>,
    elapsed: Duration,
    cumulative: Duration,
}

impl ScriptedOpponent {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: replies.into_iter().map(str::to_string).collect(),
            elapsed: Duration::from_millis(10),
            ..Self::default()
        }
    }

    /// The call with index `call` fails with a timeout.
    pub fn fail_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    /// Elapsed time reported for every call.
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.clone()
    }
}

#[async_trait]
impl OpponentClient for ScriptedOpponent {
    async fn ask(&mut self, prompt: &str) -> MessengerResult<Reply> {
        let call = self.prompts.len();
        self.prompts.push(prompt.to_string());
        if self.fail_at == Some(call) {
            return Err(MessengerError::Timeout(Duration::from_secs(120)));
        }
        let text = self
            .replies
            .get(call)
            .or_else(|| self.replies.last())
            .cloned()
            .unwrap_or_default();
        self.cumulative += self.elapsed;
        Ok(Reply {
            text,
            elapsed: self.elapsed,
            cumulative: self.cumulative,
        })
    }

    fn reset_timer(&mut self) {
        self.cumulative = Duration::ZERO;
    }
}

// ---------------------------------------------------------------------------
// ScriptedEnvFactory
// ---------------------------------------------------------------------------

/// Spawns environments that replay the same transitions, then answer
/// "Nothing happens." with zero reward forever.
#[derive(Debug, Clone)]
pub struct ScriptedEnvFactory {
    initial: String,
    transitions: Vec<Transition>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedEnvFactory {
    pub fn new(initial_observation: &str) -> Self {
        Self {
            initial: initial_observation.to_string(),
            transitions: Vec::new(),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_transitions(mut self, transitions: Vec<Transition>) -> Self {
        self.transitions = transitions;
        self
    }

    /// Number of `close` calls across every spawned environment.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }
}

#[derive(Debug)]
pub struct ScriptedEnvironment {
    initial: String,
    pending: VecDeque<Transition>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl EnvironmentFactory for ScriptedEnvFactory {
    type Env = ScriptedEnvironment;

    async fn spawn(&self, _task: &TaskRef) -> Result<ScriptedEnvironment, EnvironmentError> {
        Ok(ScriptedEnvironment {
            initial: self.initial.clone(),
            pending: self.transitions.iter().cloned().collect(),
            closes: self.closes.clone(),
        })
    }
}

#[async_trait]
impl Environment for ScriptedEnvironment {
    async fn reset(&mut self, _task: &TaskRef) -> Result<Reset, EnvironmentError> {
        Ok(Reset {
            observation: self.initial.clone(),
            info: json!({}),
        })
    }

    async fn step(&mut self, _action: &str) -> Result<Transition, EnvironmentError> {
        Ok(self.pending.pop_front().unwrap_or_else(|| Transition {
            observation: "Nothing happens.".to_string(),
            reward: 0.0,
            done: false,
            info: json!({}),
        }))
    }

    async fn close(&mut self) -> Result<(), EnvironmentError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryRuntime
// ---------------------------------------------------------------------------

/// Container runtime keeping containers in a map; every exec returns the
/// same configured output.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    containers: Mutex<HashMap<String, ContainerHandle>>,
    output: Vec<u8>,
    run_delays: HashMap<String, Duration>,
    failing_runs: HashSet<String>,
    execs: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, output: &[u8]) -> Self {
        self.output = output.to_vec();
        self
    }

    /// A container started outside the bridge.
    pub fn with_container(self, name: &str) -> Self {
        lock(&self.containers).insert(
            name.to_string(),
            ContainerHandle {
                id: format!("id-{name}"),
                name: name.to_string(),
            },
        );
        self
    }

    /// Starting the container named `name` takes `delay`.
    pub fn with_run_delay(mut self, name: &str, delay: Duration) -> Self {
        self.run_delays.insert(name.to_string(), delay);
        self
    }

    /// Starting the container named `name` fails.
    pub fn with_failing_run(mut self, name: &str) -> Self {
        self.failing_runs.insert(name.to_string());
        self
    }

    pub fn exec_counter(&self) -> Arc<AtomicUsize> {
        self.execs.clone()
    }

    pub fn stop_counter(&self) -> Arc<AtomicUsize> {
        self.stops.clone()
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn run(&self, spec: &ContainerSpec) -> SandboxResult<ContainerHandle> {
        if let Some(delay) = self.run_delays.get(&spec.name) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing_runs.contains(&spec.name) {
            return Err(SandboxError::CommandFailed {
                command: format!("run {}", spec.name),
                stderr: "image pull failed".to_string(),
            });
        }
        let mut containers = lock(&self.containers);
        if containers.contains_key(&spec.name) {
            return Err(SandboxError::CommandFailed {
                command: format!("run {}", spec.name),
                stderr: "name already in use".to_string(),
            });
        }
        let handle = ContainerHandle {
            id: format!("id-{}", spec.name),
            name: spec.name.clone(),
        };
        containers.insert(spec.name.clone(), handle.clone());
        Ok(handle)
    }

    async fn get(&self, name: &str) -> SandboxResult<Option<ContainerHandle>> {
        Ok(lock(&self.containers).get(name).cloned())
    }

    async fn exec(&self, _handle: &ContainerHandle, _command: &str) -> SandboxResult<Vec<u8>> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }

    async fn stop(&self, handle: &ContainerHandle, _timeout: Duration) -> SandboxResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        lock(&self.containers).remove(&handle.name);
        Ok(())
    }
}
