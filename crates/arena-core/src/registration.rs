//! Agent registration with the backend.

use std::sync::Arc;

use tracing::warn;

use crate::backend::{AgentRegistration, BattleBackend};
use crate::domain::{AgentConfig, IdentityMap};
use crate::obs::emit_agent_registered;

/// Registers launched agents and records the identities the backend issues.
///
/// Registration is best-effort per agent: a failed agent is logged and left
/// out of the identity map, the rest of the batch proceeds.
pub struct Registrar {
    backend: Arc<dyn BattleBackend>,
    public_host: String,
}

impl Registrar {
    pub fn new(backend: Arc<dyn BattleBackend>, public_host: impl Into<String>) -> Self {
        Self {
            backend,
            public_host: public_host.into(),
        }
    }

    /// Register every agent not yet present in `identities`.
    ///
    /// Returns the number of agents newly registered by this call.
    pub async fn register_missing(&self, agents: &[AgentConfig], identities: &mut IdentityMap) -> usize {
        let mut registered = 0;
        for agent in agents {
            if identities.contains_key(&agent.name) {
                continue;
            }
            let registration = AgentRegistration::for_agent(agent, &self.public_host);
            match self.backend.register_agent(&registration).await {
                Ok(agent_id) => {
                    emit_agent_registered(&agent.name, &agent_id);
                    identities.insert(agent.name.clone(), agent_id);
                    registered += 1;
                }
                Err(err) => {
                    warn!(agent = %agent.name, error = %err, "registration failed, agent excluded");
                }
            }
        }
        registered
    }
}
