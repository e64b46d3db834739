//! Domain vocabulary shared by every component: agents, identities,
//! opponents and battles.

pub mod agent;
pub mod battle;

pub use agent::{infer_role, AgentConfig, AgentId, IdentityMap, Opponent, ParticipantRequirement};
pub use battle::{Battle, BattleId, BattleState};
