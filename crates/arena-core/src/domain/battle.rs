//! Battle identity and backend-owned battle state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backend-issued battle identifier. Also keys every per-battle store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BattleId(pub String);

impl BattleId {
    pub fn new(id: impl Into<String>) -> Self {
        BattleId(id.into())
    }

    /// A fresh random identifier for battles started outside the backend.
    pub fn generate() -> Self {
        BattleId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BattleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Battle state as reported by the backend. The coordinator only observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleState {
    Pending,
    Running,
    Finished,
    Error,
    #[serde(other)]
    Unknown,
}

impl BattleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BattleState::Finished | BattleState::Error)
    }
}

impl std::fmt::Display for BattleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BattleState::Pending => "pending",
            BattleState::Running => "running",
            BattleState::Finished => "finished",
            BattleState::Error => "error",
            BattleState::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Last observed battle record.
///
/// `record` keeps the full backend document; `state` and `error` are the
/// fields the coordinator acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Battle {
    pub id: BattleId,
    pub state: BattleState,
    pub error: Option<String>,
    pub record: Value,
}

impl Battle {
    /// Interpret a `GET /battles/{id}` document. A missing or unrecognised
    /// state maps to [`BattleState::Unknown`].
    pub fn from_record(id: BattleId, record: Value) -> Self {
        let state = record
            .get("state")
            .cloned()
            .and_then(|s| serde_json::from_value(s).ok())
            .unwrap_or(BattleState::Unknown);
        let error = record
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            id,
            state,
            error,
            record,
        }
    }
}
