//! Progress reporting for running battles.
//!
//! Events go to the backend first. When that fails they are appended to
//! `{log_dir}/{battle_id}.json` under `events`, and when even that fails the
//! outcome says so. Reporting never returns an error.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::backend::BattleBackend;
use crate::domain::BattleId;
use crate::journal;

/// Journal key of locally stored progress events.
pub const EVENTS_KEY: &str = "events";

/// What an agent wants to report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub battle_id: BattleId,
    pub message: String,
    pub reported_by: String,
    pub detail: Option<Value>,
    pub markdown_content: Option<String>,
}

impl ProgressUpdate {
    pub fn new(battle_id: BattleId, message: impl Into<String>, reported_by: impl Into<String>) -> Self {
        Self {
            battle_id,
            message: message.into(),
            reported_by: reported_by.into(),
            detail: None,
            markdown_content: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn with_markdown(mut self, content: impl Into<String>) -> Self {
        self.markdown_content = Some(content.into());
        self
    }
}

/// Payload posted to `POST /battles/{id}` and stored in the local journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub is_result: bool,
    pub message: String,
    pub reported_by: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown_content: Option<String>,
}

impl ProgressEvent {
    /// Stamp `update` with the current UTC time. Empty detail or markdown is dropped.
    pub fn from_update(update: &ProgressUpdate) -> Self {
        Self {
            is_result: false,
            message: update.message.clone(),
            reported_by: update.reported_by.clone(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            detail: update.detail.clone().filter(|d| !is_empty(d)),
            markdown_content: update.markdown_content.clone().filter(|m| !m.is_empty()),
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Where a progress event ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Backend,
    Local(PathBuf),
    /// Neither sink accepted the event; carries the last failure.
    Dropped(String),
}

impl std::fmt::Display for ReportOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportOutcome::Backend => write!(f, "logged to backend"),
            ReportOutcome::Local(path) => write!(f, "logged locally to {}", path.display()),
            ReportOutcome::Dropped(reason) => write!(f, "not logged: {reason}"),
        }
    }
}

pub struct ProgressReporter {
    backend: Arc<dyn BattleBackend>,
    log_dir: PathBuf,
}

impl ProgressReporter {
    pub fn new(backend: Arc<dyn BattleBackend>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            log_dir: log_dir.into(),
        }
    }

    pub fn fallback_path(&self, battle_id: &BattleId) -> PathBuf {
        self.log_dir.join(format!("{battle_id}.json"))
    }

    pub async fn report(&self, update: &ProgressUpdate) -> ReportOutcome {
        let event = ProgressEvent::from_update(update);
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(err) => return ReportOutcome::Dropped(err.to_string()),
        };

        match self.backend.post_battle_event(&update.battle_id, &payload).await {
            Ok(()) => return ReportOutcome::Backend,
            Err(err) => warn!(battle_id = %update.battle_id, error = %err, "backend log failed, writing locally"),
        }

        let path = self.fallback_path(&update.battle_id);
        match journal::append_entry(&path, EVENTS_KEY, payload).await {
            Ok(()) => ReportOutcome::Local(path),
            Err(err) => {
                error!(battle_id = %update.battle_id, error = %err, "local progress log failed");
                ReportOutcome::Dropped(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryBackend;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_event_shape() {
        let update = ProgressUpdate::new(BattleId::new("b-1"), "step done", "green")
            .with_detail(json!({}))
            .with_markdown("**ok**");
        let event = ProgressEvent::from_update(&update);
        assert!(!event.is_result);
        assert!(event.timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&event.timestamp).is_ok());
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("detail").is_none());
        assert_eq!(value["markdown_content"], "**ok**");
    }

    #[tokio::test]
    async fn test_backend_success() {
        let backend = Arc::new(MemoryBackend::new());
        let dir = TempDir::new().unwrap();
        let reporter = ProgressReporter::new(backend.clone(), dir.path());
        let outcome = reporter
            .report(&ProgressUpdate::new(BattleId::new("b-1"), "hello", "green"))
            .await;
        assert_eq!(outcome, ReportOutcome::Backend);
        assert_eq!(backend.events().len(), 1);
        assert!(!reporter.fallback_path(&BattleId::new("b-1")).exists());
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back_and_merges() {
        let backend = Arc::new(MemoryBackend::new().failing_events());
        let dir = TempDir::new().unwrap();
        let reporter = ProgressReporter::new(backend, dir.path().join("logs"));
        let battle = BattleId::new("b-9");

        for message in ["first", "second"] {
            let outcome = reporter
                .report(&ProgressUpdate::new(battle.clone(), message, "green").with_detail(json!({"k": 1})))
                .await;
            assert_eq!(outcome, ReportOutcome::Local(dir.path().join("logs/b-9.json")));
        }

        let events = journal::read_entries(&reporter.fallback_path(&battle), EVENTS_KEY).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["message"], "first");
        assert_eq!(events[1]["detail"], json!({"k": 1}));
    }
}
