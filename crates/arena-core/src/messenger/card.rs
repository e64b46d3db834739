//! Opponent capability document.

use serde::{Deserialize, Serialize};

use super::{MessengerError, MessengerResult};
use crate::readiness::AGENT_CARD_PATH;

/// The parts of an agent card the messenger relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    /// Messaging endpoint. Empty means "same as the card's base URL".
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub streaming: bool,
}

impl AgentCard {
    /// Endpoint to post messages to.
    pub fn endpoint<'a>(&'a self, base_url: &'a str) -> &'a str {
        if self.url.is_empty() {
            base_url
        } else {
            &self.url
        }
    }
}

/// Fetch `{base_url}/.well-known/agent-card.json`.
pub async fn resolve_card(http: &reqwest::Client, base_url: &str) -> MessengerResult<AgentCard> {
    let url = format!("{}/{}", base_url.trim_end_matches('/'), AGENT_CARD_PATH);
    let failed = |reason: String| MessengerError::CardResolution {
        url: url.clone(),
        reason,
    };

    let resp = http.get(&url).send().await.map_err(|e| failed(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(failed(format!("status {status}")));
    }
    resp.json::<AgentCard>()
        .await
        .map_err(|e| failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_card_parses_camel_case() {
        let card: AgentCard = serde_json::from_value(json!({
            "name": "White Agent",
            "url": "http://localhost:9011/",
            "description": "plays alfworld",
            "version": "1.0.0",
            "capabilities": {"streaming": true},
            "defaultInputModes": ["text"],
        }))
        .unwrap();
        assert_eq!(card.name, "White Agent");
        assert!(card.capabilities.streaming);
        assert_eq!(card.endpoint("http://other/"), "http://localhost:9011/");
    }

    #[test]
    fn test_empty_url_falls_back_to_base() {
        let card: AgentCard = serde_json::from_value(json!({"name": "x"})).unwrap();
        assert_eq!(card.endpoint("http://localhost:9011/"), "http://localhost:9011/");
        assert!(!card.capabilities.streaming);
    }
}
