//! Opponent messaging.
//!
//! An [`OpponentClient`] turns one prompt into one reply and keeps track of
//! how long the opponent has spent answering within the current battle.
//! [`A2aMessenger`] is the network implementation: it resolves the
//! opponent's agent card once, then sends each prompt as a streaming
//! `message/stream` JSON-RPC request and reads the reply from the event
//! stream.

pub mod card;
pub mod clock;
pub mod stream;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde_json::json;
use tracing::debug;

use crate::domain::BattleId;

pub use card::{resolve_card, AgentCard};
pub use clock::TimingLedger;
pub use stream::{fold_chunk, parse_event, SseDecoder, StreamChunk};

/// Errors of one opponent exchange or of session setup.
#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("could not resolve agent card at {url}: {reason}")]
    CardResolution { url: String, reason: String },

    #[error("opponent request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("opponent answered {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("opponent did not answer within {0:?}")]
    Timeout(Duration),

    #[error("opponent returned error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("malformed stream event: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result type for messenger operations.
pub type MessengerResult<T> = std::result::Result<T, MessengerError>;

/// One answered prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    /// Wall-clock time of this exchange.
    pub elapsed: Duration,
    /// Total opponent time in this session since the last reset.
    pub cumulative: Duration,
}

/// Prompt/reply channel to an opponent agent.
#[async_trait]
pub trait OpponentClient: Send {
    /// Send one prompt and wait for the complete reply.
    async fn ask(&mut self, prompt: &str) -> MessengerResult<Reply>;

    /// Zero the session's cumulative time.
    fn reset_timer(&mut self);
}

/// Default per-exchange timeout.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(120);

/// Streaming messenger bound to one opponent and one battle.
pub struct A2aMessenger {
    http: reqwest::Client,
    card: AgentCard,
    endpoint: String,
    battle_id: BattleId,
    ledger: TimingLedger,
    timeout: Duration,
}

impl A2aMessenger {
    /// Resolve the opponent's card and open a session for `battle_id`.
    ///
    /// A card that cannot be resolved makes the session unusable.
    pub async fn connect(
        http: reqwest::Client,
        base_url: &str,
        battle_id: BattleId,
        ledger: TimingLedger,
        timeout: Duration,
    ) -> MessengerResult<Self> {
        let card = resolve_card(&http, base_url).await?;
        let endpoint = card.endpoint(base_url).to_string();
        debug!(opponent = %card.name, endpoint = %endpoint, "agent card resolved");
        Ok(Self {
            http,
            card,
            endpoint,
            battle_id,
            ledger,
            timeout,
        })
    }

    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    pub fn battle_id(&self) -> &BattleId {
        &self.battle_id
    }

    async fn exchange(&self, prompt: &str) -> MessengerResult<String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": "message/stream",
            "params": {
                "message": {
                    "kind": "message",
                    "role": "user",
                    "messageId": uuid::Uuid::new_v4().to_string(),
                    "parts": [{"kind": "text", "text": prompt}],
                }
            }
        });
        let resp = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MessengerError::HttpStatus {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let mut reply = String::new();
        let mut decoder = SseDecoder::default();
        let mut events = resp.bytes_stream();
        while let Some(bytes) = events.next().await {
            for data in decoder.push(&bytes?) {
                if let Some(chunk) = parse_event(&data)? {
                    if fold_chunk(chunk, &mut reply) {
                        return Ok(reply);
                    }
                }
            }
        }
        if let Some(data) = decoder.finish() {
            if let Some(chunk) = parse_event(&data)? {
                fold_chunk(chunk, &mut reply);
            }
        }
        Ok(reply)
    }
}

#[async_trait]
impl OpponentClient for A2aMessenger {
    async fn ask(&mut self, prompt: &str) -> MessengerResult<Reply> {
        let started = Instant::now();
        let text = tokio::time::timeout(self.timeout, self.exchange(prompt))
            .await
            .map_err(|_| MessengerError::Timeout(self.timeout))??;
        let elapsed = started.elapsed();
        let cumulative = self.ledger.record(&self.battle_id, elapsed);
        Ok(Reply {
            text,
            elapsed,
            cumulative,
        })
    }

    fn reset_timer(&mut self) {
        self.ledger.reset(&self.battle_id);
    }
}
