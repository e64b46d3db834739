//! Opponent messaging against a streaming agent server.

mod common;

use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use arena_core::{A2aMessenger, BattleId, MessengerError, OpponentClient, TimingLedger};

fn card(name: &str) -> Json<Value> {
    Json(json!({
        "name": name,
        "url": "",
        "version": "1.0.0",
        "capabilities": {"streaming": true},
    }))
}

fn event(result: Value) -> String {
    format!("data: {}\n\n", json!({"jsonrpc": "2.0", "id": "1", "result": result}))
}

fn text_message(text: &str) -> Value {
    json!({"kind": "message", "role": "agent", "parts": [{"kind": "text", "text": text}]})
}

fn sse(body: String) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

/// Streams the prompt back in two chunks, then a final status, then noise.
async fn echo(Json(request): Json<Value>) -> impl IntoResponse {
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(request["method"], "message/stream");
    let prompt = request["params"]["message"]["parts"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let mut body = event(json!({"kind": "task", "id": "task-1"}));
    body += &event(text_message("echo: "));
    body += &event(json!({"kind": "artifact-update", "artifact": {"parts": [{"kind": "text", "text": "ignored"}]}}));
    body += &event(text_message(&prompt));
    body += &event(json!({"kind": "status-update", "status": {"state": "completed"}, "final": true}));
    body += &event(text_message(" after final"));
    sse(body)
}

async fn opponent(handler: Router) -> String {
    let app = Router::new()
        .route("/.well-known/agent-card.json", get(|| async { card("White Agent") }))
        .merge(handler);
    common::serve(app).await
}

async fn connect(base: &str, battle: &str, ledger: &TimingLedger, timeout: Duration) -> A2aMessenger {
    A2aMessenger::connect(
        reqwest::Client::new(),
        base,
        BattleId::new(battle),
        ledger.clone(),
        timeout,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_reply_concatenates_text_chunks_until_final() {
    let base = opponent(Router::new().route("/", post(echo))).await;
    let ledger = TimingLedger::new();
    let mut messenger = connect(&base, "b-1", &ledger, Duration::from_secs(5)).await;

    assert_eq!(messenger.card().name, "White Agent");
    let reply = messenger.ask("open fridge 1").await.unwrap();
    assert_eq!(reply.text, "echo: open fridge 1");
    assert!(reply.elapsed >= Duration::from_millis(30));
    assert_eq!(reply.cumulative, reply.elapsed);
}

#[tokio::test]
async fn test_cumulative_time_accumulates_and_resets() {
    let base = opponent(Router::new().route("/", post(echo))).await;
    let ledger = TimingLedger::new();
    let mut messenger = connect(&base, "b-1", &ledger, Duration::from_secs(5)).await;

    let first = messenger.ask("look").await.unwrap();
    let second = messenger.ask("inventory").await.unwrap();
    assert_eq!(second.cumulative, first.elapsed + second.elapsed);
    assert_eq!(ledger.cumulative(&BattleId::new("b-1")), second.cumulative);

    messenger.reset_timer();
    assert_eq!(ledger.cumulative(&BattleId::new("b-1")), Duration::ZERO);
    let third = messenger.ask("look").await.unwrap();
    assert_eq!(third.cumulative, third.elapsed);
}

#[tokio::test]
async fn test_battles_keep_separate_timers() {
    let base = opponent(Router::new().route("/", post(echo))).await;
    let ledger = TimingLedger::new();
    let mut first = connect(&base, "b-1", &ledger, Duration::from_secs(5)).await;
    let mut second = connect(&base, "b-2", &ledger, Duration::from_secs(5)).await;

    let a = first.ask("look").await.unwrap();
    let b = second.ask("look").await.unwrap();
    assert_eq!(b.cumulative, b.elapsed);

    second.reset_timer();
    assert_eq!(ledger.cumulative(&BattleId::new("b-1")), a.elapsed);
    assert_eq!(ledger.cumulative(&BattleId::new("b-2")), Duration::ZERO);
}

#[tokio::test]
async fn test_missing_card_fails_connect() {
    let base = common::serve(Router::new()).await;
    let err = A2aMessenger::connect(
        reqwest::Client::new(),
        &base,
        BattleId::new("b-1"),
        TimingLedger::new(),
        Duration::from_secs(5),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, MessengerError::CardResolution { .. }));
}

#[tokio::test]
async fn test_remote_error_envelope() {
    let handler = Router::new().route(
        "/",
        post(|| async {
            let body = format!(
                "data: {}\n\n",
                json!({"jsonrpc": "2.0", "id": "1", "error": {"code": -32603, "message": "model overloaded"}})
            );
            sse(body)
        }),
    );
    let base = opponent(handler).await;
    let ledger = TimingLedger::new();
    let mut messenger = connect(&base, "b-1", &ledger, Duration::from_secs(5)).await;

    let err = messenger.ask("look").await.unwrap_err();
    assert!(matches!(err, MessengerError::Remote { code: -32603, ref message } if message == "model overloaded"));
    assert_eq!(ledger.cumulative(&BattleId::new("b-1")), Duration::ZERO);
}

#[tokio::test]
async fn test_http_error_status() {
    let handler = Router::new().route("/", post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }));
    let base = opponent(handler).await;
    let mut messenger = connect(&base, "b-1", &TimingLedger::new(), Duration::from_secs(5)).await;

    let err = messenger.ask("look").await.unwrap_err();
    assert!(matches!(err, MessengerError::HttpStatus { status: 502, ref body } if body == "upstream down"));
}

#[tokio::test]
async fn test_slow_opponent_times_out() {
    let handler = Router::new().route(
        "/",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            sse(event(text_message("too late")))
        }),
    );
    let base = opponent(handler).await;
    let ledger = TimingLedger::new();
    let mut messenger = connect(&base, "b-1", &ledger, Duration::from_millis(200)).await;

    let err = messenger.ask("look").await.unwrap_err();
    assert!(matches!(err, MessengerError::Timeout(t) if t == Duration::from_millis(200)));
    assert_eq!(ledger.cumulative(&BattleId::new("b-1")), Duration::ZERO);
}

#[tokio::test]
async fn test_stream_without_final_status_uses_all_text() {
    let handler = Router::new().route(
        "/",
        post(|| async { sse(event(text_message("go to ")) + &event(text_message("cabinet 1"))) }),
    );
    let base = opponent(handler).await;
    let mut messenger = connect(&base, "b-1", &TimingLedger::new(), Duration::from_secs(5)).await;

    assert_eq!(messenger.ask("where?").await.unwrap().text, "go to cabinet 1");
}
