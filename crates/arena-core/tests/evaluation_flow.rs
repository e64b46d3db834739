//! Evaluation of an opponent over task files, end to end.

mod common;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use arena_core::episode::Transition;
use arena_core::fakes::{ScriptedEnvFactory, ScriptedOpponent};
use arena_core::{
    BattleId, EpisodeOutcome, EpisodeRunner, EvaluationError, Evaluator, TaskCatalog, TimingLedger,
};

fn write_task(dir: &Path, id: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join(format!("{id}.json")),
        json!({"task_type": "pick_clean_then_place", "goal": id}).to_string(),
    )
    .unwrap();
}

fn fridge_env() -> ScriptedEnvFactory {
    ScriptedEnvFactory::new("You are in the kitchen.").with_transitions(vec![
        Transition {
            observation: "The fridge is open.".to_string(),
            reward: 0.0,
            done: false,
            info: json!({}),
        },
        Transition {
            observation: "You won!".to_string(),
            reward: 1.0,
            done: true,
            info: json!({"won": true}),
        },
    ])
}

/// Opponent that always answers "open fridge 1".
async fn fridge_opponent() -> String {
    let reply = || async {
        let mut body = String::new();
        for result in [
            json!({"kind": "message", "parts": [{"kind": "text", "text": "open fridge 1\n"}]}),
            json!({"kind": "status-update", "status": {"state": "completed"}, "final": true}),
        ] {
            body += &format!("data: {}\n\n", json!({"jsonrpc": "2.0", "id": "1", "result": result}));
        }
        ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
    };
    let app = Router::new()
        .route(
            "/.well-known/agent-card.json",
            get(|| async { Json(json!({"name": "White Agent", "url": ""})) }),
        )
        .route("/", post(reply));
    common::serve(app).await
}

#[tokio::test]
async fn test_evaluate_opponent_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let tasks = dir.path().join("tasks");
    write_task(&tasks, "pick_clean_1");
    write_task(&tasks.join("nested"), "pick_2");
    let base = fridge_opponent().await;

    let evaluator = Evaluator::new(
        EpisodeRunner::new(fridge_env(), 10),
        TaskCatalog::new(&tasks),
        dir.path().join("results"),
    );
    let report = evaluator
        .evaluate_opponent(
            reqwest::Client::new(),
            &base,
            Some(BattleId::new("battle-7")),
            &["pick_clean_1".to_string()],
            TimingLedger::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(report.battle_id, BattleId::new("battle-7"));
    assert_eq!(report.outcomes.len(), 1);
    let EpisodeOutcome::Completed(episode) = &report.outcomes[0] else {
        panic!("expected a completed episode");
    };
    assert!(episode.success);
    assert_eq!(episode.steps, 2);
    assert_eq!(episode.reward, 1.0);
    assert_eq!(episode.action_log[0].action, "open fridge 1");
    assert_eq!(episode.action_log[0].observation, "You are in the kitchen.");
    assert_eq!(episode.action_log[1].observation, "The fridge is open.");
    assert_eq!(episode.task_meta["goal"], "pick_clean_1");

    // open 2/2, repeated 1/2, no change 1/2
    let metrics = episode.metrics.unwrap();
    assert!((metrics.cleanup_score - 0.6).abs() < 1e-9);

    assert_eq!(report.artifact, dir.path().join("results/battle-7_results.json"));
    let stored: Value = serde_json::from_str(&std::fs::read_to_string(&report.artifact).unwrap()).unwrap();
    assert_eq!(stored.as_array().map(Vec::len), Some(1));
    assert_eq!(stored[0]["action_log"][0]["obs"], "You are in the kitchen.");
    assert!(report.summary().ends_with(&format!("Artifact saved to {}", report.artifact.display())));
}

#[tokio::test]
async fn test_empty_subset_runs_first_task_with_generated_battle() {
    let dir = tempfile::tempdir().unwrap();
    let tasks = dir.path().join("tasks");
    write_task(&tasks, "b_task");
    write_task(&tasks, "a_task");
    let base = fridge_opponent().await;

    let evaluator = Evaluator::new(
        EpisodeRunner::new(fridge_env(), 10),
        TaskCatalog::new(&tasks),
        dir.path(),
    );
    let report = evaluator
        .evaluate_opponent(
            reqwest::Client::new(),
            &base,
            None,
            &[],
            TimingLedger::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].task_json(), tasks.join("a_task.json"));
    assert!(!report.battle_id.as_str().is_empty());
    assert!(report.artifact.exists());
}

#[tokio::test]
async fn test_opponent_failure_is_recorded_and_evaluation_continues() {
    let dir = tempfile::tempdir().unwrap();
    let tasks = dir.path().join("tasks");
    write_task(&tasks, "first");
    write_task(&tasks, "second");
    let env = fridge_env();
    let closes = env.close_counter();

    let evaluator = Evaluator::new(EpisodeRunner::new(env, 10), TaskCatalog::new(&tasks), dir.path());
    let mut opponent = ScriptedOpponent::new(vec!["open fridge 1"]).fail_at(0);
    let report = evaluator
        .evaluate_with(
            &mut opponent,
            BattleId::new("b-3"),
            &["first".to_string(), "second".to_string()],
        )
        .await
        .unwrap();

    assert!(matches!(report.outcomes[0], EpisodeOutcome::Failed { ref error, .. } if error.contains("step 0")));
    assert!(matches!(report.outcomes[1], EpisodeOutcome::Completed(ref e) if e.success));
    assert_eq!(closes.load(Ordering::SeqCst), 2);

    let table = report.score_table();
    let rows: Vec<&str> = table.lines().collect();
    assert_eq!(rows.len(), 4);
    assert!(rows[2].starts_with("first | - | - | - | - | - | ? | ❌"));
    assert!(rows[3].starts_with("second | 0.60"));
    assert!(rows[3].ends_with("✅"));
}

#[tokio::test]
async fn test_unknown_task_aborts_before_any_episode() {
    let dir = tempfile::tempdir().unwrap();
    let tasks = dir.path().join("tasks");
    write_task(&tasks, "known");
    let env = fridge_env();
    let closes = env.close_counter();

    let evaluator = Evaluator::new(EpisodeRunner::new(env, 10), TaskCatalog::new(&tasks), dir.path());
    let mut opponent = ScriptedOpponent::new(vec!["look"]);
    let err = evaluator
        .evaluate_with(
            &mut opponent,
            BattleId::new("b-4"),
            &["known".to_string(), "missing".to_string()],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EvaluationError::Task(_)));
    assert!(opponent.prompts().is_empty());
    assert_eq!(closes.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("b-4_results.json").exists());
}
