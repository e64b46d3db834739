//! Sandbox lifecycle and command history.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arena_core::fakes::MemoryRuntime;
use arena_core::journal;
use arena_core::sandbox::HISTORY_KEY;
use arena_core::{BattleId, ExecOutcome, SandboxBridge, SandboxError, SandboxSettings};

fn settings(dir: &std::path::Path) -> SandboxSettings {
    SandboxSettings {
        log_dir: dir.join("logs"),
        ..SandboxSettings::default()
    }
}

#[tokio::test]
async fn test_missing_sandbox_is_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = MemoryRuntime::new();
    let execs = runtime.exec_counter();
    let bridge = SandboxBridge::new(runtime, settings(dir.path()));
    let battle = BattleId::new("b-404");

    let outcome = bridge.execute(&battle, "ls", "Red Agent").await.unwrap();
    assert_eq!(outcome, ExecOutcome::NotFound("container alfworld-b-404 not found".to_string()));
    assert_eq!(execs.load(Ordering::SeqCst), 0);
    assert!(!bridge.history_path(&battle).exists());
}

#[tokio::test]
async fn test_history_accumulates_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = SandboxBridge::new(MemoryRuntime::new().with_output(b"ok\n"), settings(dir.path()));
    let battle = BattleId::new("b-1");
    bridge.provision(&battle).await.unwrap();

    for (agent, command) in [("Red Agent", "whoami"), ("Blue Agent", "ps aux"), ("Red Agent", "cat /etc/passwd")] {
        let outcome = bridge.execute(&battle, command, agent).await.unwrap();
        assert_eq!(outcome.text(), "ok\n");
    }

    let path = bridge.history_path(&battle);
    assert_eq!(path, dir.path().join("logs/cmd_history_b-1.json"));
    let history = journal::read_entries(&path, HISTORY_KEY).await;
    let commands: Vec<&str> = history.iter().map(|e| e["command"].as_str().unwrap()).collect();
    assert_eq!(commands, vec!["whoami", "ps aux", "cat /etc/passwd"]);
    assert_eq!(history[1]["agent"], "Blue Agent");
    assert!(history[0]["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_teardown_of_unknown_battle_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = MemoryRuntime::new();
    let stops = runtime.stop_counter();
    let bridge = SandboxBridge::new(runtime, settings(dir.path()));

    bridge.teardown(&BattleId::new("never-started")).await;
    assert_eq!(stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reprovision_after_teardown() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = SandboxBridge::new(MemoryRuntime::new(), settings(dir.path()));
    let battle = BattleId::new("b-2");

    bridge.provision(&battle).await.unwrap();
    bridge.teardown(&battle).await;
    let outcome = bridge.execute(&battle, "ls", "Red Agent").await.unwrap();
    assert!(matches!(outcome, ExecOutcome::NotFound(_)));

    let handle = bridge.provision(&battle).await.unwrap();
    assert_eq!(handle.name, "alfworld-b-2");
    assert!(bridge.is_provisioned(&battle).await);
}

#[tokio::test]
async fn test_slow_start_does_not_block_other_battles() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = MemoryRuntime::new()
        .with_output(b"ok")
        .with_run_delay("alfworld-slow", Duration::from_secs(2));
    let bridge = Arc::new(SandboxBridge::new(runtime, settings(dir.path())));
    let fast = BattleId::new("fast");
    let slow = BattleId::new("slow");
    bridge.provision(&fast).await.unwrap();

    let pending = {
        let bridge = bridge.clone();
        let slow = slow.clone();
        tokio::spawn(async move { bridge.provision(&slow).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let outcome = bridge.execute(&fast, "ls", "Red Agent").await.unwrap();
    assert_eq!(outcome, ExecOutcome::Output("ok".to_string()));
    assert!(bridge.is_provisioned(&fast).await);
    assert!(!bridge.is_provisioned(&slow).await);
    assert!(matches!(
        bridge.provision(&slow).await,
        Err(SandboxError::AlreadyProvisioned(_))
    ));
    assert!(started.elapsed() < Duration::from_secs(1));

    pending.await.unwrap().unwrap();
    assert!(bridge.is_provisioned(&slow).await);
}

#[tokio::test]
async fn test_failed_start_frees_the_battle() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = MemoryRuntime::new().with_failing_run("alfworld-b-5");
    let bridge = SandboxBridge::new(runtime, settings(dir.path()));
    let battle = BattleId::new("b-5");

    let err = bridge.provision(&battle).await.unwrap_err();
    assert!(matches!(err, SandboxError::CommandFailed { .. }));
    assert!(!bridge.is_provisioned(&battle).await);
    // The slot is released, so the failure repeats instead of AlreadyProvisioned.
    assert!(matches!(
        bridge.provision(&battle).await,
        Err(SandboxError::CommandFailed { .. })
    ));
}
