//! End-to-end scenarios: assertion retries, capture storage, pausing
//! mid-wait and stop handling.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{action, config_with_retries, context, context_with_run, interpreter, screen, ScriptedDriver};

use stagehand_core::asset::MemoryResolver;
use stagehand_core::config::EngineConfig;
use stagehand_core::driver::Backend;
use stagehand_core::journal::{Journal, Verdict};
use stagehand_core::run_state::{RunControl, RunState, TempState};

#[tokio::test]
async fn test_assert_exists_passes_then_fails_after_bounded_refreshes() {
    let driver = Arc::new(ScriptedDriver::new(vec![screen(&[("Button", "Save")])]));
    let mut ctx = context(driver.clone(), config_with_retries(2));
    let interpreter = interpreter(Arc::new(MemoryResolver::new()));

    let outcome = interpreter
        .execute(&action(json!({"assert": "Save", "using": "name", "exists": true})), &mut ctx)
        .await;
    assert!(outcome.passed, "{}", outcome.message);
    assert_eq!(ctx.tree().get("button:0").and_then(|e| e.name.as_deref()), Some("Save"));
    let before = driver.refreshes();

    let outcome = interpreter
        .execute(&action(json!({"assert": "Cancel", "using": "name", "exists": true})), &mut ctx)
        .await;
    assert!(!outcome.passed);
    assert!(!outcome.interrupted);
    assert_eq!(
        outcome.message,
        "Should find `Cancel`: no elements were found after 2 attempts"
    );
    assert_eq!(driver.refreshes() - before, 2);
}

#[tokio::test]
async fn test_store_with_capture() {
    let driver = Arc::new(ScriptedDriver::new(vec![screen(&[])]));
    let mut ctx = context(driver, EngineConfig::default());
    let interpreter = interpreter(Arc::new(MemoryResolver::new()));

    let outcome = interpreter
        .execute(
            &action(json!({"store": "v1.0.3", "capture": "(\\d+)\\.(\\d+)\\.(\\d+)", "as": "ver"})),
            &mut ctx,
        )
        .await;
    assert!(outcome.passed, "{}", outcome.message);
    assert_eq!(ctx.variables.get("ver"), Some(&json!(["1.0.3", "1", "0", "3"])));

    let outcome = interpreter
        .execute(
            &action(json!({"store": "v1.0.3", "capture": "(\\d+)\\.(\\d+)\\.(\\d+)", "index": 1, "as": "ver"})),
            &mut ctx,
        )
        .await;
    assert!(outcome.passed, "{}", outcome.message);
    assert_eq!(ctx.variables.get("ver"), Some(&json!("1")));
}

#[tokio::test]
async fn test_pause_during_wait_for_interrupts_once() {
    let run = RunControl::new();
    let driver = Arc::new(ScriptedDriver::new(vec![screen(&[])]).pausing_on_refresh(1, run.clone()));
    let mut ctx = context_with_run(driver.clone(), config_with_retries(10), run.clone());
    let journal = Journal::new();
    let mut records = journal.subscribe();
    ctx = ctx.with_journal(journal);
    let interpreter = interpreter(Arc::new(MemoryResolver::new()));

    let outcome = interpreter
        .execute(&action(json!({"waitFor": "Toast", "using": "name"})), &mut ctx)
        .await;

    assert!(!outcome.passed);
    assert!(outcome.interrupted);
    assert_eq!(run.state(), RunState::Paused);
    assert_eq!(run.temp_state(), Some(TempState::Waiting));
    assert_eq!(driver.refreshes(), 1);

    let record = records.try_recv().unwrap();
    assert_eq!(record.verb, "waitFor");
    assert_eq!(record.verdict, Verdict::Interrupted);
    assert!(records.try_recv().is_err(), "only one record per action");

    run.resume();
    assert_eq!(run.temp_state(), None);
}

#[tokio::test]
async fn test_wait_for_on_web_requires_visibility() {
    let snapshot = serde_json::from_value(json!({
        "screen": {"width": 1280, "height": 800},
        "roots": [{
            "type": "Document",
            "children": [
                {"type": "Link", "name": "Footer", "rect": {"x": 0, "y": 2400, "width": 100, "height": 20}}
            ]
        }]
    }))
    .unwrap();

    let web = Arc::new(ScriptedDriver::new(vec![snapshot]).with_backend(Backend::WebEngine));
    let mut ctx = context(web.clone(), config_with_retries(1));
    let interpreter = interpreter(Arc::new(MemoryResolver::new()));
    let wait_for = action(json!({"waitFor": "Footer", "using": "name", "attempts": 2}));

    let outcome = interpreter.execute(&wait_for, &mut ctx).await;
    assert!(!outcome.passed);
    assert!(outcome.message.contains("after 2 attempts"), "{}", outcome.message);
    // First fetch plus two retry rounds.
    assert_eq!(web.refreshes(), 3);

    assert_eq!(ctx.tree().root().element_type, "document");
}

#[tokio::test]
async fn test_wait_for_native_accepts_offscreen() {
    let snapshot = serde_json::from_value(json!([
        {"type": "Link", "name": "Footer", "rect": {"x": 0, "y": 2400, "width": 100, "height": 20}}
    ]))
    .unwrap();
    let driver = Arc::new(ScriptedDriver::new(vec![snapshot]));
    let mut ctx = context(driver, config_with_retries(1));
    let interpreter = interpreter(Arc::new(MemoryResolver::new()));

    let outcome = interpreter
        .execute(&action(json!({"waitFor": "Footer", "using": "name"})), &mut ctx)
        .await;
    assert!(outcome.passed, "{}", outcome.message);
}

#[tokio::test(start_paused = true)]
async fn test_long_wait_refreshes_for_keepalive() {
    let driver = Arc::new(ScriptedDriver::new(vec![screen(&[])]));
    let config = EngineConfig {
        keepalive_ms: 20_000,
        ..EngineConfig::default()
    };
    let mut ctx = context(driver.clone(), config);
    let interpreter = interpreter(Arc::new(MemoryResolver::new()));

    let outcome = interpreter.execute(&action(json!({"wait": 50_000})), &mut ctx).await;
    assert!(outcome.passed, "{}", outcome.message);
    assert_eq!(driver.refreshes(), 2);

    let outcome = interpreter.execute(&action(json!({"wait": 500})), &mut ctx).await;
    assert!(outcome.passed);
    assert_eq!(driver.refreshes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cuts_wait_short() {
    let run = RunControl::new();
    let driver = Arc::new(ScriptedDriver::new(vec![screen(&[])]));
    let mut ctx = context_with_run(driver, EngineConfig::default(), run.clone());
    let interpreter = interpreter(Arc::new(MemoryResolver::new()));

    let stopper = run.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stopper.stop();
    });

    let outcome = interpreter.execute(&action(json!({"wait": 10_000})), &mut ctx).await;
    assert!(outcome.interrupted);
    assert_eq!(outcome.message, "Interrupted: run stopped");
    assert_eq!(run.state(), RunState::Stopped);
}

#[tokio::test]
async fn test_stopped_run_interrupts_composition() {
    let run = RunControl::new();
    let driver = Arc::new(ScriptedDriver::new(vec![screen(&[("Button", "Save")])]));
    let mut ctx = context_with_run(driver.clone(), EngineConfig::default(), run.clone());
    let resolver = Arc::new(MemoryResolver::new().with(common::asset(
        stagehand_core::asset::AssetKind::Action,
        "save",
        vec![json!({"tap": "Save", "using": "name"})],
    )));
    let interpreter = interpreter(resolver);

    run.stop();
    let outcome = interpreter.execute(&action(json!({"execute": "save"})), &mut ctx).await;

    assert!(outcome.interrupted);
    assert!(driver.calls().is_empty());
}
