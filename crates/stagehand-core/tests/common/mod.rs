//! Shared test helpers for stagehand-core integration tests.
//!
//! [`ScriptedDriver`] serves a fixed sequence of snapshots (the last one
//! repeats) and records every call it receives, so tests can assert on
//! refresh counts and interaction order without a device.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use stagehand_core::action::Action;
use stagehand_core::asset::{Asset, AssetKind, MemoryResolver};
use stagehand_core::config::EngineConfig;
use stagehand_core::context::ExecutionContext;
use stagehand_core::driver::{Backend, Driver, DriverError, ScrollOptions, TapOptions};
use stagehand_core::element::{Element, RawSnapshot};
use stagehand_core::interpreter::ActionInterpreter;
use stagehand_core::run_state::RunControl;

// ---------------------------------------------------------------------------
// Scripted driver
// ---------------------------------------------------------------------------

pub struct ScriptedDriver {
    backend: Backend,
    snapshots: Vec<RawSnapshot>,
    refreshes: AtomicUsize,
    calls: Mutex<Vec<String>>,
    /// Pause this run control on the given refresh number (1-based).
    pause_on_refresh: Option<(usize, Arc<RunControl>)>,
}

impl ScriptedDriver {
    pub fn new(snapshots: Vec<RawSnapshot>) -> Self {
        Self {
            backend: Backend::NativeMobile,
            snapshots,
            refreshes: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            pause_on_refresh: None,
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn pausing_on_refresh(mut self, refresh: usize, run: Arc<RunControl>) -> Self {
        self.pause_on_refresh = Some((refresh, run));
        self
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn source_tree(&self) -> Result<RawSnapshot, DriverError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, run)) = &self.pause_on_refresh {
            if *at == n {
                run.pause();
            }
        }
        let index = (n - 1).min(self.snapshots.len().saturating_sub(1));
        self.snapshots.get(index).cloned().ok_or(DriverError::NotConnected)
    }

    async fn tap(&self, element: &Element, options: TapOptions) -> Result<(), DriverError> {
        self.record(format!("tap {} x{}", element.id, options.count));
        Ok(())
    }

    async fn set_value(&self, element: &Element, text: &str) -> Result<(), DriverError> {
        self.record(format!("set_value {} {}", element.id, text));
        Ok(())
    }

    async fn send_keys(&self, element: Option<&Element>, keys: &str) -> Result<(), DriverError> {
        let target = element.map(|e| e.id.as_str()).unwrap_or("-");
        self.record(format!("send_keys {} {}", target, keys));
        Ok(())
    }

    async fn scroll(&self, element: &Element, options: ScrollOptions) -> Result<(), DriverError> {
        self.record(format!("scroll {} {:?} into_view={}", element.id, options.direction, options.into_view));
        Ok(())
    }

    async fn start_application(&self, app_id: &str) -> Result<(), DriverError> {
        self.record(format!("launch {app_id}"));
        Ok(())
    }

    async fn take_screenshot(&self) -> Result<Vec<u8>, DriverError> {
        self.record("screenshot".to_string());
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// A window holding one child per `(type, name)` pair, stacked vertically on screen.
pub fn screen(children: &[(&str, &str)]) -> RawSnapshot {
    let nodes: Vec<Value> = children
        .iter()
        .enumerate()
        .map(|(i, (kind, name))| {
            json!({
                "type": kind,
                "name": name,
                "label": name,
                "rect": {"x": 0, "y": 100 + i * 60, "width": 200, "height": 44}
            })
        })
        .collect();
    serde_json::from_value(json!({
        "screen": {"width": 390, "height": 844},
        "roots": [{
            "type": "Window",
            "rect": {"x": 0, "y": 0, "width": 390, "height": 844},
            "children": nodes
        }]
    }))
    .unwrap()
}

pub fn empty_screen() -> RawSnapshot {
    screen(&[])
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

pub fn config_with_retries(retries: u32) -> EngineConfig {
    EngineConfig {
        retries,
        ..EngineConfig::default()
    }
}

pub fn context(driver: Arc<ScriptedDriver>, config: EngineConfig) -> ExecutionContext {
    ExecutionContext::new(driver, config, RunControl::new()).unwrap()
}

pub fn context_with_run(
    driver: Arc<ScriptedDriver>,
    config: EngineConfig,
    run: Arc<RunControl>,
) -> ExecutionContext {
    ExecutionContext::new(driver, config, run).unwrap()
}

pub fn action(value: Value) -> Action {
    Action::from_value(value).unwrap()
}

pub fn asset(kind: AssetKind, name: &str, actions: Vec<Value>) -> Asset {
    Asset::new(kind, name, actions.into_iter().map(action).collect())
}

pub fn interpreter(resolver: Arc<MemoryResolver>) -> ActionInterpreter {
    ActionInterpreter::new(resolver)
}
