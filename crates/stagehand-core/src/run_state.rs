//! Cooperative run control.
//!
//! An external controller owns a [`RunControl`] and moves it between
//! running, paused and stopped. The engine only reads it, at the start of
//! every retry iteration, every `waitFor` poll and every composition step,
//! and may set the transient "waiting" marker when it observes a pause.
//!
//! Stop is terminal and backed by a [`CancellationToken`], so long waits can
//! also race against it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

/// Transient marker set by the engine, cleared by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TempState {
    /// The engine gave up an operation because the run was paused and
    /// expects the controller to resume from the outside.
    Waiting,
}

/// Why an operation returned without a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Interrupt {
    Paused,
    Stopped,
}

#[derive(Debug, Default)]
pub struct RunControl {
    stop: CancellationToken,
    paused: AtomicBool,
    waiting: AtomicBool,
}

impl RunControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> RunState {
        if self.stop.is_cancelled() {
            RunState::Stopped
        } else if self.paused.load(Ordering::SeqCst) {
            RunState::Paused
        } else {
            RunState::Running
        }
    }

    /// The interrupt the engine should honour right now, if any.
    pub fn interrupt(&self) -> Option<Interrupt> {
        match self.state() {
            RunState::Running => None,
            RunState::Paused => Some(Interrupt::Paused),
            RunState::Stopped => Some(Interrupt::Stopped),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Has no effect once stopped.
    pub fn pause(&self) {
        if !self.is_stopped() {
            info!("run paused");
            self.paused.store(true, Ordering::SeqCst);
        }
    }

    pub fn resume(&self) {
        if !self.is_stopped() {
            info!("run resumed");
            self.paused.store(false, Ordering::SeqCst);
            self.waiting.store(false, Ordering::SeqCst);
        }
    }

    pub fn stop(&self) {
        info!("run stopped");
        self.paused.store(false, Ordering::SeqCst);
        self.stop.cancel();
    }

    pub fn temp_state(&self) -> Option<TempState> {
        self.waiting
            .load(Ordering::SeqCst)
            .then_some(TempState::Waiting)
    }

    pub(crate) fn mark_waiting(&self) {
        self.waiting.store(true, Ordering::SeqCst);
    }

    /// Resolves once the run is stopped.
    pub fn stopped(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.stop.cancelled()
    }
}
