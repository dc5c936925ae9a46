//! Backend-agnostic driver trait.
//!
//! A [`Driver`] is the engine's only way to touch a device, emulator or
//! browser. The interpreter never calls a driver directly; every call goes
//! through a [`QueuedDriver`](crate::queue::QueuedDriver) so that commands for
//! one session are never interleaved.
//!
//! Implementors provide the hierarchy dump and the element interactions.
//! App lifecycle and device-level calls have defaults that report
//! [`DriverError::Unsupported`], since not every backend can honour them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::element::{Element, RawSnapshot};
use crate::queue::QueueError;

/// Errors reported by a driver backend.
///
/// The interpreter treats every variant as an opaque transport failure and
/// appends its display text to the action's failure message.
#[derive(Error, Debug)]
pub enum DriverError {
    /// A command or operation failed with the given message.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The backend is not available or not connected.
    #[error("Not connected to automation backend")]
    NotConnected,

    /// The backend has no implementation for this capability.
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    /// The command never reached the backend.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// The backend families a driver can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Remote device farm reached over a cloud API.
    DeviceFarm,
    /// Automation agent running next to the app under test.
    LocalAgent,
    /// The platform's own automation framework.
    NativeMobile,
    /// A browser engine.
    WebEngine,
}

impl Backend {
    /// Whether `waitFor` must also see the element as visible.
    pub fn wait_requires_visibility(self) -> bool {
        matches!(self, Backend::WebEngine)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapOptions {
    /// Number of taps; 2 is a double tap.
    pub count: u32,
    /// Press duration for a long press.
    pub hold_ms: Option<u64>,
}

impl Default for TapOptions {
    fn default() -> Self {
        Self {
            count: 1,
            hold_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrollOptions {
    pub direction: ScrollDirection,
    /// Scroll distance in points; the backend decides when absent.
    pub distance: Option<f64>,
    /// Scroll until `element` is on screen rather than scrolling `element` itself.
    pub into_view: bool,
}

/// UI interaction primitives for one backend session.
#[async_trait]
pub trait Driver: Send + Sync {
    fn backend(&self) -> Backend;

    /// Dumps the current UI hierarchy.
    async fn source_tree(&self) -> Result<RawSnapshot, DriverError>;

    async fn tap(&self, element: &Element, options: TapOptions) -> Result<(), DriverError>;

    /// Replaces the element's value without simulating key presses.
    async fn set_value(&self, element: &Element, text: &str) -> Result<(), DriverError>;

    /// Types text into the element as a user would.
    ///
    /// The default focuses the element with a tap and then sends keys.
    async fn type_in(&self, element: &Element, text: &str) -> Result<(), DriverError> {
        self.tap(element, TapOptions::default()).await?;
        self.send_keys(Some(element), text).await
    }

    /// Sends keys to `element`, or to whatever has focus when `None`.
    async fn send_keys(&self, element: Option<&Element>, keys: &str) -> Result<(), DriverError>;

    async fn scroll(&self, element: &Element, options: ScrollOptions) -> Result<(), DriverError>;

    async fn start_application(&self, app_id: &str) -> Result<(), DriverError> {
        let _ = app_id;
        Err(DriverError::Unsupported("startApplication"))
    }

    async fn stop_application(&self, app_id: &str) -> Result<(), DriverError> {
        let _ = app_id;
        Err(DriverError::Unsupported("stopApplication"))
    }

    async fn home(&self) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("home"))
    }

    async fn lock(&self) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("lock"))
    }

    /// Captures the screen as PNG bytes.
    async fn take_screenshot(&self) -> Result<Vec<u8>, DriverError> {
        Err(DriverError::Unsupported("takeScreenshot"))
    }
}
