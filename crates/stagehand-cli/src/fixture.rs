//! A driver backed by recorded snapshots.
//!
//! Each `source_tree` call serves the next snapshot; once the list is
//! exhausted the last one repeats. Every interaction succeeds without side
//! effects, which makes the driver suitable for dry-running assets.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use stagehand_core::driver::{Backend, Driver, DriverError, ScrollOptions, TapOptions};
use stagehand_core::element::{Element, RawSnapshot};
use tracing::debug;

pub struct FixtureDriver {
    snapshots: Vec<RawSnapshot>,
    served: AtomicUsize,
}

impl FixtureDriver {
    pub fn new(snapshots: Vec<RawSnapshot>) -> Self {
        Self {
            snapshots,
            served: AtomicUsize::new(0),
        }
    }

    /// Reads one snapshot file per path, in order.
    pub fn from_files(paths: &[impl AsRef<Path>]) -> Result<Self, FixtureError> {
        let snapshots = paths
            .iter()
            .map(|path| read_snapshot(path.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(snapshots))
    }
}

#[derive(Debug)]
pub enum FixtureError {
    Io(String, std::io::Error),
    Parse(String, serde_json::Error),
}

impl std::fmt::Display for FixtureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixtureError::Io(path, e) => write!(f, "{}: {}", path, e),
            FixtureError::Parse(path, e) => write!(f, "{}: not a snapshot: {}", path, e),
        }
    }
}

pub fn read_snapshot(path: &Path) -> Result<RawSnapshot, FixtureError> {
    let shown = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|e| FixtureError::Io(shown.clone(), e))?;
    serde_json::from_str(&text).map_err(|e| FixtureError::Parse(shown, e))
}

#[async_trait]
impl Driver for FixtureDriver {
    fn backend(&self) -> Backend {
        Backend::LocalAgent
    }

    async fn source_tree(&self) -> Result<RawSnapshot, DriverError> {
        let n = self.served.fetch_add(1, Ordering::SeqCst);
        let index = n.min(self.snapshots.len().saturating_sub(1));
        debug!(served = n + 1, index, "serving snapshot");
        self.snapshots.get(index).cloned().ok_or(DriverError::NotConnected)
    }

    async fn tap(&self, element: &Element, options: TapOptions) -> Result<(), DriverError> {
        debug!(element = %element.id, count = options.count, "tap");
        Ok(())
    }

    async fn set_value(&self, element: &Element, text: &str) -> Result<(), DriverError> {
        debug!(element = %element.id, text, "set value");
        Ok(())
    }

    async fn send_keys(&self, element: Option<&Element>, keys: &str) -> Result<(), DriverError> {
        debug!(element = element.map(|e| e.id.as_str()), keys, "send keys");
        Ok(())
    }

    async fn scroll(&self, element: &Element, options: ScrollOptions) -> Result<(), DriverError> {
        debug!(element = %element.id, direction = ?options.direction, "scroll");
        Ok(())
    }

    async fn start_application(&self, app_id: &str) -> Result<(), DriverError> {
        debug!(app_id, "launch");
        Ok(())
    }

    async fn stop_application(&self, app_id: &str) -> Result<(), DriverError> {
        debug!(app_id, "terminate");
        Ok(())
    }

    async fn home(&self) -> Result<(), DriverError> {
        Ok(())
    }
}
