//! Per-driver command serialization.
//!
//! A [`CommandQueue`] owns one worker task draining an unbounded mpsc channel.
//! The worker awaits each unit to completion before receiving the next, so
//! units run strictly in submission order with at most one in flight.
//! Enqueuing is synchronous; the returned [`Completion`] resolves when the
//! unit has run.
//!
//! Each unit is run in its own spawned task and the worker awaits its
//! handle. A unit that panics therefore only fails its own completion
//! ([`QueueError::Abandoned`]) and the queue moves on to the next unit.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::driver::{Backend, Driver, DriverError, ScrollOptions, TapOptions};
use crate::element::{Element, RawSnapshot};

type Unit = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("command queue is closed")]
    Closed,

    #[error("command was abandoned before completing")]
    Abandoned,
}

/// A strict-FIFO, single-in-flight work queue.
///
/// Cloning yields another handle onto the same worker.
#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Unit>,
    label: Arc<str>,
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("label", &self.label)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl CommandQueue {
    /// Starts the worker task. Must be called inside a tokio runtime.
    pub fn spawn(label: impl Into<String>) -> Self {
        let label: Arc<str> = Arc::from(label.into());
        let (tx, mut rx) = mpsc::unbounded_channel::<Unit>();
        let worker_label = label.clone();
        tokio::spawn(async move {
            let mut seq: u64 = 0;
            while let Some(unit) = rx.recv().await {
                seq += 1;
                debug!(queue = %worker_label, seq, "dispatching unit");
                if let Err(e) = tokio::spawn(unit).await {
                    warn!(queue = %worker_label, seq, error = %e, "queued unit did not complete");
                }
            }
            debug!(queue = %worker_label, "command queue drained and closed");
        });
        Self { tx, label }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Appends `work` to the queue without waiting for it.
    pub fn enqueue<F, T>(&self, work: F) -> Result<Completion<T>, QueueError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let unit: Unit = Box::pin(async move {
            let out = work.await;
            let _ = done_tx.send(out);
        });
        self.tx.send(unit).map_err(|_| QueueError::Closed)?;
        Ok(Completion { rx: done_rx })
    }

    /// Enqueues `work` and waits for its output.
    pub async fn submit<F, T>(&self, work: F) -> Result<T, QueueError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(work)?.await
    }
}

/// Completion signal for one enqueued unit.
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for Completion<T> {
    type Output = Result<T, QueueError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|r| r.map_err(|_| QueueError::Abandoned))
    }
}

/// A [`Driver`] whose every call is routed through a [`CommandQueue`].
#[derive(Clone)]
pub struct QueuedDriver {
    inner: Arc<dyn Driver>,
    queue: CommandQueue,
}

impl QueuedDriver {
    /// Wraps `driver` with a fresh queue. Must be called inside a tokio runtime.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        let label = format!("{:?}", driver.backend());
        Self {
            inner: driver,
            queue: CommandQueue::spawn(label),
        }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }
}

impl std::fmt::Debug for QueuedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedDriver")
            .field("backend", &self.inner.backend())
            .field("queue", &self.queue)
            .finish()
    }
}

#[async_trait]
impl Driver for QueuedDriver {
    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    async fn source_tree(&self) -> Result<RawSnapshot, DriverError> {
        let inner = self.inner.clone();
        self.queue.submit(async move { inner.source_tree().await }).await?
    }

    async fn tap(&self, element: &Element, options: TapOptions) -> Result<(), DriverError> {
        let (inner, element) = (self.inner.clone(), element.clone());
        self.queue
            .submit(async move { inner.tap(&element, options).await })
            .await?
    }

    async fn set_value(&self, element: &Element, text: &str) -> Result<(), DriverError> {
        let (inner, element, text) = (self.inner.clone(), element.clone(), text.to_string());
        self.queue
            .submit(async move { inner.set_value(&element, &text).await })
            .await?
    }

    // One unit, so the focusing tap and the keys cannot be split by another command.
    async fn type_in(&self, element: &Element, text: &str) -> Result<(), DriverError> {
        let (inner, element, text) = (self.inner.clone(), element.clone(), text.to_string());
        self.queue
            .submit(async move { inner.type_in(&element, &text).await })
            .await?
    }

    async fn send_keys(&self, element: Option<&Element>, keys: &str) -> Result<(), DriverError> {
        let (inner, element, keys) = (self.inner.clone(), element.cloned(), keys.to_string());
        self.queue
            .submit(async move { inner.send_keys(element.as_ref(), &keys).await })
            .await?
    }

    async fn scroll(&self, element: &Element, options: ScrollOptions) -> Result<(), DriverError> {
        let (inner, element) = (self.inner.clone(), element.clone());
        self.queue
            .submit(async move { inner.scroll(&element, options).await })
            .await?
    }

    async fn start_application(&self, app_id: &str) -> Result<(), DriverError> {
        let (inner, app_id) = (self.inner.clone(), app_id.to_string());
        self.queue
            .submit(async move { inner.start_application(&app_id).await })
            .await?
    }

    async fn stop_application(&self, app_id: &str) -> Result<(), DriverError> {
        let (inner, app_id) = (self.inner.clone(), app_id.to_string());
        self.queue
            .submit(async move { inner.stop_application(&app_id).await })
            .await?
    }

    async fn home(&self) -> Result<(), DriverError> {
        let inner = self.inner.clone();
        self.queue.submit(async move { inner.home().await }).await?
    }

    async fn lock(&self) -> Result<(), DriverError> {
        let inner = self.inner.clone();
        self.queue.submit(async move { inner.lock().await }).await?
    }

    async fn take_screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let inner = self.inner.clone();
        self.queue
            .submit(async move { inner.take_screenshot().await })
            .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_units_run_in_submission_order() {
        let queue = CommandQueue::spawn("test");
        let log = Arc::new(Mutex::new(Vec::new()));

        let unit = |name: &'static str, delay_ms: u64| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{name} start"));
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                log.lock().unwrap().push(format!("{name} end"));
                name
            }
        };

        // Enqueued back to back without yielding.
        let a = queue.enqueue(unit("A", 100)).unwrap();
        let b = queue.enqueue(unit("B", 0)).unwrap();
        let c = queue.enqueue(unit("C", 0)).unwrap();

        assert_eq!(c.await.unwrap(), "C");
        assert_eq!(a.await.unwrap(), "A");
        assert_eq!(b.await.unwrap(), "B");

        let log = log.lock().unwrap().clone();
        assert_eq!(log, vec!["A start", "A end", "B start", "B end", "C start", "C end"]);
    }

    #[tokio::test]
    async fn test_never_two_units_in_flight() {
        let queue = CommandQueue::spawn("test");
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let completions: Vec<_> = (0..20)
            .map(|_| {
                let (in_flight, peak) = (in_flight.clone(), peak.clone());
                queue
                    .enqueue(async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect();

        for done in completions {
            done.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_unit_is_isolated() {
        let queue = CommandQueue::spawn("test");
        let bad = queue
            .enqueue(async {
                if true {
                    panic!("boom");
                }
            })
            .unwrap();
        let good = queue.enqueue(async { 7 }).unwrap();

        assert_eq!(bad.await, Err(QueueError::Abandoned));
        assert_eq!(good.await, Ok(7));
    }

    #[tokio::test]
    async fn test_submit_returns_output() {
        let queue = CommandQueue::spawn("test");
        assert_eq!(queue.label(), "test");
        assert_eq!(queue.submit(async { 1 + 1 }).await, Ok(2));
    }
}
