//! Per-action records broadcast to observers.
//!
//! Every action the interpreter finishes, nested ones included, produces an
//! [`ActionRecord`]. A [`Journal`] fans records out over a
//! `tokio::sync::broadcast` channel; slow subscribers may miss records but
//! never block execution. Nothing is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

const JOURNAL_CAPACITY: usize = 256;

/// How an action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Failed,
    /// Paused or stopped mid-operation; counts as neither pass nor fail.
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub verb: String,
    pub target: String,
    pub verdict: Verdict,
    pub message: String,
    pub duration_ms: u64,
    /// Composition nesting level; 0 for top-level actions.
    pub depth: usize,
}

impl ActionRecord {
    pub fn new(
        verb: impl Into<String>,
        target: impl Into<String>,
        verdict: Verdict,
        message: impl Into<String>,
        duration_ms: u64,
        depth: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            verb: verb.into(),
            target: target.into(),
            verdict,
            message: message.into(),
            duration_ms,
            depth,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }
}

/// Broadcast sender for [`ActionRecord`]s.
#[derive(Debug, Clone)]
pub struct Journal {
    tx: broadcast::Sender<ActionRecord>,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(JOURNAL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActionRecord> {
        self.tx.subscribe()
    }

    /// Publishes a record. Having no subscribers is not an error.
    pub fn publish(&self, record: ActionRecord) {
        let _ = self.tx.send(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_records() {
        let journal = Journal::new();
        let mut rx = journal.subscribe();

        journal.publish(ActionRecord::new("tap", "Save", Verdict::Passed, "", 3, 0));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.verb, "tap");
        assert!(got.passed());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let journal = Journal::default();
        journal.publish(ActionRecord::new("wait", "10ms", Verdict::Interrupted, "", 0, 1));
    }

    #[test]
    fn test_record_serializes_verdict_lowercase() {
        let record = ActionRecord::new("tap", "Save", Verdict::Failed, "Should tap `Save`", 1, 0);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["verdict"], "failed");
        assert_eq!(json["depth"], 0);
    }
}
