//! Engine notices broadcast to the host.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::hal::Direction;

/// Notice emitted by the engine core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineNotice {
    /// Milliseconds since the engine was created.
    pub timestamp_ms: u64,
    pub kind: NoticeKind,
    pub detail: Option<String>,
}

/// Kinds of notices the engine emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoticeKind {
    StreamsOpened {
        sample_rate: u32,
        frames_per_period: u32,
    },
    Started,
    Stopped,
    StreamsClosed,
    DeviceChangeRecovered,
    DeviceChangeFailed,
    CallbackFault {
        direction: Direction,
    },
    Warning,
}

/// Sending half shared by the engine core and the recovery worker.
#[derive(Clone)]
pub(crate) struct NoticePublisher {
    tx: broadcast::Sender<EngineNotice>,
    start_instant: Instant,
}

impl NoticePublisher {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            start_instant: Instant::now(),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EngineNotice> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, kind: NoticeKind, detail: Option<String>) {
        let timestamp_ms = self.start_instant.elapsed().as_millis() as u64;
        // No subscribers is fine.
        let _ = self.tx.send(EngineNotice {
            timestamp_ms,
            kind,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_subscribers() {
        let publisher = NoticePublisher::new(8);
        let mut rx = publisher.subscribe();
        publisher.publish(NoticeKind::Started, None);
        publisher.publish(NoticeKind::Warning, Some("late".to_string()));

        assert_eq!(rx.try_recv().unwrap().kind, NoticeKind::Started);
        let warning = rx.try_recv().unwrap();
        assert_eq!(warning.kind, NoticeKind::Warning);
        assert_eq!(warning.detail.as_deref(), Some("late"));
    }

    #[test]
    fn test_notice_json_shape() {
        let notice = EngineNotice {
            timestamp_ms: 12,
            kind: NoticeKind::CallbackFault {
                direction: Direction::Output,
            },
            detail: None,
        };
        let json = serde_json::to_string(&notice).unwrap();
        assert!(json.contains(r#""type":"callback_fault""#));
        assert!(json.contains(r#""direction":"output""#));
    }
}
